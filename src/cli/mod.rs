mod categories;
mod clean;
mod import;
mod review;
mod stats;

pub use categories::*;
pub use clean::*;
pub use import::*;
pub use review::*;
pub use stats::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
