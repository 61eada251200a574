//! Command implementations.

mod benchmark;
mod info;
mod run;
mod validate;
mod worker;

pub use benchmark::run_benchmark;
pub use info::run_info;
pub use run::run_migration;
pub use validate::run_validate;
pub use worker::run_worker;
