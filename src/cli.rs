//! Command line surface of the `mqtt-connector` binary

mod args;
mod commands;
mod tracing_setup;

pub use args::Cli;
pub use commands::run;
pub use tracing_setup::setup as setup_tracing;
