// ocpkvm-cli: Clap commands, UI, logging
// Depends on ocpkvm-core, ocpkvm-runtime, ocpkvm-provision

pub mod commands;
pub mod logging;
pub mod output;
pub mod ui;

pub use commands::run;
