//! Command line interface

pub mod args;
pub mod error;
pub mod report;
pub mod tables;

pub use args::{Cli, OutputFormat};
pub use error::{CliError, EXIT_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};
pub use tables::TableCommand;
