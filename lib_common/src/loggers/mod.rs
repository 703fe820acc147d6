/// Global `tracing` subscriber with console and rolling JSON file output.
pub mod tracing_setup;

pub use tracing_setup::{LoggingError, setup_logging};
