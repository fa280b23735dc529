/// Console and rolling-file `tracing` setup for the binaries.
pub mod setup;

pub use setup::setup_logging;
