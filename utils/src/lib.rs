//! Shared utilities for the aquaring workspace.

pub mod logging;
pub mod shutdown;

pub use logging::init_tracing;
pub use shutdown::ShutdownController;
