//! Startup, shutdown and observability.

pub mod terminal;
pub mod tracing;

pub use self::terminal::TintingTerminal;
pub use self::tracing::setup_tracing;
