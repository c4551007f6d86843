//! Pure data structures (DTOs) shared by every component of the control core.

pub mod actuator;
pub mod audit;
pub mod canister;
pub mod config;
pub mod formula;
pub mod status;

pub use actuator::*;
pub use audit::*;
pub use canister::*;
pub use config::*;
pub use formula::*;
pub use status::*;
