//! Mailbox front of the control core.
//!
//! The client API is exposed through a single actor: callers hold a cheap,
//! cloneable [`ControlClient`], every call becomes a typed [`ControlRequest`]
//! on an mpsc channel, and the reply comes back on a oneshot channel.
//!
//! # Main Components
//!
//! - [`ControlRequest`] - One variant per client operation
//! - [`ControlActor`] - Receives requests and drives the [`ControlCore`](crate::control::ControlCore)
//! - [`ControlClient`] - Typed async API over the mailbox
//!
//! # Testing
//!
//! See the [`mock`] module for utilities to test clients without a running core.

pub mod actor;
pub mod client;
pub mod message;
pub mod mock;

pub use actor::ControlActor;
pub use client::ControlClient;
pub use message::{ControlRequest, Response};
