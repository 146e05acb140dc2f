//! Game-side boundary implementations.
//!
//! - [`sim`]: an in-process match simulator that provides both perception
//!   and actuation, for training without a live game client
//! - [`executor`]: a wrapper that enforces the actuation timeout and the
//!   retry policy around any [`Executor`](crate::rl::Executor)

pub mod executor;
pub mod sim;

pub use executor::{ActionExecutor, RetryPolicy};
pub use sim::{SimActuator, SimConfig, SimMatch, SimPerception};
