//! Task state with the actor pattern
//!
//! TaskRegistry owns every task record and processes commands via a
//! channel, so no mutable task state is ever shared.

mod messages;
mod registry;

pub use messages::{RegistryCommand, RegistryError, RegistryResponse, Transition};
pub use registry::{RegistryEvent, TaskRegistry};
