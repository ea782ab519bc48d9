//! The container supervisor state machine and references to containers
//! launched by other processes.

mod container;
pub mod state;

pub use container::{Container, ContainerRef};
pub use state::{ContainerStatus, State};
