//! Worker: discovery, heartbeat answering, and unit computation

pub mod agent;
pub mod compute;
pub mod heartbeat;

pub use agent::{WorkerAgent, WorkerConfig};
