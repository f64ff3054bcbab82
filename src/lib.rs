#![forbid(unsafe_code)]

pub mod communicator;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod pty;
pub mod runtime;

pub use config::{AgentConfig, Config, RuntimeSettings};
pub use errors::{AppError, Result};
pub use runtime::Runtime;
