//! Device-side enforcer: samples the foreground application, applies
//! the rules the control plane resolves, and keeps working (from a
//! local cache) when the server is unreachable.

pub mod blocker;
pub mod cache;
pub mod comm;
pub mod config;
pub mod monitor;
pub mod orchestrator;
pub mod remote_control;
pub mod service;

pub use config::AgentConfig;
pub use orchestrator::Orchestrator;
