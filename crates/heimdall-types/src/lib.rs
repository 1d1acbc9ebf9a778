//! Shared domain and wire types for the Heimdall control plane and agent.
//!
//! Nothing in this crate talks to a database or a socket; it exists so
//! the server and the agent agree on the shape of policy data and the
//! WebSocket message envelopes without duplicating definitions.

pub mod enums;
pub mod ids;
pub mod rules;
pub mod ws;

pub use enums::*;
pub use ids::*;
pub use rules::*;
