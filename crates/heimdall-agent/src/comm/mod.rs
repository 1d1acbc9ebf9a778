//! Communication client (§4.10): a REST sub-client and an
//! auto-reconnecting WebSocket sub-client sharing the device's
//! configuration.

pub mod rest;
pub mod ws;

pub use rest::RestClient;
pub use ws::WsClient;
