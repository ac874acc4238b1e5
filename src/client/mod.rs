// ABOUTME: STOMP client module - the public facade plus its configuration and error types
// ABOUTME: Everything a caller needs is re-exported here; the connection manager, subscription registry, and codec are lower layers it composes

pub mod config;
pub mod error;
pub mod facade;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{StompError, StompResult};
pub use facade::Client;
