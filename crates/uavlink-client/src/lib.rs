//! Client for the uavlink protocol.
//!
//! A [`Client`] keeps the definitions announced by its peer, routes inbound
//! packets to per-name handler sets and frames outbound operations in the
//! configured [`Dialect`]. With telemetry configured it also runs the link
//! status handshake and reports readiness once the peer confirms the link.
//!
//! ```no_run
//! use uavlink_client::{Client, ClientConfig};
//!
//! # async fn run() -> Result<(), uavlink_client::ClientError> {
//! let client = Client::new(ClientConfig::telemetry("ws://127.0.0.1:4224/uav"));
//! client.connect().await?;
//! client.ready().await?;
//!
//! client.attach("AttitudeState", |update| {
//!     println!("{}: {}", update.name, update.data);
//! });
//! let position = client.read("PositionState", None).await?;
//! # let _ = position;
//! # Ok(())
//! # }
//! ```
//!
//! The transport can also be driven by hand with [`Client::bind`],
//! [`Client::receive`] and [`Client::unbind`].

pub mod bridge;
mod client;
mod config;
mod error;
mod readiness;
mod session;
mod telemetry;
mod transport;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, TelemetryConfig};
pub use error::ClientError;
pub use uavlink_core::{
    Callback, Definition, DefinitionKind, Dialect, FieldDefinition, HandlerId, HandlerManager,
    HandshakeError, HandshakeState, ObjectData,
};
