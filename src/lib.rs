//! # Echobot
//!
//! Relays chat messages from source channels to destination channels
//! according to declarative redirect rules.
//!
//! ## Architecture
//!
//! ```text
//! Gateway -> queue -> RelayEngine -> RedirectIndex -> MessageTransformer -> DeliveryDispatcher -> ChatClient
//! ```
//!
//! ## Modules
//!
//! - [`message`]: inbound and outbound message types
//! - [`redirect`]: redirect rules and their options
//! - [`config`]: loading and validating the configuration document
//! - [`router`]: which rules match a message
//! - [`transform`]: turning a message into what gets posted
//! - [`dispatch`]: the [`ChatClient`] seam, dedup and delivery
//! - [`engine`]: the per-message entry point
//! - [`command`] / [`admin`]: in-band administrative commands
//! - [`session`]: the relay loop for one gateway connection
//! - [`discord`]: the serenity transport
//! - [`health`]: optional liveness endpoint
//! - [`shutdown`]: graceful shutdown

pub mod admin;
pub mod command;
pub mod config;
pub mod discord;
pub mod dispatch;
pub mod engine;
pub mod health;
pub mod message;
pub mod redirect;
pub mod router;
pub mod session;
pub mod shutdown;
pub mod transform;

// Re-export commonly used types at crate root
pub use config::{ConfigError, ConfigSource, ValidatedConfig};
pub use dispatch::{ChatClient, DeliveryError};
pub use engine::{RelayEngine, RelayReport};
pub use message::{InboundMessage, OutboundMessage};
pub use redirect::{RedirectOptions, RedirectRule};
