//! Legion chat client
//!
//! Async side of the client: the connection manager with its reconnect
//! schedule, the chat session that feeds the transcript engine, the REST
//! client for conversation management, plus configuration, logging and
//! terminal rendering used by the `legion` binary.

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod reconnect;
pub mod render;
pub mod rest;
pub mod session;

pub use config::ClientConfig;
pub use connection::{ConnectionHandle, ConnectionState, TaggedEvent};
pub use error::{ClientError, ConfigError, Result};
pub use reconnect::{ReconnectPolicy, Sleeper, TokioSleeper};
pub use rest::{ConversationApi, HttpApi};
pub use session::{ChatSession, SendOptions, SendReport, SessionSnapshot};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
