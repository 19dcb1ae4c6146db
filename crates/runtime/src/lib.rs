//! Runtime layer for gateway sessions.
//!
//! Defines the outbound contract a session manager drives ([`Connector`],
//! [`Runtime`], [`Gateway`], [`SessionProxy`], [`CommandHandle`], ...), the
//! [`DispatchRegistry`] that routes push notifications to local callbacks,
//! the configuration snapshot, and a JSON-RPC binding over WebSocket.

pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod remote;
pub mod runtime;
pub mod stub;
pub mod transport;

pub use config::{ConfigBuilder, ConfigSnapshot, RetryPolicy};
pub use error::{EXPECTED_ON_TEARDOWN, Error, ErrorKind, Result};
pub use registry::{CallbackTarget, DispatchRegistry};
pub use remote::{RemoteConnector, RemoteRuntime};
pub use runtime::{CommandHandle, Connector, Gateway, ProcessHandle, Runtime, SessionProxy, SessionService};
