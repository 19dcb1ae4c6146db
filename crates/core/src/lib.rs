//! Client library for session-oriented gateway RPC services.
//!
//! A [`SessionManager`] owns the runtime and one logical session, retrying
//! contended session creation and tearing everything down in a fixed order.
//! Long-running server commands are awaited with a [`CommandCallback`], which
//! races server-pushed completion against client polling.
//!
//! ```ignore
//! let manager = SessionManager::remote(ConfigSnapshot::builder().host("gw.example.org").build());
//! manager.create_session(Some("root"), Some("secret")).await?;
//!
//! let callback = manager.submit(CommandRequest::new("delete", json!({"ids": [1, 2]}))).await?;
//! let response = callback.loop_wait(10, Duration::from_millis(500)).await?;
//! callback.close().await?;
//!
//! manager.close_session().await?;
//! ```

pub mod callback;
pub mod error;
pub mod session;

pub use callback::{CommandCallback, CommandObserver, ProcessCallback, ProcessOutcome};
pub use error::{Error, Result};
pub use gw_protocol as protocol;
pub use gw_runtime as runtime;
pub use gw_runtime::{ConfigSnapshot, ErrorKind};
pub use session::{CallbackEndpoint, EndpointHandlers, SessionHandle, SessionManager};
