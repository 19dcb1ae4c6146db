//! Session lifecycle and the client callback endpoint.

mod endpoint;
mod handle;
mod manager;

pub use endpoint::{CallbackEndpoint, EndpointHandlers, Handler};
pub use handle::SessionHandle;
pub use manager::SessionManager;
