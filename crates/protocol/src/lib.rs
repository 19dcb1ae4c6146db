//! Wire types for the gateway session protocol.
//!
//! This crate contains the serde-serializable types exchanged with a remote
//! gateway: callback identities, push notifications, command and process
//! payloads, session descriptors, and the JSON-RPC envelopes used by the
//! reference binding.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Opaque where the server owns the meaning: command payloads are carried, not interpreted
//! * Stable: Changes only when the wire format changes
//!
//! Session lifecycle and callback coordination live in `gw-runtime` and `gw-client`.

pub mod command;
pub mod identity;
pub mod notification;
pub mod rpc;
pub mod session;

pub use command::*;
pub use identity::*;
pub use notification::*;
pub use rpc::*;
pub use session::*;
