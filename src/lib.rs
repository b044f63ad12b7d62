//! Type-safe RPC core: a reconnecting WebSocket transport, an HTTP batch
//! transport, a local in-process binding, and the composite that glues
//! carriers together — plus the server-side dispatcher and client-side
//! proxy that sit on top of them.
//!
//! Start at [`transport::Transport`] for the carrier contract, [`proxy`]
//! for the client-facing call-builder, and [`server`] for exposing a
//! [`transport::local::LocalTarget`] over HTTP/WebSocket.

pub mod auth;
pub mod config;
pub mod error;
pub mod method_path;
pub mod proxy;
pub mod server;
pub mod streaming;
pub mod transport;

pub use error::{CallError, QueueKind, RpcClassification, RpcError, TransportError};
pub use method_path::MethodPath;
pub use proxy::RpcProxy;
pub use transport::Transport;
