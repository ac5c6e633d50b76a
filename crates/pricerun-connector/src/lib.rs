//! Connector layer: the boundary between the engine and the outside
//! world. Each node type maps to a [`NodeHandler`] registered in a
//! [`HandlerRegistry`]; the [`ConnectorInvoker`] drives one handler call
//! with the node's timeout, retry policy and cancellation wired in, and
//! always reports back as a `NodeResult` rather than an error.

mod credentials;
mod error;
mod handler;
mod invoker;

pub use credentials::{CredentialResolver, NoCredentials, StaticCredentialResolver};
pub use error::HandlerError;
pub use handler::{HandlerRegistry, Invocation, NodeHandler};
pub use invoker::{ConnectorInvoker, RetryPolicy};
