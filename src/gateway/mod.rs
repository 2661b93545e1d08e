//! HTTP front of the gateway: the compiled runtime and the axum server serving it.

pub mod runtime;
pub mod server;

pub use runtime::{Runtime, RuntimeHandle};
pub use server::{build_app, shutdown_signal, GatewayServer};
