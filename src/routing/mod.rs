//! Request routing from method and path to configured endpoints.

pub mod router;

pub use router::{EndpointRouter, RouteMatch};
