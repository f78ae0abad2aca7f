//! Server-side bookkeeping of accepted connections.

mod registry;

pub use registry::ConnectionRegistry;
