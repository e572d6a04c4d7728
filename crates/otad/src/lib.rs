//! otad library - exposes the HTTP surfaces for testing.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
