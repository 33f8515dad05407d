//! TCP data plane: accept loop, per-connection handling, and byte piping.

pub mod handler;
pub mod pipe;
pub mod server;

pub use server::{ProxyContext, ProxyServer};
