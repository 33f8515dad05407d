//! Error types for spindle

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No backend available")]
    NoBackendAvailable,

    #[error("Upstream connect to {addr} failed: {source}")]
    UpstreamConnect { addr: String, source: io::Error },

    #[error("Upstream connect to {0} timed out")]
    UpstreamConnectTimeout(String),

    #[error("Upstream pipe error: {0}")]
    UpstreamPipe(io::Error),

    #[error("Client connection error: {0}")]
    Client(io::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
