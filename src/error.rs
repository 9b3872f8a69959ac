// Crate-wide error type.
//
// Mirrors the kinds named in the specification's error-handling design: each
// variant is a *kind*, not a leaky wrapper around a dependency's error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("NAT detection error: {0}")]
    Nat(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("not connected to peer")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(e: toml::de::Error) -> Self {
        NodeError::Config(e.to_string())
    }
}
