//! Daemon-wide error representation shared across adapters.
//!
//! Keep this module free from transport or database specifics so the same
//! error shape can be mapped by any adapter (planet client, persistence,
//! plugin loader, background sync).

use thiserror::Error;

/// Errors surfaced by the replication pipeline and its adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration file, CLI surface, or environment is unusable.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A network-level failure: connect, TLS, timeout, partial read.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A payload could not be decoded: gunzip, XML, state-file grammar.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// The remote artifact does not exist (or is too short to be real).
    #[error("remote not found: {message}")]
    RemoteNotFound { message: String },

    /// A database operation failed.
    #[error("database error: {message}")]
    Database { message: String },

    /// Geometry could not be assembled from the declared references.
    #[error("geometry error: {message}")]
    Geometry { message: String },

    /// The validator plugin could not be loaded or resolved.
    #[error("plugin error: {message}")]
    Plugin { message: String },
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a remote-not-found error.
    pub fn remote_not_found(message: impl Into<String>) -> Self {
        Self::RemoteNotFound {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a geometry error.
    pub fn geometry(message: impl Into<String>) -> Self {
        Self::Geometry {
            message: message.into(),
        }
    }

    /// Create a plugin error.
    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin {
            message: message.into(),
        }
    }
}
