// SPDX-License-Identifier: CEPL-1.0
//! Error taxonomy for the render core.
//!
//! Every variant is fatal. Transient presentation statuses (suboptimal, out of date) are
//! plain return values, see [`crate::Acquire`] and [`crate::PresentStatus`].

use std::time::Duration;
use thiserror::Error;

/// Boxed backend failure carried as the source of [`RenderError`].
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The environment cannot satisfy the program's requirements.
    Config,
    /// A GPU object could not be created.
    Resource,
    /// A fence wait or image acquire timed out; treated as a GPU hang.
    Timeout,
    /// Any other backend failure (device lost, surface lost, ...).
    Device,
    /// The fence or command-unit state machine was driven out of order.
    Protocol,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to create {what}")]
    Resource {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("{what} timed out after {timeout:?}")]
    Timeout {
        what: &'static str,
        timeout: Duration,
    },

    #[error("device error during {what}")]
    Device {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

impl RenderError {
    pub fn config(msg: impl Into<String>) -> Self {
        RenderError::Config(msg.into())
    }

    pub fn resource(what: &'static str, source: impl Into<BackendError>) -> Self {
        RenderError::Resource {
            what,
            source: source.into(),
        }
    }

    pub fn device(what: &'static str, source: impl Into<BackendError>) -> Self {
        RenderError::Device {
            what,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::Config(_) => ErrorKind::Config,
            RenderError::Resource { .. } => ErrorKind::Resource,
            RenderError::Timeout { .. } => ErrorKind::Timeout,
            RenderError::Device { .. } => ErrorKind::Device,
            RenderError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(RenderError::config("x").kind(), ErrorKind::Config);
        assert_eq!(
            RenderError::resource("fence", std::io::Error::other("oom")).kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            RenderError::Timeout {
                what: "fence wait",
                timeout: Duration::from_millis(5)
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(RenderError::Protocol("x").kind(), ErrorKind::Protocol);
    }

    #[test]
    fn resource_error_keeps_source() {
        let err = RenderError::resource("semaphore", std::io::Error::other("out of memory"));
        assert_eq!(err.to_string(), "failed to create semaphore");
        let src = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(src.as_deref(), Some("out of memory"));
    }
}
