use std::fmt;

use thiserror::Error;

/// Step of a roll that failed after the new partition was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollStage {
    Aliases,
    Cleanup,
    Demotion,
}

impl fmt::Display for RollStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollStage::Aliases => write!(f, "alias update"),
            RollStage::Cleanup => write!(f, "cleanup"),
            RollStage::Demotion => write!(f, "demotion"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("policy {id} is invalid: {reason}")]
    InvalidPolicy { id: String, reason: String },
    #[error("invalid size {input:?}: {reason}")]
    InvalidSize { input: String, reason: &'static str },
    #[error("size query for {pattern} matched {matches} partitions, expected exactly one")]
    AmbiguousTarget { pattern: String, matches: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no valid rotation policies found")]
    NoPolicies,
    #[error("store request failed{}: {message}", status_suffix(.status))]
    Store {
        status: Option<u16>,
        message: String,
    },
    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("roll to {partition} failed during {stage}: {source}")]
    RollStage {
        partition: String,
        stage: RollStage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn invalid_policy(id: &str, reason: impl Into<String>) -> Self {
        Error::InvalidPolicy {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// A backend failure without an HTTP status, for custom stores.
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            status: None,
            message: message.into(),
        }
    }

    pub(crate) fn at_stage(self, partition: &str, stage: RollStage) -> Self {
        Error::RollStage {
            partition: partition.to_string(),
            stage,
            source: Box::new(self),
        }
    }

    /// Errors that drop a policy at load time rather than abort a roll.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidPolicy { .. } | Error::InvalidSize { .. } | Error::InvalidConfig(_)
        )
    }

    /// Errors expected to clear on a later trigger without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store { .. } | Error::AmbiguousTarget { .. } => true,
            #[cfg(feature = "http")]
            Error::Http(_) => true,
            Error::RollStage { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
