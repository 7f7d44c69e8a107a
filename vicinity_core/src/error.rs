//! Error types for the proximity engine.

use thiserror::Error;
use vicinity_env::EnvError;

use crate::types::EntityId;

/// Errors surfaced by engine operations.
///
/// `NotFound` is an expected outcome ("no trucks available") rather than a
/// fault; callers are expected to match on it.
#[derive(Debug, Error)]
pub enum ProximityError {
    /// A required party has no known position.
    #[error("Missing location: {0}")]
    MissingLocation(String),

    /// Rejected at the boundary, nothing was applied.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A non-terminal session already exists for this pair.
    #[error("Already watching: observer {observer} -> target {target}")]
    AlreadyWatching { observer: EntityId, target: EntityId },

    /// No entity, session or qualifying candidate.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The external registry store failed.
    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Env(#[from] EnvError),
}

impl ProximityError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        Self::MissingLocation(msg.into())
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// True for the non-exceptional "nothing matched" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ProximityError>;
