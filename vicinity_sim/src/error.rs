//! Errors surfaced by the simulation harness.

use thiserror::Error;
use vicinity_core::ProximityError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] ProximityError),

    /// Could not build the async runtime a scenario needs
    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
