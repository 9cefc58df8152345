//! Tagged error taxonomy for the analytics core.
//!
//! Every public operation returns `CoreResult<T>`. Leaf components (odds math,
//! correlation, Monte Carlo) return the most specific variant that applies;
//! orchestrators (the scheduler, the optimizer) translate `Cancelled`/`Timeout`
//! from a leaf call into a run-level terminal status while preserving the
//! originating `kind()`.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidOdds,
    InvalidProbability,
    InsufficientData,
    NumericalInstability,
    Cancelled,
    Timeout,
    QueueFull,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid odds: {0}")]
    InvalidOdds(String),

    #[error("invalid probability: {0}")]
    InvalidProbability(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("queue full (depth {depth}, capacity {capacity})")]
    QueueFull { depth: usize, capacity: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidOdds(_) => ErrorKind::InvalidOdds,
            CoreError::InvalidProbability(_) => ErrorKind::InvalidProbability,
            CoreError::InsufficientData(_) => ErrorKind::InsufficientData,
            CoreError::NumericalInstability(_) => ErrorKind::NumericalInstability,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::QueueFull { .. } => ErrorKind::QueueFull,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(anyhow::anyhow!(msg.into()))
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
