//! Typed errors for the recoverable paths of the engine.
//!
//! Contract violations (out-of-range bit access, an `Intersect` with no
//! children) are bugs in the caller and panic instead.

/// Errors surfaced to the compiler/session layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KbError {
    /// A numeric comparator token that is not one of
    /// `gt`, `gte`, `lt`, `lte`, `eq`, `neq` (or their symbolic forms).
    #[error("unsupported comparator `{0}`")]
    UnsupportedComparator(String),

    /// The semi-naive loop hit the caller-supplied round bound before
    /// reaching a fixpoint. Facts derived so far remain in the store.
    #[error("fixpoint not reached after {limit} rounds ({added} facts added)")]
    RoundLimitExceeded { limit: usize, added: usize },

    /// A decoded bit set whose words disagree with its size.
    #[error("invalid bit set: {0}")]
    InvalidBitSet(String),

    #[error("invalid fact id `{0}`")]
    InvalidFactId(String),

    #[error("invalid engine config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KbError>;
