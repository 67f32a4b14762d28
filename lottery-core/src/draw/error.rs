use crate::entities::DrawStatus;
use crate::framework::StoreError;
use thiserror::Error;

/// Errors returned by [`DrawEngine`](super::DrawEngine) operations.
///
/// Broker failures never show up here: notifications are best-effort.
#[derive(Debug, Error)]
pub enum DrawError {
    /// Malformed input, rejected before touching storage
    #[error("invalid input: {0}")]
    Validation(String),

    /// The referenced draw does not exist
    #[error("draw {0} not found")]
    NotFound(i64),

    /// A draw already exists for this date
    #[error("a draw already exists for {0}")]
    DuplicateDraw(time::Date),

    /// The user already has a bet on this draw
    #[error("user {user_id} already has a bet on draw {draw_id}")]
    DuplicateWager { draw_id: i64, user_id: i64 },

    /// Results were already generated for this draw
    #[error("results already generated for draw {0}")]
    AlreadyGenerated(i64),

    /// The draw is not accepting bets
    #[error("draw {0} is not open for bets")]
    NotOpen(i64),

    /// Results can only be generated for a closed draw
    #[error("draw {0} must be closed before generating results")]
    NotClosed(i64),

    /// Not one of `open`, `closed`, `completed`
    #[error("invalid status: {0:?}")]
    InvalidStatus(String),

    /// The lifecycle does not allow this status change
    #[error("cannot move draw from {from} to {to}")]
    IllegalTransition { from: DrawStatus, to: DrawStatus },

    /// Persistence failure that is not a known constraint violation
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse error categories, for mapping onto a transport's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvalidState,
    Internal,
}

impl DrawError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DrawError::Validation(_) => ErrorKind::Validation,
            DrawError::NotFound(_) => ErrorKind::NotFound,
            DrawError::DuplicateDraw(_)
            | DrawError::DuplicateWager { .. }
            | DrawError::AlreadyGenerated(_) => ErrorKind::Conflict,
            DrawError::NotOpen(_)
            | DrawError::NotClosed(_)
            | DrawError::InvalidStatus(_)
            | DrawError::IllegalTransition { .. } => ErrorKind::InvalidState,
            DrawError::Store(_) => ErrorKind::Internal,
        }
    }
}
