//! View models returned by repositories.

use crate::model::PublishAttempt;

/// Outcome of the idempotency guard's insert-if-absent for a
/// (post, account) pair.
#[derive(Debug, Clone)]
pub enum Admission {
    /// The pair was unseen; a `pending` attempt row now exists and the
    /// caller owns its execution.
    New,
    /// The pair already has an attempt row (terminal or owned by a
    /// concurrent run).
    Existing(PublishAttempt),
}
