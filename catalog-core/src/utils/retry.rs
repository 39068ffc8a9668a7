//! Bounded retry for storage sub-steps (compaction, snapshot, restore, delete).

use crate::utils::errors::{CatalogError, Result};
use tracing::warn;

/// The last error of an operation that ran out of attempts.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub last: CatalogError,
}

/// Retries `op` while the error is retryable, up to `max_attempts` tries.
pub fn retry<T, F>(what: &str, max_attempts: u32, op: F) -> std::result::Result<T, Exhausted>
where
    F: FnMut(u32) -> Result<T>,
{
    retry_when(what, max_attempts, CatalogError::is_retryable, op)
}

/// Like [`retry`] with a caller-supplied retry predicate.
pub fn retry_when<T, F, P>(
    what: &str,
    max_attempts: u32,
    should_retry: P,
    mut op: F,
) -> std::result::Result<T, Exhausted>
where
    F: FnMut(u32) -> Result<T>,
    P: Fn(&CatalogError) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                warn!(what, attempt, max_attempts, error = %e, "Attempt failed, retrying");
                attempt += 1;
            }
            Err(e) => {
                return Err(Exhausted {
                    attempts: attempt,
                    last: e,
                })
            }
        }
    }
}
