//! The pluggable explainer capability.
//!
//! An [`Explainer`] turns a rule-based verdict into richer natural-language
//! rationale. It is strictly best-effort: the caller owns the deadline
//! (`tokio::time::timeout` in the scheduler), and on any failure the
//! rule-based rationale stands unchanged. The deterministic evaluation path
//! never depends on it.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::connection::ConnectionRecord;
use crate::heuristics::Verdict;

/// Why an explanation was not produced.
#[derive(Debug, Error)]
pub enum ExplainError {
    /// The caller-enforced deadline passed.
    #[error("explainer timed out")]
    Timeout,
    /// The backend could not be reached or refused the request.
    #[error("explainer unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with something unusable.
    #[error("explainer returned an invalid response")]
    InvalidResponse,
}

/// A backend that can elaborate on a verdict.
///
/// Uses manual desugaring of `async fn` so implementations stay object-safe
/// without pulling in the `async-trait` crate.
pub trait Explainer: Send + Sync {
    /// Produce a natural-language elaboration of `base` for `record`.
    fn explain<'a>(
        &'a self,
        record: &'a ConnectionRecord,
        base: &'a Verdict,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExplainError>> + Send + 'a>>;
}
