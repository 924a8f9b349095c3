//! Primary→fallback escalation with unified error semantics.
//!
//! The fallback dispatcher never consults or updates the circuit breaker —
//! only the primary path does that.

use std::future::Future;

/// Invokes `primary`; on failure invokes `fallback` and returns its result
/// (even if the fallback also fails — the caller inspects both errors).
/// Returns which path produced the result, since the pipeline needs that to
/// decide whether to touch the breaker and which metrics counter to bump.
pub enum Dispatched<T, E> {
    Primary(T),
    Fallback(Result<T, E>),
}

pub async fn with_fallback<T, E, PrimaryFut, FallbackFut>(
    primary: impl FnOnce() -> PrimaryFut,
    fallback: impl FnOnce() -> FallbackFut,
) -> Dispatched<T, E>
where
    PrimaryFut: Future<Output = Result<T, E>>,
    FallbackFut: Future<Output = Result<T, E>>,
{
    match primary().await {
        Ok(value) => Dispatched::Primary(value),
        Err(_primary_err) => Dispatched::Fallback(fallback().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn primary_success_never_calls_fallback() {
        let fallback_called = std::cell::Cell::new(false);
        let result: Dispatched<i32, &str> = with_fallback(
            || async { Ok::<_, &str>(1) },
            || async {
                fallback_called.set(true);
                Ok::<_, &str>(2)
            },
        )
        .await;
        assert!(matches!(result, Dispatched::Primary(1)));
        assert!(!fallback_called.get());
    }

    #[tokio::test]
    async fn primary_failure_escalates_to_fallback() {
        let result: Dispatched<i32, &str> =
            with_fallback(|| async { Err::<i32, _>("primary down") }, || async { Ok(2) }).await;
        match result {
            Dispatched::Fallback(Ok(v)) => assert_eq!(v, 2),
            _ => panic!("expected fallback success"),
        }
    }

    #[tokio::test]
    async fn both_failing_surfaces_fallback_error() {
        let result: Dispatched<i32, &str> = with_fallback(
            || async { Err::<i32, _>("primary down") },
            || async { Err::<i32, _>("fallback down") },
        )
        .await;
        match result {
            Dispatched::Fallback(Err(e)) => assert_eq!(e, "fallback down"),
            _ => panic!("expected fallback failure"),
        }
    }
}
