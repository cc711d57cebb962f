//! C10: higher-order wrappers that add cross-cutting behavior to a block's
//! transform. Modifiers compose by function composition — the outermost
//! modifier observes failures of everything inside it.

use crate::envelope::Envelope;
use crate::pipeline::Transform;
use lattice_core::{Error, Result, Value};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A cross-cutting behavior applied to a block's transform via
/// [`Modifier::wrap`]. `add_block` applies a list of these with the first
/// element becoming outermost.
pub enum Modifier<V> {
    /// Up to `attempts` additional tries after a failure, waiting per
    /// `backoff(attempt_number)` between tries. The final failure (after
    /// `attempts + 1` total tries) propagates.
    Retry {
        /// Additional attempts beyond the first.
        attempts: usize,
        /// Computes the wait before retry number `n` (0-indexed).
        backoff: Arc<dyn Fn(usize) -> Duration + Send + Sync>,
    },
    /// Cancel the inner transform and fail with [`Error::Timeout`] if it
    /// does not complete within the given duration.
    Timeout(Duration),
    /// Sleep for the given duration (cancellable) before invoking the inner
    /// transform.
    Delay(Duration),
    /// Limit concurrent in-flight inner invocations via a counting
    /// semaphore; excess callers wait for a permit.
    Bulkhead(usize),
    /// On any inner failure, evaluate the fallback with the error and use
    /// its value instead of propagating.
    Fallback(Arc<dyn Fn(&Error) -> V + Send + Sync>),
    /// Ensure consecutive invocations start at least the given duration
    /// apart.
    Throttle(Duration),
}

impl<V: Value> Modifier<V> {
    /// Wrap `inner` with this modifier's behavior, returning a new transform.
    pub fn wrap(self, inner: Transform<V>) -> Transform<V> {
        match self {
            Modifier::Retry { attempts, backoff } => wrap_retry(inner, attempts, backoff),
            Modifier::Timeout(duration) => wrap_timeout(inner, duration),
            Modifier::Delay(duration) => wrap_delay(inner, duration),
            Modifier::Bulkhead(permits) => wrap_bulkhead(inner, permits),
            Modifier::Fallback(fallback) => wrap_fallback(inner, fallback),
            Modifier::Throttle(duration) => wrap_throttle(inner, duration),
        }
    }
}

fn wrap_retry<V: Value>(
    inner: Transform<V>,
    attempts: usize,
    backoff: Arc<dyn Fn(usize) -> Duration + Send + Sync>,
) -> Transform<V> {
    Arc::new(move |envelope: Envelope<V>, cancel: CancellationToken| {
        let inner = Arc::clone(&inner);
        let backoff = Arc::clone(&backoff);
        Box::pin(async move {
            let mut last_err = Error::invalid_operation("retry modifier invoked with zero attempts");
            for attempt in 0..=attempts {
                match inner(envelope.clone(), cancel.child_token()).await {
                    Ok(value) => return Ok(value),
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        last_err = e;
                        if attempt < attempts {
                            tokio::time::sleep(backoff(attempt)).await;
                        }
                    }
                }
            }
            Err(last_err)
        })
    })
}

fn wrap_timeout<V: Value>(inner: Transform<V>, duration: Duration) -> Transform<V> {
    Arc::new(move |envelope: Envelope<V>, cancel: CancellationToken| {
        let inner = Arc::clone(&inner);
        Box::pin(async move {
            let child = cancel.child_token();
            match tokio::time::timeout(duration, inner(envelope, child.clone())).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    child.cancel();
                    Err(Error::Timeout {
                        elapsed_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    })
                }
            }
        })
    })
}

fn wrap_delay<V: Value>(inner: Transform<V>, duration: Duration) -> Transform<V> {
    Arc::new(move |envelope: Envelope<V>, cancel: CancellationToken| {
        let inner = Arc::clone(&inner);
        Box::pin(async move {
            tokio::select! {
                () = cancel.cancelled() => Err(Error::Cancelled),
                () = tokio::time::sleep(duration) => inner(envelope, cancel).await,
            }
        })
    })
}

fn wrap_bulkhead<V: Value>(inner: Transform<V>, permits: usize) -> Transform<V> {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(permits.max(1)));
    Arc::new(move |envelope: Envelope<V>, cancel: CancellationToken| {
        let inner = Arc::clone(&inner);
        let semaphore = Arc::clone(&semaphore);
        Box::pin(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| Error::invalid_operation("bulkhead semaphore closed"))?;
            inner(envelope, cancel).await
        })
    })
}

fn wrap_fallback<V: Value>(
    inner: Transform<V>,
    fallback: Arc<dyn Fn(&Error) -> V + Send + Sync>,
) -> Transform<V> {
    Arc::new(move |envelope: Envelope<V>, cancel: CancellationToken| {
        let inner = Arc::clone(&inner);
        let fallback = Arc::clone(&fallback);
        Box::pin(async move {
            let index = envelope.index;
            match inner(envelope, cancel).await {
                Ok(out) => Ok(out),
                Err(Error::Cancelled) => Err(Error::Cancelled),
                Err(e) => {
                    let value = fallback(&e);
                    Ok(Envelope { index, value })
                }
            }
        })
    })
}

fn wrap_throttle<V: Value>(inner: Transform<V>, duration: Duration) -> Transform<V> {
    let clock = Arc::new(Mutex::new(None::<Instant>));
    Arc::new(move |envelope: Envelope<V>, cancel: CancellationToken| {
        let inner = Arc::clone(&inner);
        let clock = Arc::clone(&clock);
        Box::pin(async move {
            let wait = {
                let mut guard = clock.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                let wait = match *guard {
                    Some(previous) if now.duration_since(previous) < duration => {
                        duration - now.duration_since(previous)
                    }
                    _ => Duration::ZERO,
                };
                *guard = Some(now + wait);
                wait
            };
            if !wait.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(wait) => {}
                }
            }
            inner(envelope, cancel).await
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn identity_transform() -> Transform<i32> {
        Arc::new(|envelope: Envelope<i32>, _cancel: CancellationToken| {
            Box::pin(async move { Ok(envelope) })
        })
    }

    fn always_fails() -> Transform<i32> {
        Arc::new(|_envelope: Envelope<i32>, _cancel: CancellationToken| {
            Box::pin(async move { Err(Error::invalid_operation("boom")) })
        })
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let attempts_made = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts_made);
        let transform: Transform<i32> = Arc::new(move |envelope: Envelope<i32>, _cancel| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::invalid_operation("not yet"))
                } else {
                    Ok(envelope)
                }
            })
        });

        let wrapped = wrap_retry(transform, 5, Arc::new(|_| Duration::from_millis(0)));
        let result = wrapped(Envelope { index: 0, value: 1 }, CancellationToken::new()).await;
        assert_eq!(result.unwrap().value, 1);
        assert_eq!(attempts_made.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_propagates_final_failure() {
        let wrapped = wrap_retry(always_fails(), 2, Arc::new(|_| Duration::from_millis(0)));
        let result = wrapped(Envelope { index: 0, value: 1 }, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fallback_swallows_failure_after_retries_exhausted() {
        let retried = wrap_retry(always_fails(), 1, Arc::new(|_| Duration::from_millis(0)));
        let with_fallback = wrap_fallback(retried, Arc::new(|_e: &Error| -1));
        let result = with_fallback(Envelope { index: 0, value: 10 }, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.value, -1);
    }

    #[tokio::test]
    async fn timeout_fails_slow_transform() {
        let slow: Transform<i32> = Arc::new(|envelope: Envelope<i32>, _cancel| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(envelope)
            })
        });
        let wrapped = wrap_timeout(slow, Duration::from_millis(5));
        let result = wrapped(Envelope { index: 0, value: 1 }, CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn bulkhead_limits_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let in_flight_clone = Arc::clone(&in_flight);
        let max_seen_clone = Arc::clone(&max_seen);
        let transform: Transform<i32> = Arc::new(move |envelope: Envelope<i32>, _cancel| {
            let in_flight = Arc::clone(&in_flight_clone);
            let max_seen = Arc::clone(&max_seen_clone);
            Box::pin(async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(envelope)
            })
        });
        let wrapped = wrap_bulkhead(transform, 1);

        let a = wrapped(Envelope { index: 0, value: 1 }, CancellationToken::new());
        let b = wrapped(Envelope { index: 1, value: 2 }, CancellationToken::new());
        let _ = tokio::join!(a, b);

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identity_transform_round_trips() {
        let result = identity_transform()(Envelope { index: 0, value: 7 }, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.value, 7);
    }
}
