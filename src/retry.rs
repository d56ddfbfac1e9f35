/// Retries a venue operation with exponential backoff. Non-transient
/// errors (rejections, unknown orders) fail immediately; transient ones
/// are retried up to `MAX_ATTEMPTS` and then escalated as
/// `VenueError::RetriesExhausted` so the caller can halt trading.
macro_rules! retry_venue_operation {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if !err.is_transient() => break Err(err),
                Err(err) if attempt >= MAX_ATTEMPTS => {
                    break Err($crate::error::VenueError::RetriesExhausted {
                        context: context_value,
                        source: Box::new(err),
                    })
                }
                Err(err) => {
                    let delay_secs = 2u64.pow(attempt);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}s.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        delay_secs
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_venue_operation;

#[cfg(test)]
mod tests {
    use crate::error::VenueError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_then_escalated() {
        let calls = AtomicU32::new(0);
        let result: Result<(), VenueError> = retry_venue_operation!("place order", async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(VenueError::Rejected {
                status: 503,
                message: "maintenance".into(),
            })
        });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(VenueError::RetriesExhausted { context, .. }) => {
                assert_eq!(context, "place order");
            }
            other => panic!("expected RetriesExhausted, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn rejections_fail_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), VenueError> = retry_venue_operation!("place order", async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(VenueError::Rejected {
                status: 400,
                message: "insufficient balance".into(),
            })
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(VenueError::Rejected { .. })));
    }

    #[tokio::test]
    async fn success_passes_through() {
        let result: Result<u32, VenueError> =
            retry_venue_operation!("fetch account", async { Ok::<u32, VenueError>(42u32) });
        assert_eq!(result.ok(), Some(42));
    }
}
