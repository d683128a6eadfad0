use super::*;
use crate::session::mock::identity;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

fn limits(min_interval_ms: u64, max_retries: u32, padding_ms: u64) -> CallLimits {
    CallLimits {
        min_interval: Duration::from_millis(min_interval_ms),
        max_retries,
        flood_padding: Duration::from_millis(padding_ms),
    }
}

#[test]
fn test_default_limits() {
    let limits = CallLimits::default();
    assert_eq!(limits.min_interval, Duration::from_secs(1));
    assert_eq!(limits.max_retries, 3);
    assert_eq!(limits.flood_padding, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_flood_wait_once_then_success() {
    let serializer = CallSerializer::new(limits(0, 3, 0));
    let attempts = AtomicU32::new(0);
    let start = Instant::now();

    let result = serializer
        .call(&identity("acct"), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AutosignError::FloodWait { retry_after: 2 })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_padding_is_added_to_flood_wait() {
    let serializer = CallSerializer::new(limits(0, 3, 500));
    let attempts = AtomicU32::new(0);
    let start = Instant::now();

    serializer
        .call(&identity("acct"), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AutosignError::FloodWait { retry_after: 1 })
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_always_flood_makes_exactly_max_retries_attempts() {
    let serializer = CallSerializer::new(limits(0, 3, 0));
    let attempts = AtomicU32::new(0);

    let err = serializer
        .call(&identity("acct"), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AutosignError::FloodWait { retry_after: 5 }) }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(matches!(
        err,
        AutosignError::RetriesExhausted {
            attempts: 3,
            retry_after: 5
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_still_attempts_once() {
    let serializer = CallSerializer::new(limits(0, 0, 0));
    let attempts = AtomicU32::new(0);

    let err = serializer
        .call(&identity("acct"), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AutosignError::FloodWait { retry_after: 1 }) }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(err, AutosignError::RetriesExhausted { attempts: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_other_errors_propagate_without_retry() {
    let serializer = CallSerializer::new(limits(0, 3, 0));
    let attempts = AtomicU32::new(0);

    let err = serializer
        .call(&identity("acct"), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AutosignError::Unauthorized("revoked".into())) }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(err, AutosignError::Unauthorized(_)));
}

#[tokio::test(start_paused = true)]
async fn test_min_interval_spaces_consecutive_calls() {
    let serializer = CallSerializer::new(limits(1000, 3, 0));
    let id = identity("acct");
    let start = Instant::now();

    serializer.call(&id, || async { Ok(()) }).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(10));
    serializer.call(&id, || async { Ok(()) }).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(1));

    let other = Instant::now();
    serializer
        .call(&identity("other"), || async { Ok(()) })
        .await
        .unwrap();
    assert!(other.elapsed() < Duration::from_millis(10));
}

async fn max_overlap(ids: &[&str]) -> usize {
    let serializer = Arc::new(CallSerializer::new(limits(0, 3, 0)));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let serializer = serializer.clone();
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        let id = identity(ids[i % ids.len()]);
        tasks.push(tokio::spawn(async move {
            serializer
                .call(&id, || {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    peak.load(Ordering::SeqCst)
}

#[tokio::test(start_paused = true)]
async fn test_calls_on_one_identity_never_overlap() {
    assert_eq!(max_overlap(&["acct"]).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_calls_on_different_identities_overlap() {
    assert!(max_overlap(&["a", "b"]).await > 1);
}
