// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use futures::Future;
use rand::{thread_rng, Rng};
use tonic::{Code, Status};

pub fn status_is_retryable(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::Aborted
            | Code::Cancelled
            | Code::DeadlineExceeded
            | Code::Internal
            | Code::ResourceExhausted
            | Code::Unavailable
            | Code::Unknown
    )
}

///
/// Retry an operation using jittered exponential back-off to delay between attempts. The
/// callable receives the attempt number (0 for the initial call) so that it can reset any
/// partially consumed state before retrying.
///
#[inline]
pub async fn retry_call<T, E, C, F, Fut, G>(client: C, f: F, is_retryable: G) -> Result<T, E>
where
    C: Clone,
    F: Fn(C, u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    G: Fn(&E) -> bool,
{
    const INTERVAL_DURATION: Duration = Duration::from_millis(20);
    const MAX_ATTEMPTS: u32 = 3;
    const MAX_BACKOFF_DURATION: Duration = Duration::from_secs(5);

    let mut last_error: Option<E> = None;

    for attempt in 0..MAX_ATTEMPTS {
        // Delay before the next send attempt if this is a retry.
        if attempt > 0 {
            let multiplier = thread_rng().gen_range(0..2_u32.pow(attempt) + 1);
            let sleep_time = INTERVAL_DURATION * multiplier;
            let sleep_time = sleep_time.min(MAX_BACKOFF_DURATION);
            tokio::time::sleep(sleep_time).await;
        }

        let client2 = client.clone();
        match f(client2, attempt).await {
            Ok(r) => return Ok(r),
            Err(err) => {
                if is_retryable(&err) {
                    last_error = Some(err);
                } else {
                    return Err(err);
                }
            }
        }
    }

    Err(last_error.unwrap())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tonic::Status;

    use super::{retry_call, status_is_retryable};

    #[test]
    fn deadline_exceeded_and_cancelled_are_transient() {
        for status in [
            Status::deadline_exceeded("Upstream took too long"),
            Status::cancelled("Upstream hung up"),
            Status::unavailable("Connection refused"),
        ] {
            assert!(status_is_retryable(&status), "{status:?}");
        }
        for status in [
            Status::not_found("Blob does not exist"),
            Status::invalid_argument("Malformed digest"),
        ] {
            assert!(!status_is_retryable(&status), "{status:?}");
        }
    }

    #[tokio::test]
    async fn returns_the_first_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result: Result<usize, Status> = retry_call(
            attempts.clone(),
            |attempts, _| async move { Ok(attempts.fetch_add(1, Ordering::SeqCst)) },
            status_is_retryable,
        )
        .await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result: Result<usize, Status> = retry_call(
            attempts.clone(),
            |attempts, attempt| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(Status::unavailable("try again"))
                } else {
                    Ok(42)
                }
            },
            status_is_retryable,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result: Result<usize, Status> = retry_call(
            attempts.clone(),
            |attempts, _| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Status::not_found("no such blob"))
            },
            status_is_retryable,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn surfaces_the_last_error_when_exhausted() {
        let result: Result<usize, Status> = retry_call(
            (),
            |_, attempt| async move { Err(Status::unavailable(format!("attempt {attempt}"))) },
            status_is_retryable,
        )
        .await;
        assert_eq!(result.unwrap_err().message(), "attempt 2");
    }
}
