use crate::error::{CloudError, CloudResult};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

pub const MAX_ATTEMPTS: u32 = 3;

/// Runs `call` up to [`MAX_ATTEMPTS`] times.
///
/// Only a transport failure whose message names a bad file descriptor is
/// retried; anything else is returned on first occurrence. Attempt `n`
/// (0-based) is followed by a pause of `n + 1` seconds.
pub async fn with_retry<T, F, Fut>(label: &str, mut call: F) -> CloudResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CloudResult<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if retryable(&e) && attempt + 1 < MAX_ATTEMPTS => {
                let wait = Duration::from_secs(u64::from(attempt) + 1);
                warn!(
                    "[{label}] transient transport failure (attempt {}/{MAX_ATTEMPTS}), retrying in {}s: {e}",
                    attempt + 1,
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                error!("[{label}] call failed: {e}");
                return Err(e);
            }
        }
    }
}

fn retryable(err: &CloudError) -> bool {
    err.is_transient_descriptor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn bad_fd() -> CloudError {
        CloudError::Transport("error sending request: Bad file descriptor (os error 9)".into())
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_linear_backoff() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();
        let out = with_retry("test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(bad_fd())
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(out.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out: CloudResult<()> = with_retry("test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CloudError::Transport("connection refused".into()))
        })
        .await;

        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out: CloudResult<()> = with_retry("test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CloudError::api(500, "UnknownError", "Bad file descriptor"))
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_returns_last_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out: CloudResult<()> = with_retry("test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Err(CloudError::Transport(format!("Bad file descriptor #{n}")))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert_eq!(out.unwrap_err(), CloudError::Transport("Bad file descriptor #2".into()));
    }
}
