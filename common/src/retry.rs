//! Bounded exponential backoff for transient failures (spec.md §7: the
//! `Transient` taxonomy is "retried with bounded exponential backoff at the
//! lowest layer that can make progress").

use std::future::Future;
use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl BackoffPolicy {
    /// The Chain Oracle's default: 3 attempts, 0.1-0.8s.
    pub const CHAIN_ORACLE: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(800),
        factor: 2.0,
    };

    /// The artifact uploader's default: initial 1s, factor 2, up to 3 tries.
    pub const ARTIFACT_UPLOAD: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        factor: 2.0,
    };

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let jittered = rand::thread_rng().gen_range(0.0..=capped.max(0.001));
        Duration::from_secs_f64(jittered)
    }
}

/// Retries `op` under `policy`. `is_retryable` classifies an error as
/// transient (retry) or not (return immediately). The last error is
/// returned if all attempts are exhausted.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: BackoffPolicy,
    mut is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &'static str> = retry_with_backoff(
            BackoffPolicy {
                max_attempts: 5,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                factor: 1.0,
            },
            |_| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &'static str> = retry_with_backoff(
            BackoffPolicy::CHAIN_ORACLE,
            |_| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &'static str> = retry_with_backoff(
            BackoffPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                factor: 1.0,
            },
            |_| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>("still failing") }
            },
        )
        .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
