//! Async retry with exponential backoff

use std::time::Duration;

/// Retry an async operation with exponential backoff, retrying only while
/// `retriable` holds for the error.
///
/// Returns the operation's value on success, or `Err((error, attempts))`
/// after the final attempt fails (or the error is not retriable).
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    max_attempts: u32,
    base_delay_ms: u64,
    retriable: R,
    mut operation: F,
) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempts >= max_attempts || !retriable(&e) {
                    return Err((e, attempts));
                }
                let delay = Duration::from_millis(base_delay_ms * 2_u64.pow(attempts - 1));
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_success_on_first_try() {
        let result = retry_with_backoff(3, 10, |_| true, || async { Ok::<_, &str>(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let attempts = RefCell::new(0);
        let result = retry_with_backoff(3, 10, |_| true, || {
            *attempts.borrow_mut() += 1;
            let n = *attempts.borrow();
            async move {
                if n < 2 {
                    Err("transient error")
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(*attempts.borrow(), 2);
    }

    #[tokio::test]
    async fn test_failure_after_max_retries() {
        let result =
            retry_with_backoff(3, 10, |_| true, || async { Err::<(), _>("persistent error") })
                .await;
        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "persistent error");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retriable_error_fails_fast() {
        let result = retry_with_backoff(
            5,
            10,
            |e: &&str| *e != "fatal",
            || async { Err::<(), _>("fatal") },
        )
        .await;
        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "fatal");
        assert_eq!(attempts, 1);
    }
}
