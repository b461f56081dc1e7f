//! Applies a [`RetryPolicy`] to generation calls.

use tracing::{info, warn};
use tsuzuri_core::{
    GenerateRequest, GenerateResponse, GenerationError, Generator, RetryPolicy,
};

/// Calls `generator` until it succeeds, the failure is ineligible, or the
/// policy's attempts run out.
///
/// The returned [`GenerationError`] wraps the failure of the last call.
pub async fn generate_with_retry(
    generator: &dyn Generator,
    request: &GenerateRequest,
    policy: &RetryPolicy,
) -> Result<GenerateResponse, GenerationError> {
    let mut attempt = 0;
    loop {
        match generator.generate(request).await {
            Ok(response) => return Ok(response),
            Err(error) if policy.should_retry(attempt, &error) => {
                let delay = policy.delay_for_attempt(attempt);
                info!(
                    "Generation failed ({}), retrying in {:?} ({}/{})",
                    error,
                    delay,
                    attempt + 2,
                    policy.max_attempts()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                warn!("Generation failed after {} attempt(s): {}", attempt + 1, error);
                return Err(GenerationError {
                    attempts: attempt + 1,
                    source: error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tsuzuri_core::BackendError;

    #[derive(Debug)]
    struct FlakyGenerator {
        calls: AtomicU32,
        failures: u32,
        error: BackendError,
    }

    impl FlakyGenerator {
        fn new(failures: u32, error: BackendError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                error,
            }
        }
    }

    #[async_trait]
    impl Generator for FlakyGenerator {
        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> Result<GenerateResponse, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(GenerateResponse::text("ok"))
            }
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::exponential(attempts, Duration::from_millis(1), 2, [429, 503])
            .expect("valid policy")
    }

    fn unavailable() -> BackendError {
        BackendError::Status {
            code: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_always_failing_makes_exactly_max_attempts() {
        let generator = FlakyGenerator::new(u32::MAX, unavailable());

        let error = generate_with_retry(&generator, &GenerateRequest::new("p"), &policy(3))
            .await
            .unwrap_err();

        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.attempts, 3);
        assert_eq!(error.source, unavailable());
    }

    #[tokio::test]
    async fn test_ineligible_status_fails_on_first_attempt() {
        let bad_request = BackendError::Status {
            code: 400,
            message: "malformed".to_string(),
        };
        let generator = FlakyGenerator::new(u32::MAX, bad_request.clone());

        let error = generate_with_retry(&generator, &GenerateRequest::new("p"), &policy(5))
            .await
            .unwrap_err();

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(error.attempts, 1);
        assert_eq!(error.source, bad_request);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let generator = FlakyGenerator::new(2, unavailable());

        let response = generate_with_retry(&generator, &GenerateRequest::new("p"), &policy(3))
            .await
            .expect("third attempt succeeds");

        assert_eq!(response.text, "ok");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }
}
