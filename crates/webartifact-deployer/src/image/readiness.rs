use std::time::Duration;

use tracing::{debug, instrument};

use super::{BuildId, ImageProvider, NotReadySnafu, Result};

/// Bounded, exponentially backed-off polling of [`ImageProvider::is_ready`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Maximum number of readiness checks. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ReadinessPolicy {
    /// Returns the delay slept after the failed check number `attempt`
    /// (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Waits until `build_id` is reported ready, failing once all attempts
    /// are used up. Errors of the readiness check itself are returned
    /// immediately.
    #[instrument(skip(self, provider, build_id), fields(%build_id))]
    pub async fn wait_until_ready(
        &self,
        provider: &dyn ImageProvider,
        build_id: &BuildId,
    ) -> Result<()> {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            if provider.is_ready(build_id).await? {
                debug!(attempt, "image is ready");
                return Ok(());
            }

            if attempt < attempts {
                let delay = self.backoff(attempt);
                debug!(attempt, delay = %humantime::format_duration(delay), "image not ready yet");
                tokio::time::sleep(delay).await;
            }
        }

        NotReadySnafu {
            build_id: build_id.clone(),
            attempts,
        }
        .fail()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;
    use crate::{image::Error, memory::InMemoryImageProvider};

    fn fast_policy(max_attempts: u32) -> ReadinessPolicy {
        ReadinessPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[rstest]
    #[case(1, Duration::from_millis(250))]
    #[case(2, Duration::from_millis(500))]
    #[case(3, Duration::from_secs(1))]
    #[case(6, Duration::from_secs(5))]
    #[case(40, Duration::from_secs(5))]
    fn backoff_doubles_up_to_max(#[case] attempt: u32, #[case] expected: Duration) {
        assert_eq!(ReadinessPolicy::default().backoff(attempt), expected);
    }

    #[tokio::test]
    async fn waits_until_ready() {
        let provider = InMemoryImageProvider::new().with_ready_after(3);
        let build_id = provider
            .build("acme", "shop", "1.0", &PathBuf::from("shop.war"))
            .await
            .unwrap();

        fast_policy(5)
            .wait_until_ready(&provider, &build_id)
            .await
            .unwrap();
        assert_eq!(provider.readiness_checks(&build_id), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let provider = InMemoryImageProvider::new().with_ready_after(10);
        let build_id = provider
            .build("acme", "shop", "1.0", &PathBuf::from("shop.war"))
            .await
            .unwrap();

        let err = fast_policy(2)
            .wait_until_ready(&provider, &build_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady { attempts: 2, .. }));
        assert_eq!(provider.readiness_checks(&build_id), 2);
    }
}
