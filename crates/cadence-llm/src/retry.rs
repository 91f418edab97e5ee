use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use cadence_core::config::RetryConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::AgentCapability;
use cadence_core::types::AgentInvocation;

/// A capability that retries transient failures of the wrapped one.
pub struct RetryingCapability {
    inner: Arc<dyn AgentCapability>,
    retry_config: RetryConfig,
}

impl RetryingCapability {
    pub fn new(inner: Arc<dyn AgentCapability>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

/// Status code of a `HTTP <code>: <body>` capability error.
fn http_status(message: &str) -> Option<u16> {
    let (code, _) = message.strip_prefix("HTTP ")?.split_once(':')?;
    code.trim().parse().ok()
}

fn is_retryable(e: &CadenceError) -> bool {
    match e {
        CadenceError::Capability { message, .. } => match http_status(message) {
            // The response body is never inspected.
            Some(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            None => {
                let lower = message.to_ascii_lowercase();
                lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection")
            }
        },
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl AgentCapability for RetryingCapability {
    fn invoke(&self, invocation: AgentInvocation) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.invoke(invocation.clone()).await {
                    Ok(output) => return Ok(output),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            agent = %invocation.agent.name,
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying agent invocation"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use cadence_core::types::Agent;

    struct Flaky {
        failures_left: AtomicU32,
        message: &'static str,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicU32::new(failures),
                message,
                calls: AtomicU32::new(0),
            })
        }
    }

    impl AgentCapability for Flaky {
        fn invoke(&self, invocation: AgentInvocation) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.failures_left.load(Ordering::SeqCst) > 0 {
                    self.failures_left.fetch_sub(1, Ordering::SeqCst);
                    return Err(CadenceError::capability(invocation.agent.name, self.message));
                }
                Ok("done".to_string())
            })
        }
    }

    fn invocation() -> AgentInvocation {
        AgentInvocation {
            workflow_id: "wf".into(),
            agent: Agent {
                id: "a".into(),
                workflow_id: "wf".into(),
                name: "Researcher".into(),
                role: String::new(),
                model: "gpt-4o".into(),
                instructions: String::new(),
                capabilities: vec![],
                output_schema: None,
            },
            input: "x".into(),
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let flaky = Flaky::new(2, "HTTP 503: overloaded");
        let capability = RetryingCapability::new(flaky.clone(), fast());
        assert_eq!(capability.invoke(invocation()).await.unwrap(), "done");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let flaky = Flaky::new(10, "HTTP 429: slow down");
        let capability = RetryingCapability::new(flaky.clone(), fast());
        assert!(capability.invoke(invocation()).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let flaky = Flaky::new(1, "HTTP 401: bad key");
        let capability = RetryingCapability::new(flaky.clone(), fast());
        assert!(capability.invoke(invocation()).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_digits_in_body_do_not_trigger_retry() {
        let flaky = Flaky::new(1, "HTTP 400: prompt is 4500 tokens, limit 502 per connection");
        let capability = RetryingCapability::new(flaky.clone(), fast());
        assert!(capability.invoke(invocation()).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryable_classification() {
        let err = |m: &str| CadenceError::capability("A", m);
        assert!(is_retryable(&err("HTTP 500: oops")));
        assert!(is_retryable(&err("HTTP 504: gateway timeout")));
        assert!(is_retryable(&err("request failed: operation timed out")));
        assert!(is_retryable(&err("request failed: connection refused")));
        assert!(!is_retryable(&err("HTTP 404: model 500b not found")));
        assert!(!is_retryable(&err("malformed response: expected value")));
        assert!(!is_retryable(&CadenceError::Validation("HTTP 503: x".into())));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(4800));
        assert!(d >= Duration::from_millis(3200));
    }
}
