//! Bounded exponential-backoff retry, composed over any async embedding
//! call rather than built into each provider (§9 REDESIGN FLAG: composition
//! over inheritance — a provider does not need to reimplement backoff).

use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a>>;

pub struct Batcher {
    max_retries: u32,
    base_delay: Duration,
}

impl Batcher {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(200),
        }
    }

    /// Runs `attempt` up to `max_retries + 1` times. Only
    /// `Error::ProviderTransient` is retried; any other error (including
    /// `Error::ProviderPermanent`) returns immediately.
    pub async fn run<'a, F>(&self, mut attempt: F) -> Result<Vec<Vec<f32>>>
    where
        F: FnMut() -> EmbedFuture<'a>,
    {
        let mut tries = 0u32;
        loop {
            match attempt().await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() && tries < self.max_retries => {
                    let delay = self.base_delay * 2u32.saturating_pow(tries);
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_transient_errors_up_to_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let batcher = Batcher::new(2);
        let calls_clone = calls.clone();
        let result = batcher
            .run(move || {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Error::ProviderTransient {
                            provider: "test".into(),
                            message: "retry me".into(),
                        })
                    } else {
                        Ok(vec![vec![1.0]])
                    }
                })
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_permanent_error() {
        let batcher = Batcher::new(5);
        let result = batcher
            .run(|| {
                Box::pin(async {
                    Err(Error::ProviderPermanent {
                        provider: "test".into(),
                        message: "broken".into(),
                    })
                })
            })
            .await;
        assert!(result.is_err());
    }
}
