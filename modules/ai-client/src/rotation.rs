//! Credential rotation and ordered provider fallback.
//!
//! `RotatingProvider` owns its round-robin cursor, so two pools never share
//! rotation state. `ProviderChain` tries providers in order and reports a
//! typed `ChainOutcome` instead of an error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{AiError, Result};
use crate::traits::TextModel;

/// Round-robin pool of clients for the same provider, one per credential.
pub struct RotatingProvider {
    name: String,
    members: Vec<Arc<dyn TextModel>>,
    cursor: AtomicUsize,
    /// Bound on each credential's call, so a hung key still rotates.
    member_timeout: Option<Duration>,
}

impl RotatingProvider {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn TextModel>>) -> Self {
        Self {
            name: name.into(),
            members,
            cursor: AtomicUsize::new(0),
            member_timeout: None,
        }
    }

    pub fn with_member_timeout(mut self, timeout: Duration) -> Self {
        self.member_timeout = Some(timeout);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    async fn call_member(&self, member: &dyn TextModel, system: &str, user: &str) -> Result<String> {
        let Some(limit) = self.member_timeout else {
            return member.complete(system, user).await;
        };
        let started = Instant::now();
        match tokio::time::timeout(limit, member.complete(system, user)).await {
            Ok(result) => result,
            Err(_) => Err(AiError::Timeout {
                provider: member.name().to_string(),
                elapsed: started.elapsed(),
            }),
        }
    }
}

#[async_trait]
impl TextModel for RotatingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// Starts at the next credential in rotation and walks the pool once.
    /// Invalid responses are returned immediately since another key would
    /// get the same answer.
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let n = self.members.len();
        if n == 0 {
            return Err(AiError::Exhausted {
                provider: self.name.clone(),
                attempts: 0,
            });
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..n {
            let idx = (start + offset) % n;
            let member = &self.members[idx];
            match self.call_member(member.as_ref(), system, user).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_rotatable() => {
                    warn!(
                        provider = %self.name,
                        credential = idx,
                        error = %e,
                        "Credential failed, rotating"
                    );
                    // Skip past the failing key for the next caller too.
                    self.cursor.store(idx + 1, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
        }

        Err(AiError::Exhausted {
            provider: self.name.clone(),
            attempts: n,
        })
    }
}

/// One provider's failure inside a chain run.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: AiError,
}

/// Result of trying an ordered list of providers.
#[derive(Debug)]
pub enum ChainOutcome {
    Success { provider: String, text: String },
    Exhausted { failures: Vec<ProviderFailure> },
}

/// Ordered list of providers tried in sequence, each under a timeout.
pub struct ProviderChain {
    providers: Vec<Arc<dyn TextModel>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn TextModel>>) -> Self {
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn run(&self, system: &str, user: &str, timeout: Duration) -> ChainOutcome {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let started = Instant::now();
            let result = tokio::time::timeout(timeout, provider.complete(system, user)).await;
            let error = match result {
                Ok(Ok(text)) => {
                    if !failures.is_empty() {
                        info!(provider = provider.name(), "Fallback provider succeeded");
                    }
                    return ChainOutcome::Success {
                        provider: provider.name().to_string(),
                        text,
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => AiError::Timeout {
                    provider: provider.name().to_string(),
                    elapsed: started.elapsed(),
                },
            };
            warn!(provider = provider.name(), error = %error, "Provider failed, trying next");
            failures.push(ProviderFailure {
                provider: provider.name().to_string(),
                error,
            });
        }

        ChainOutcome::Exhausted { failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted model: pops the next response on each call.
    struct Scripted {
        name: String,
        responses: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &str, responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                responses: Mutex::new(responses.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextModel for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("YES".to_string()))
        }
    }

    fn quota(provider: &str) -> AiError {
        AiError::Quota {
            provider: provider.into(),
            message: "429".into(),
        }
    }

    #[tokio::test]
    async fn rotation_skips_exhausted_key() {
        let a = Scripted::new("a", vec![Err(quota("a"))]);
        let b = Scripted::new("b", vec![Ok("YES".into())]);
        let pool = RotatingProvider::new("claude", vec![a.clone(), b.clone()]);

        assert_eq!(pool.complete("s", "u").await.unwrap(), "YES");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rotation_round_robins_between_calls() {
        let a = Scripted::new("a", vec![]);
        let b = Scripted::new("b", vec![]);
        let pool = RotatingProvider::new("claude", vec![a.clone(), b.clone()]);

        pool.complete("s", "u").await.unwrap();
        pool.complete("s", "u").await.unwrap();
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rotation_reports_exhaustion() {
        let a = Scripted::new("a", vec![Err(quota("a"))]);
        let pool = RotatingProvider::new("claude", vec![a]);
        let err = pool.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, AiError::Exhausted { attempts: 1, .. }));
    }

    struct Hanging;

    #[async_trait]
    impl TextModel for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_key_times_out_and_rotates() {
        let b = Scripted::new("b", vec![Ok("YES".into())]);
        let pool = RotatingProvider::new("claude", vec![Arc::new(Hanging), b.clone()])
            .with_member_timeout(Duration::from_secs(5));
        assert_eq!(pool.len(), 2);
        let chain = ProviderChain::new(vec![Arc::new(pool)]);

        match chain.run("s", "u", Duration::from_secs(30)).await {
            ChainOutcome::Success { provider, text } => {
                assert_eq!(provider, "claude");
                assert_eq!(text, "YES");
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chain_falls_back_to_secondary() {
        let primary = Scripted::new("claude", vec![Err(quota("claude"))]);
        let secondary = Scripted::new("openai", vec![Ok("NO".into())]);
        let chain = ProviderChain::new(vec![primary, secondary]);

        match chain.run("s", "u", Duration::from_secs(1)).await {
            ChainOutcome::Success { provider, text } => {
                assert_eq!(provider, "openai");
                assert_eq!(text, "NO");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chain_exhausted_lists_every_failure() {
        let primary = Scripted::new("claude", vec![Err(quota("claude"))]);
        let chain = ProviderChain::new(vec![primary]);
        match chain.run("s", "u", Duration::from_secs(1)).await {
            ChainOutcome::Exhausted { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].provider, "claude");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_chain_is_exhausted() {
        let chain = ProviderChain::new(vec![]);
        assert!(chain.is_empty());
        assert!(matches!(
            chain.run("s", "u", Duration::from_secs(1)).await,
            ChainOutcome::Exhausted { .. }
        ));
    }
}
