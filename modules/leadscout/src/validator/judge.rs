use std::time::Duration;

use ai_client::{ChainOutcome, ProviderChain};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// A yes/no question for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgmentPrompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("model judgment timed out after {0:?}")]
    Timeout(Duration),

    #[error("no model provider answered: {0}")]
    Exhausted(String),
}

/// Natural-language classification used for ambiguous candidates.
#[async_trait]
pub trait ModelJudge: Send + Sync {
    async fn judge(&self, prompt: &JudgmentPrompt, timeout: Duration) -> Result<String, JudgeError>;
}

/// `ModelJudge` over an ordered provider chain (rotating Claude keys, then
/// the fallback provider).
pub struct ChainJudge {
    chain: ProviderChain,
}

impl ChainJudge {
    pub fn new(chain: ProviderChain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl ModelJudge for ChainJudge {
    async fn judge(&self, prompt: &JudgmentPrompt, timeout: Duration) -> Result<String, JudgeError> {
        match self.chain.run(&prompt.system, &prompt.user, timeout).await {
            ChainOutcome::Success { provider, text } => {
                debug!(provider = %provider, "Judgment answered");
                Ok(text)
            }
            ChainOutcome::Exhausted { failures } if failures.is_empty() => {
                Err(JudgeError::Exhausted("no providers configured".to_string()))
            }
            ChainOutcome::Exhausted { failures } => {
                let all_timed_out = failures
                    .iter()
                    .all(|f| matches!(f.error, ai_client::AiError::Timeout { .. }));
                if all_timed_out {
                    return Err(JudgeError::Timeout(timeout));
                }
                let summary = failures
                    .iter()
                    .map(|f| format!("{}: {}", f.provider, f.error))
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(JudgeError::Exhausted(summary))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ai_client::{AiError, TextModel};

    use super::*;

    struct Fixed(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl TextModel for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _system: &str, _user: &str) -> ai_client::Result<String> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(()) => Err(AiError::Quota {
                    provider: "fixed".into(),
                    message: "429".into(),
                }),
            }
        }
    }

    fn prompt() -> JudgmentPrompt {
        JudgmentPrompt {
            system: "s".into(),
            user: "u".into(),
        }
    }

    #[tokio::test]
    async fn success_returns_text() {
        let judge = ChainJudge::new(ProviderChain::new(vec![Arc::new(Fixed(Ok("YES")))]));
        let text = judge.judge(&prompt(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(text, "YES");
    }

    #[tokio::test]
    async fn exhausted_chain_is_an_error() {
        let judge = ChainJudge::new(ProviderChain::new(vec![Arc::new(Fixed(Err(())))]));
        let err = judge.judge(&prompt(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, JudgeError::Exhausted(msg) if msg.contains("fixed")));
    }

    #[tokio::test]
    async fn empty_chain_is_exhausted() {
        let judge = ChainJudge::new(ProviderChain::new(Vec::new()));
        assert!(judge.judge(&prompt(), Duration::from_secs(1)).await.is_err());
    }
}
