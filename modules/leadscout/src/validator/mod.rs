// Two-stage company validator.
//
// The heuristic stage scores rule-based signals and settles most candidates.
// Only a score of exactly 2 reaches the model, and a failed model call is
// settled by the caller's `JudgmentFailurePolicy`. Validation reads its
// inputs and returns an outcome; it never touches shared state.

mod judge;
mod signals;

pub use judge::{ChainJudge, JudgeError, JudgmentPrompt, ModelJudge};
pub use signals::{detect, SignalReport};

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, warn};

use leadscout_common::{
    JudgmentFailurePolicy, RawResult, SearchTask, ValidationOutcome, ValidationStage,
};

/// Longest page excerpt sent to the model, in characters.
pub const MAX_EXCERPT_CHARS: usize = 1500;
const ACCEPT_SCORE: i32 = 3;
const AMBIGUOUS_SCORE: i32 = 2;
/// Bound on one provider answering a judgment prompt.
pub const JUDGE_TIMEOUT: Duration = Duration::from_secs(30);

const JUDGE_SYSTEM_PROMPT: &str = "You classify web search results for a B2B prospecting team in \
Fortaleza, Brazil. Decide whether the page is the own website of a real local business that sells \
products or services. Directories, news articles, social-media profiles, marketplaces and blogs \
are not. Answer with a single word: YES or NO.";

/// One search result plus what is known about where it came from.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub result: &'a RawResult,
    pub task: &'a SearchTask,
    /// Landing-page HTML, when it could be fetched.
    pub page_html: Option<&'a str>,
}

impl Candidate<'_> {
    /// Text the signals are matched against.
    fn content(&self) -> String {
        match self.page_html {
            Some(html) => html.to_string(),
            None => format!("{}\n{}", self.result.title, self.result.description),
        }
    }

    /// Visible text for the model, at most `MAX_EXCERPT_CHARS` characters.
    pub fn excerpt(&self) -> String {
        let text = match self.page_html {
            Some(html) => visible_text(html),
            None => String::new(),
        };
        let text = if text.is_empty() {
            format!("{}\n{}", self.result.title, self.result.description)
        } else {
            text
        };
        text.chars().take(MAX_EXCERPT_CHARS).collect()
    }
}

fn visible_text(html: &str) -> String {
    let dom = Html::parse_document(html);
    let body = Selector::parse("body").unwrap();
    let skip = ["script", "style", "noscript", "template"];
    let Some(root) = dom.select(&body).next() else {
        return String::new();
    };
    let words: Vec<&str> = root
        .descendants()
        .filter_map(|node| node.value().as_text().map(|t| (node, t)))
        .filter(|(node, _)| {
            !node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|el| skip.contains(&el.name()))
            })
        })
        .flat_map(|(_, t)| t.split_whitespace())
        .collect();
    words.join(" ")
}

/// Where the heuristic stage landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeuristicVerdict {
    Accept,
    Reject,
    /// Score in the band only the model can settle.
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub signals: SignalReport,
    pub verdict: HeuristicVerdict,
}

impl Assessment {
    pub fn score(&self) -> i32 {
        self.signals.score()
    }
}

/// Heuristic stage. Any negative signal rejects; otherwise the score decides.
pub fn assess(candidate: &Candidate<'_>) -> Assessment {
    let signals = detect(
        &candidate.result.url,
        &candidate.result.title,
        &candidate.content(),
    );
    let score = signals.score();
    let verdict = if !signals.negative.is_empty() {
        HeuristicVerdict::Reject
    } else if score >= ACCEPT_SCORE {
        HeuristicVerdict::Accept
    } else if score == AMBIGUOUS_SCORE {
        HeuristicVerdict::Ambiguous
    } else {
        HeuristicVerdict::Reject
    };
    Assessment { signals, verdict }
}

pub struct Validator {
    judge: Arc<dyn ModelJudge>,
    policy: JudgmentFailurePolicy,
    judge_timeout: Duration,
}

impl Validator {
    pub fn new(judge: Arc<dyn ModelJudge>, policy: JudgmentFailurePolicy) -> Self {
        Self {
            judge,
            policy,
            judge_timeout: JUDGE_TIMEOUT,
        }
    }

    pub async fn validate(&self, candidate: &Candidate<'_>) -> ValidationOutcome {
        let assessment = assess(candidate);
        let score = assessment.score();
        let labels = assessment.signals.labels();

        match assessment.verdict {
            HeuristicVerdict::Reject if !assessment.signals.negative.is_empty() => {
                let negatives = assessment.signals.negative.join(", ");
                debug!(url = %candidate.result.url, negatives = %negatives, "Rejected by negative signals");
                ValidationOutcome {
                    accept: false,
                    reason: format!("negative signals: {negatives}"),
                    confidence: (70 + 10 * assessment.signals.negative.len()).min(95) as u8,
                    stage: ValidationStage::Heuristic,
                    score,
                    signals: labels,
                }
            }
            HeuristicVerdict::Reject => ValidationOutcome {
                accept: false,
                reason: format!("not enough business signals (score {score})"),
                confidence: 60,
                stage: ValidationStage::Heuristic,
                score,
                signals: labels,
            },
            HeuristicVerdict::Accept => ValidationOutcome {
                accept: true,
                reason: format!("business signals: {}", assessment.signals.positive.join(", ")),
                confidence: (50 + 10 * score).min(95) as u8,
                stage: ValidationStage::Heuristic,
                score,
                signals: labels,
            },
            HeuristicVerdict::Ambiguous => self.judge_candidate(candidate, score, labels).await,
        }
    }

    async fn judge_candidate(
        &self,
        candidate: &Candidate<'_>,
        score: i32,
        signals: Vec<String>,
    ) -> ValidationOutcome {
        let prompt = judgment_prompt(candidate);
        match self.judge.judge(&prompt, self.judge_timeout).await {
            Ok(answer) => {
                let accept = is_affirmative(&answer);
                debug!(url = %candidate.result.url, accept, "Model judgment");
                ValidationOutcome {
                    accept,
                    reason: if accept {
                        "model judged it a business website".to_string()
                    } else {
                        "model judged it not a business website".to_string()
                    },
                    confidence: 75,
                    stage: ValidationStage::Model,
                    score,
                    signals,
                }
            }
            Err(e) => {
                let accept = self.policy == JudgmentFailurePolicy::Accept;
                warn!(
                    url = %candidate.result.url,
                    policy = ?self.policy,
                    error = %e,
                    "Model judgment failed, applying failure policy"
                );
                ValidationOutcome {
                    accept,
                    reason: format!("model unavailable ({e}), policy {:?}", self.policy),
                    confidence: 40,
                    stage: ValidationStage::ModelFallback,
                    score,
                    signals,
                }
            }
        }
    }
}

/// `YES` at the start of the answer, any case.
pub fn is_affirmative(answer: &str) -> bool {
    answer
        .trim_start()
        .get(..3)
        .is_some_and(|head| head.eq_ignore_ascii_case("yes"))
}

pub fn judgment_prompt(candidate: &Candidate<'_>) -> JudgmentPrompt {
    let user = format!(
        "Business type: {}\nNeighborhood: {}\nSearch term: {}\nURL: {}\nTitle: {}\n\nPage excerpt:\n{}\n\n\
Is this the website of a real local business? Answer YES or NO.",
        candidate.task.business_type,
        candidate.task.neighborhood,
        candidate.task.term,
        candidate.result.url,
        candidate.result.title,
        candidate.excerpt(),
    );
    JudgmentPrompt {
        system: JUDGE_SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{raw_result, MockModel};
    use leadscout_common::Strategy;

    fn task() -> SearchTask {
        SearchTask {
            term: "dentista Aldeota fortaleza".into(),
            neighborhood: "Aldeota".into(),
            business_type: "dentista".into(),
            strategy: Strategy::GmapsLocal,
        }
    }

    fn validator(model: MockModel, policy: JudgmentFailurePolicy) -> Validator {
        Validator::new(Arc::new(model), policy)
    }

    // services + whatsapp = 2
    const AMBIGUOUS: &str = "Agende sua consulta pelo WhatsApp";

    #[tokio::test]
    async fn social_results_are_rejected_before_scoring() {
        let task = task();
        let results = [
            raw_result("https://www.instagram.com/sorrisoaldeota/", "Sorriso Aldeota", AMBIGUOUS),
            raw_result("https://clinicaa.com.br", "Clínica A", "Tratamentos, (85) 3222-1234, Rua Canuto de Aguiar"),
            raw_result("https://facebook.com/odontofor", "Odonto For", AMBIGUOUS),
            raw_result("https://clinicab.com.br", "Clínica B", "Dentista"),
            raw_result("https://clinicac.com.br", "Clínica C", AMBIGUOUS),
        ];
        let model = MockModel::answering("YES");
        let v = validator(model.clone(), JudgmentFailurePolicy::Reject);

        let mut outcomes = Vec::new();
        for r in &results {
            let c = Candidate { result: r, task: &task, page_html: None };
            outcomes.push(v.validate(&c).await);
        }

        for i in [0, 2] {
            assert!(!outcomes[i].accept);
            assert_eq!(outcomes[i].stage, ValidationStage::Heuristic);
            assert!(outcomes[i].signals.contains(&"-social".to_string()));
        }
        for i in [1, 3, 4] {
            assert!(outcomes[i].signals.iter().all(|s| !s.starts_with('-')));
        }
        assert!(outcomes[1].accept);
        assert!(!outcomes[3].accept);
        assert_eq!(outcomes[4].stage, ValidationStage::Model);
        // Only the ambiguous one reached the model.
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn ambiguous_candidate_follows_model_answer() {
        let task = task();
        let r = raw_result("https://clinicac.com.br", "Clínica C", AMBIGUOUS);
        let c = Candidate { result: &r, task: &task, page_html: None };

        let yes = validator(MockModel::answering("yes, it is"), JudgmentFailurePolicy::Reject);
        assert!(yes.validate(&c).await.accept);

        let no = validator(MockModel::answering("NO"), JudgmentFailurePolicy::Accept);
        let outcome = no.validate(&c).await;
        assert!(!outcome.accept);
        assert_eq!(outcome.stage, ValidationStage::Model);
    }

    #[tokio::test]
    async fn model_failure_applies_declared_policy() {
        let task = task();
        let r = raw_result("https://clinicac.com.br", "Clínica C", AMBIGUOUS);
        let c = Candidate { result: &r, task: &task, page_html: None };

        let reject = validator(MockModel::failing(), JudgmentFailurePolicy::Reject);
        let outcome = reject.validate(&c).await;
        assert!(!outcome.accept);
        assert_eq!(outcome.stage, ValidationStage::ModelFallback);

        let accept = validator(MockModel::failing(), JudgmentFailurePolicy::Accept);
        let outcome = accept.validate(&c).await;
        assert!(outcome.accept);
        assert_eq!(outcome.stage, ValidationStage::ModelFallback);
    }

    #[tokio::test]
    async fn landing_page_html_replaces_snippet() {
        let task = task();
        let r = raw_result("https://clinicad.com.br", "Clínica D", "");
        let html = r#"<html><body>
            <p>Fale conosco: contato@clinicad.com.br</p>
            <p>Rua Silva Paulet, 100</p>
            <script>var tel = 1;</script>
        </body></html>"#;
        let c = Candidate { result: &r, task: &task, page_html: Some(html) };
        let outcome = validator(MockModel::failing(), JudgmentFailurePolicy::Reject)
            .validate(&c)
            .await;
        assert!(outcome.accept);
        assert_eq!(outcome.stage, ValidationStage::Heuristic);
        assert!(!c.excerpt().contains("var tel"));
    }

    #[test]
    fn heuristic_is_deterministic() {
        let task = task();
        let r = raw_result("https://clinicac.com.br", "Clínica C", AMBIGUOUS);
        let c = Candidate { result: &r, task: &task, page_html: None };
        let a = assess(&c);
        assert_eq!(a, assess(&c));
        assert_eq!(a.score(), 2);
        assert_eq!(a.verdict, HeuristicVerdict::Ambiguous);
    }

    #[test]
    fn excerpt_is_bounded() {
        let task = task();
        let r = raw_result("https://x.com.br", "X", "");
        let html = format!("<html><body><p>{}</p></body></html>", "ç".repeat(5000));
        let c = Candidate { result: &r, task: &task, page_html: Some(&html) };
        assert_eq!(c.excerpt().chars().count(), MAX_EXCERPT_CHARS);
        assert!(judgment_prompt(&c).user.contains("Business type: dentista"));
    }

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("YES"));
        assert!(is_affirmative("  yes."));
        assert!(is_affirmative("Yes, a dental clinic"));
        assert!(!is_affirmative("NO"));
        assert!(!is_affirmative("Y"));
        assert!(!is_affirmative("Sim"));
        assert!(!is_affirmative("ção"));
    }
}
