/// Escalating moderation: allow, warn, block, auto-ban
use crate::chat_types::ModerationLevel;
use crate::config::Config;
use crate::moderation::classifier::ContentClassifier;
use crate::moderation::filter::{redact, TermFilter};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

pub const DEFAULT_BAN_THRESHOLD: u32 = 3;
pub const DEFAULT_WARNING_CAP: u32 = 10;

const WARN_MESSAGE: &str = "Please keep the conversation respectful";
const BLOCK_MESSAGE: &str = "Message blocked due to inappropriate content";
const CLASSIFIER_MESSAGE: &str = "Message blocked by content review";
const BANNED_MESSAGE: &str = "You have been banned from this session";

/// Per-user moderation state for the lifetime of the process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationSession {
    warning_count: u32,
    banned: bool,
}

impl ModerationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    pub fn is_banned(&self) -> bool {
        self.banned
    }

    fn record_warning(&mut self, cap: u32) {
        self.warning_count = (self.warning_count + 1).min(cap);
    }

    fn ban(&mut self) {
        self.banned = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Two or more flagged spans
    FlaggedTerms,
    /// Secondary classifier judged the text unsafe
    Classifier,
    /// Session already banned
    Banned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    Allow {
        clean_text: String,
    },
    Warn {
        clean_text: String,
        message: String,
    },
    Block {
        message: String,
        reason: BlockReason,
        auto_ban: bool,
    },
}

impl Decision {
    pub fn level(&self) -> ModerationLevel {
        match self {
            Decision::Allow { .. } => ModerationLevel::Clean,
            Decision::Warn { .. } => ModerationLevel::Mild,
            Decision::Block { .. } => ModerationLevel::Severe,
        }
    }

    /// Text to send, if the message may be sent at all
    pub fn clean_text(&self) -> Option<&str> {
        match self {
            Decision::Allow { clean_text } | Decision::Warn { clean_text, .. } => Some(clean_text),
            Decision::Block { .. } => None,
        }
    }

    pub fn is_auto_ban(&self) -> bool {
        matches!(self, Decision::Block { auto_ban: true, .. })
    }
}

/// Outcome of the lexical scan, before the session is touched
#[derive(Debug)]
enum Verdict {
    Clean(String),
    Mild(String),
    Severe(BlockReason),
}

pub struct ModerationPipeline {
    filter: TermFilter,
    ban_threshold: u32,
    warning_cap: u32,
    classifier_timeout: Duration,
}

impl ModerationPipeline {
    pub fn new(filter: TermFilter) -> Self {
        Self {
            filter,
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            warning_cap: DEFAULT_WARNING_CAP,
            classifier_timeout: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(TermFilter::new(&config.flagged_terms))
            .with_ban_threshold(config.ban_threshold)
            .with_warning_cap(config.warning_cap)
            .with_classifier_timeout(config.classifier_timeout)
    }

    pub fn with_ban_threshold(mut self, threshold: u32) -> Self {
        self.ban_threshold = threshold.max(1);
        self.warning_cap = self.warning_cap.max(self.ban_threshold);
        self
    }

    /// Cap on the warning counter; never below the ban threshold
    pub fn with_warning_cap(mut self, cap: u32) -> Self {
        self.warning_cap = cap.max(self.ban_threshold);
        self
    }

    pub fn with_classifier_timeout(mut self, classifier_timeout: Duration) -> Self {
        self.classifier_timeout = classifier_timeout;
        self
    }

    /// Lexical-only evaluation. Synchronous; mutates `session` on warn/block.
    pub fn evaluate(&self, raw: &str, session: &mut ModerationSession) -> Decision {
        if session.is_banned() {
            return banned();
        }
        let verdict = self.scan(raw);
        self.decide(verdict, session)
    }

    /// Lexical evaluation tightened by an optional secondary classifier.
    /// The classifier can only turn allow/warn into block; if it errors or
    /// times out the lexical verdict stands.
    pub async fn evaluate_with(
        &self,
        classifier: Option<&dyn ContentClassifier>,
        raw: &str,
        session: &mut ModerationSession,
    ) -> Decision {
        if session.is_banned() {
            return banned();
        }

        let mut verdict = self.scan(raw);
        let already_blocked = matches!(verdict, Verdict::Severe(_));
        if let Some(classifier) = classifier.filter(|_| !already_blocked) {
            match timeout(self.classifier_timeout, classifier.classify(raw)).await {
                Ok(Ok(result)) if !result.safe => {
                    info!("Classifier flagged message the term list allowed");
                    verdict = Verdict::Severe(BlockReason::Classifier);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Classifier failed, keeping lexical verdict: {}", e),
                Err(_) => warn!(
                    "Classifier timed out after {:?}, keeping lexical verdict",
                    self.classifier_timeout
                ),
            }
        }

        self.decide(verdict, session)
    }

    fn scan(&self, raw: &str) -> Verdict {
        let spans = self.filter.find_spans(raw);
        match spans.len() {
            0 => Verdict::Clean(raw.to_string()),
            1 => Verdict::Mild(redact(raw, &spans)),
            _ => Verdict::Severe(BlockReason::FlaggedTerms),
        }
    }

    fn decide(&self, verdict: Verdict, session: &mut ModerationSession) -> Decision {
        match verdict {
            Verdict::Clean(clean_text) => Decision::Allow { clean_text },
            Verdict::Mild(clean_text) => {
                session.record_warning(self.warning_cap);
                Decision::Warn {
                    clean_text,
                    message: WARN_MESSAGE.to_string(),
                }
            }
            Verdict::Severe(reason) => {
                session.record_warning(self.warning_cap);
                let auto_ban = session.warning_count() >= self.ban_threshold;
                if auto_ban {
                    warn!("Auto-ban after {} warnings", session.warning_count());
                    session.ban();
                }
                let message = match reason {
                    BlockReason::Classifier => CLASSIFIER_MESSAGE,
                    _ => BLOCK_MESSAGE,
                };
                Decision::Block {
                    message: message.to_string(),
                    reason,
                    auto_ban,
                }
            }
        }
    }
}

fn banned() -> Decision {
    Decision::Block {
        message: BANNED_MESSAGE.to_string(),
        reason: BlockReason::Banned,
        auto_ban: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChatError, Result};
    use crate::moderation::classifier::Classification;
    use crate::moderation::filter::DEFAULT_TERMS;
    use futures_util::future::{BoxFuture, FutureExt};

    fn pipeline() -> ModerationPipeline {
        ModerationPipeline::new(TermFilter::new(DEFAULT_TERMS))
    }

    struct FixedClassifier(Result<bool>);

    impl ContentClassifier for FixedClassifier {
        fn classify<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, Result<Classification>> {
            let result = match &self.0 {
                Ok(safe) => Ok(Classification { safe: *safe }),
                Err(e) => Err(ChatError::Classifier(e.to_string())),
            };
            async move { result }.boxed()
        }
    }

    struct StalledClassifier;

    impl ContentClassifier for StalledClassifier {
        fn classify<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, Result<Classification>> {
            futures_util::future::pending::<Result<Classification>>().boxed()
        }
    }

    #[test]
    fn test_clean_text_passes_unchanged() {
        let mut session = ModerationSession::new();
        let decision = pipeline().evaluate("hello there", &mut session);
        assert_eq!(
            decision,
            Decision::Allow {
                clean_text: "hello there".to_string()
            }
        );
        assert_eq!(decision.level(), ModerationLevel::Clean);
        assert_eq!(session.warning_count(), 0);
    }

    #[test]
    fn test_one_term_warns_and_masks() {
        let mut session = ModerationSession::new();
        let decision = pipeline().evaluate("this is spam", &mut session);
        match &decision {
            Decision::Warn { clean_text, .. } => assert_eq!(clean_text, "this is ****"),
            other => panic!("expected warn, got {:?}", other),
        }
        assert_eq!(decision.level(), ModerationLevel::Mild);
        assert_eq!(session.warning_count(), 1);
    }

    #[test]
    fn test_two_terms_block() {
        let mut session = ModerationSession::new();
        let decision = pipeline().evaluate("this is spam and spam", &mut session);
        assert!(matches!(
            decision,
            Decision::Block {
                reason: BlockReason::FlaggedTerms,
                auto_ban: false,
                ..
            }
        ));
        assert_eq!(decision.clean_text(), None);
        assert_eq!(session.warning_count(), 1);
    }

    #[test]
    fn test_leetspeak_decides_like_canonical() {
        let p = pipeline();
        let mut a = ModerationSession::new();
        let mut b = ModerationSession::new();
        let canonical = p.evaluate("what spam", &mut a);
        let leet = p.evaluate("what sp4m", &mut b);
        assert_eq!(canonical.level(), leet.level());
        assert_eq!(leet.clean_text(), Some("what ****"));
    }

    #[test]
    fn test_escalation_to_auto_ban() {
        let p = pipeline();
        let mut session = ModerationSession::new();

        p.evaluate("spam", &mut session);
        p.evaluate("noob", &mut session);
        p.evaluate("trash", &mut session);
        assert_eq!(session.warning_count(), 3);
        assert!(!session.is_banned());

        let decision = p.evaluate("spam spam", &mut session);
        assert!(decision.is_auto_ban());
        assert!(session.is_banned());
        let count = session.warning_count();

        for text in ["hello", "spam", "spam spam"] {
            let decision = p.evaluate(text, &mut session);
            assert!(matches!(
                decision,
                Decision::Block {
                    reason: BlockReason::Banned,
                    auto_ban: false,
                    ..
                }
            ));
        }
        assert_eq!(session.warning_count(), count);
    }

    #[test]
    fn test_block_reaching_threshold_bans() {
        let p = pipeline();
        let mut session = ModerationSession::new();
        p.evaluate("spam", &mut session);
        p.evaluate("spam", &mut session);
        let decision = p.evaluate("spam and trash", &mut session);
        assert!(decision.is_auto_ban());
    }

    #[test]
    fn test_warning_count_is_capped() {
        let p = pipeline().with_ban_threshold(100).with_warning_cap(2);
        let mut session = ModerationSession::new();
        for _ in 0..5 {
            p.evaluate("spam", &mut session);
        }
        // Cap never drops below the ban threshold
        assert_eq!(session.warning_count(), 5);

        let p = pipeline().with_warning_cap(4);
        let mut session = ModerationSession::new();
        for _ in 0..6 {
            p.evaluate("spam", &mut session);
        }
        assert_eq!(session.warning_count(), 4);
    }

    #[tokio::test]
    async fn test_classifier_only_tightens() {
        let p = pipeline();
        let unsafe_classifier = FixedClassifier(Ok(false));
        let mut session = ModerationSession::new();
        let decision = p
            .evaluate_with(Some(&unsafe_classifier), "hello", &mut session)
            .await;
        assert!(matches!(
            decision,
            Decision::Block {
                reason: BlockReason::Classifier,
                ..
            }
        ));
        assert_eq!(session.warning_count(), 1);

        let safe_classifier = FixedClassifier(Ok(true));
        let mut session = ModerationSession::new();
        let decision = p
            .evaluate_with(Some(&safe_classifier), "spam spam", &mut session)
            .await;
        assert!(matches!(
            decision,
            Decision::Block {
                reason: BlockReason::FlaggedTerms,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_classifier_failure_fails_open() {
        let p = pipeline();
        let broken = FixedClassifier(Err(ChatError::Classifier("down".to_string())));
        let mut session = ModerationSession::new();
        let decision = p.evaluate_with(Some(&broken), "hi all", &mut session).await;
        assert_eq!(decision.level(), ModerationLevel::Clean);

        let decision = p.evaluate_with(Some(&broken), "hi spam", &mut session).await;
        assert_eq!(decision.level(), ModerationLevel::Mild);
    }

    #[tokio::test]
    async fn test_classifier_timeout_fails_open() {
        let p = pipeline().with_classifier_timeout(Duration::from_millis(20));
        let mut session = ModerationSession::new();
        let decision = p
            .evaluate_with(Some(&StalledClassifier), "hello", &mut session)
            .await;
        assert_eq!(decision.level(), ModerationLevel::Clean);
    }
}
