/// Content moderation: lexical filter, escalation policy, rate limiting
pub mod classifier;
pub mod filter;
pub mod markup;
pub mod normalize;
pub mod pipeline;
pub mod rate_limit;

pub use classifier::{Classification, ContentClassifier};
pub use filter::{redact, Span, TermFilter, DEFAULT_TERMS};
pub use markup::{find_markup, Markup};
pub use pipeline::{BlockReason, Decision, ModerationPipeline, ModerationSession};
pub use rate_limit::RateLimiter;
