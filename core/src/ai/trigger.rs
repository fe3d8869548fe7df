/// When the room assistant should answer a user message
use crate::config::Config;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const MENTIONS: [&str; 3] = ["@ai", "@assistant", "@bot"];

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5 * 60);

pub struct TriggerPolicy {
    quiet_period: Duration,
    random_chance: f64,
    rng: StdRng,
}

impl TriggerPolicy {
    /// `random_chance` is clamped to `[0, 1]`. A seed makes the draw reproducible.
    pub fn new(quiet_period: Duration, random_chance: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            quiet_period,
            random_chance: random_chance.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.assistant_quiet_period,
            config.assistant_chance,
            config.assistant_seed,
        )
    }

    /// Never answers unprompted: no random draw and no quiet-period trigger
    pub fn mentions_only() -> Self {
        Self::new(Duration::MAX, 0.0, Some(0))
    }

    pub fn mentions_assistant(text: &str) -> bool {
        let lower = text.to_lowercase();
        MENTIONS.iter().any(|m| lower.contains(m))
    }

    pub fn is_question(text: &str) -> bool {
        text.contains('?')
    }

    /// Decide for `text` sent at `now`; `last_reply` is the newest assistant
    /// message in the view, if any.
    pub fn should_respond(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
        last_reply: Option<DateTime<Utc>>,
    ) -> bool {
        if Self::mentions_assistant(text) || Self::is_question(text) {
            return true;
        }
        if self.random_chance > 0.0 && self.rng.gen::<f64>() < self.random_chance {
            return true;
        }
        match last_reply {
            Some(at) => match (now - at).to_std() {
                Ok(elapsed) => elapsed > self.quiet_period,
                // Reply stamped in the future
                Err(_) => false,
            },
            None => self.quiet_period != Duration::MAX,
        }
    }
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD, 0.0, None)
    }
}
