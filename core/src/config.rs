/// Configuration management
use crate::ai::trigger::DEFAULT_QUIET_PERIOD;
use crate::chat_types::MAX_CONTENT_LEN;
use crate::error::{ChatError, Result};
use crate::moderation::filter::DEFAULT_TERMS;
use crate::moderation::pipeline::{DEFAULT_BAN_THRESHOLD, DEFAULT_WARNING_CAP};
use crate::store::DEFAULT_SUBSCRIBE_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Chat client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Room to join on startup
    pub room_id: String,

    /// Preferred display name (random `Adjective Animal` when absent)
    pub display_name: Option<String>,

    /// Directory for the local message database (defaults to `.anonchat`)
    pub data_dir: Option<PathBuf>,

    /// Most recent messages kept in a room view
    pub view_limit: usize,

    pub max_message_len: usize,

    /// Clock gap tolerated when matching echoes to optimistic entries
    pub dedup_tolerance: Duration,

    /// Warnings before the session is auto-banned
    pub ban_threshold: u32,

    pub warning_cap: u32,

    pub max_messages_per_minute: usize,

    pub classifier_timeout: Duration,

    /// Probability of an unprompted assistant reply
    pub assistant_chance: f64,

    pub assistant_seed: Option<u64>,

    pub assistant_quiet_period: Duration,

    pub flagged_terms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            room_id: "lobby".to_string(),
            display_name: None,
            data_dir: None,
            view_limit: DEFAULT_SUBSCRIBE_LIMIT,
            max_message_len: MAX_CONTENT_LEN,
            dedup_tolerance: Duration::from_secs(5),
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            warning_cap: DEFAULT_WARNING_CAP,
            max_messages_per_minute: 30,
            classifier_timeout: Duration::from_secs(2),
            assistant_chance: 0.0,
            assistant_seed: None,
            assistant_quiet_period: DEFAULT_QUIET_PERIOD,
            flagged_terms: DEFAULT_TERMS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(ChatError::Config(format!(
                "Usage: {} <room> [--name <display>] [--data-dir <path>] [--terms <file>] [--assistant-chance <0..1>] [--seed <n>] [--limit <n>]",
                args.first().map(String::as_str).unwrap_or("anonchat")
            )));
        }

        let room_id = args[1].trim().to_string();
        if room_id.is_empty() || room_id.starts_with("--") {
            return Err(ChatError::Config("Room name must come first".to_string()));
        }

        let mut display_name: Option<String> = None;
        let mut data_dir: Option<PathBuf> = None;
        let mut terms_file: Option<PathBuf> = None;
        let mut assistant_chance: Option<f64> = None;
        let mut assistant_seed: Option<u64> = None;
        let mut view_limit: Option<usize> = None;

        let mut i = 2;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = || {
                args.get(i + 1)
                    .ok_or_else(|| ChatError::Config(format!("{} requires an argument", flag)))
            };
            match flag {
                "--name" => {
                    display_name = Some(value()?.clone());
                }
                "--data-dir" => {
                    data_dir = Some(PathBuf::from(value()?));
                }
                "--terms" => {
                    terms_file = Some(PathBuf::from(value()?));
                }
                "--assistant-chance" => {
                    let chance = value()?.parse::<f64>().map_err(|_| {
                        ChatError::Config("--assistant-chance must be a number".to_string())
                    })?;
                    if !(0.0..=1.0).contains(&chance) {
                        return Err(ChatError::Config(
                            "--assistant-chance must be between 0 and 1".to_string(),
                        ));
                    }
                    assistant_chance = Some(chance);
                }
                "--seed" => {
                    assistant_seed = Some(value()?.parse::<u64>().map_err(|_| {
                        ChatError::Config("--seed must be a non-negative integer".to_string())
                    })?);
                }
                "--limit" => {
                    let limit = value()?.parse::<usize>().map_err(|_| {
                        ChatError::Config("--limit must be a positive integer".to_string())
                    })?;
                    if limit == 0 {
                        return Err(ChatError::Config("--limit must be at least 1".to_string()));
                    }
                    view_limit = Some(limit);
                }
                other => {
                    return Err(ChatError::Config(format!("Unknown argument: {}", other)));
                }
            }
            i += 2;
        }

        // Env overrides (nice for scripts)
        if let Ok(dir) = std::env::var("ANONCHAT_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(path) = std::env::var("ANONCHAT_TERMS") {
            terms_file = Some(PathBuf::from(path));
        }
        if let Some(seed) = std::env::var("ANONCHAT_SEED")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            assistant_seed = Some(seed);
        }

        let mut config = Self {
            room_id,
            display_name,
            data_dir,
            assistant_seed,
            ..Default::default()
        };
        if let Some(chance) = assistant_chance {
            config.assistant_chance = chance;
        }
        if let Some(limit) = view_limit {
            config.view_limit = limit;
        }
        if let Some(path) = terms_file {
            config.flagged_terms = load_terms(&path)?;
        }
        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".anonchat"))
    }
}

/// One term per line; blank lines and `#` comments are skipped
pub fn load_terms(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    let terms: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        return Err(ChatError::Config(format!(
            "Term list {} is empty",
            path.display()
        )));
    }
    Ok(terms)
}
