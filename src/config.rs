//! Configuration types for the voice agent core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Base system prompt shared by every session. User-supplied extras from the
/// config file are appended below it.
pub const BASE_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant running on a handheld device.
Personality: Cute, helpful, robot.
Style: Short sentences. Enthusiastic.

RULES:
- For time, search, or camera requests: output ONLY a JSON object. No other text.
- For everything else: reply with normal conversational text. No JSON.

### EXAMPLES ###

User: What time is it?
You: {"action": "get_time", "value": "now"}

User: Search for news about robots.
You: {"action": "search_web", "value": "robots news"}

User: What do you see right now?
You: {"action": "capture_image", "value": "environment"}

User: Hello!
You: Hi! I am ready to help!

### END EXAMPLES ###
"#;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Language model sampling settings.
    pub llm: LlmConfig,
    /// Background wake-word listener settings.
    pub wake: WakeConfig,
    /// Foreground turn settings.
    pub turn: TurnConfig,
    /// Conversation history persistence settings.
    pub history: HistoryConfig,
    /// Extra instructions appended to the base system prompt.
    pub system_prompt_extras: String,
}

impl AgentConfig {
    /// Full system prompt: base prompt plus user extras.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        if self.system_prompt_extras.trim().is_empty() {
            BASE_SYSTEM_PROMPT.to_owned()
        } else {
            format!("{BASE_SYSTEM_PROMPT}\n\n{}", self.system_prompt_extras)
        }
    }

    /// Load configuration from a TOML file, falling back to defaults on a
    /// missing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::AgentError::Config(e.to_string()))
    }

    /// Save configuration as TOML, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AgentError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/pocketbot/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("pocketbot").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("pocketbot")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/pocketbot-config/config.toml")
        }
    }
}

/// Language model sampling parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Top-k sampling cutoff.
    pub top_k: usize,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
    /// Maximum tokens per response.
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            max_tokens: 256,
        }
    }
}

/// Background wake-word listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Trigger phrase, matched case-insensitively as a substring.
    pub phrase: String,
    /// Per-attempt recognition timeout in seconds.
    pub listen_timeout_secs: u64,
    /// Delay between recognition attempts after a benign outcome.
    pub retry_delay_ms: u64,
    /// Back-off after the recognition service reports busy.
    pub busy_backoff_ms: u64,
    /// Back-off after the recognition service rejects the client.
    pub rejected_backoff_ms: u64,
    /// Grace period after a pause command, letting an in-flight background
    /// recognition session terminate before the foreground takes the mic.
    pub pause_grace_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: "hey jarvis".to_owned(),
            listen_timeout_secs: 10,
            retry_delay_ms: 300,
            busy_backoff_ms: 1000,
            rejected_backoff_ms: 2000,
            pause_grace_ms: 800,
        }
    }
}

/// Foreground turn configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Foreground recognition timeout in seconds.
    pub listen_timeout_secs: u64,
    /// Delay before the ERROR state auto-recovers to IDLE.
    pub error_recovery_secs: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            listen_timeout_secs: 30,
            error_recovery_secs: 3,
        }
    }
}

/// Conversation history persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Root directory for persisted state. `history.json` lives here.
    pub root_dir: PathBuf,
    /// Number of non-system turns kept when saving.
    pub keep_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        let root = if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".pocketbot")
        } else {
            PathBuf::from("/tmp/pocketbot")
        };
        Self {
            root_dir: root,
            keep_turns: 10,
        }
    }
}
