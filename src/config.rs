//! Process configuration, read once at startup from the environment

use crate::llm::LlmConfig;
use crate::state_machine::DEFAULT_MAX_TOOL_CYCLES;
use crate::tools::DEFAULT_TOOL_TIMEOUT;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_LOG_FILTER: &str = "chatgemini=info,tower_http=debug";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub max_tool_cycles: u32,
    pub tool_timeout: Duration,
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("chatbot.db"),
            port: DEFAULT_PORT,
            max_tool_cycles: DEFAULT_MAX_TOOL_CYCLES,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            llm: LlmConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable values fall
    /// back to their defaults with a warning.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let db_path = var("CHATGEMINI_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".chatgemini").join("chatbot.db")
            },
            PathBuf::from,
        );

        Self {
            db_path,
            port: parse_var(&var, "CHATGEMINI_PORT").unwrap_or(defaults.port),
            max_tool_cycles: parse_var(&var, "CHATGEMINI_MAX_TOOL_CYCLES")
                .unwrap_or(defaults.max_tool_cycles),
            tool_timeout: parse_var(&var, "CHATGEMINI_TOOL_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map_or(defaults.tool_timeout, Duration::from_secs),
            llm: LlmConfig::from_lookup(&var),
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key = %key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}
