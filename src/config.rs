//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory (or
//! an explicit `-f` path), then applies the `AI_CHATBOT_LOG_LEVEL` override.
//! Every key has a default, so a missing default file is not an error.
//!
//! The API key is read from the environment variable named by
//! `[llm] api_key_env` and never from TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;
use crate::logger;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const LOG_LEVEL_ENV: &str = "AI_CHATBOT_LOG_LEVEL";

/// Console wording for the chat loop.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Printed before each read from stdin.
    pub user_prompt: String,
    /// Prepended to every line the assistant side prints.
    pub assistant_prefix: String,
    /// Compared case-insensitively against trimmed input.
    pub exit_command: String,
}

/// Gemini `generateContent` provider configuration (`[llm.gemini]`).
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Models collection URL; the model and method are appended per request.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    pub system_instruction: Option<String>,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"gemini"` or `"dummy"`).
    /// Maps to `default` in `[llm]` TOML.
    pub provider: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// Append logs here instead of stderr (already expanded, no `~`).
    pub file: Option<PathBuf>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub chat: ChatConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    /// Value of the `api_key_env` variable at load time, `None` when unset.
    pub llm_api_key: Option<String>,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    chat: RawChat,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    logging: RawLogging,
}

#[derive(Deserialize)]
struct RawChat {
    #[serde(default = "default_user_prompt")]
    user_prompt: String,
    #[serde(default = "default_assistant_prefix")]
    assistant_prefix: String,
    #[serde(default = "default_exit_command")]
    exit_command: String,
}

impl Default for RawChat {
    fn default() -> Self {
        Self {
            user_prompt: default_user_prompt(),
            assistant_prefix: default_assistant_prefix(),
            exit_command: default_exit_command(),
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default = "default_api_key_env")]
    api_key_env: String,
    #[serde(default)]
    gemini: RawGeminiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key_env: default_api_key_env(),
            gemini: RawGeminiConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawGeminiConfig {
    #[serde(default = "default_gemini_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_gemini_model")]
    model: String,
    #[serde(default = "default_gemini_temperature")]
    temperature: f32,
    #[serde(default = "default_gemini_max_output_tokens")]
    max_output_tokens: u32,
    #[serde(default = "default_gemini_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    system_instruction: Option<String>,
}

impl Default for RawGeminiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_gemini_api_base_url(),
            model: default_gemini_model(),
            temperature: default_gemini_temperature(),
            max_output_tokens: default_gemini_max_output_tokens(),
            timeout_seconds: default_gemini_timeout_seconds(),
            system_instruction: None,
        }
    }
}

#[derive(Deserialize)]
struct RawLogging {
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default)]
    file: Option<String>,
}

impl Default for RawLogging {
    fn default() -> Self {
        Self { level: default_log_level(), file: None }
    }
}

fn default_user_prompt() -> String { "You: ".to_string() }
fn default_assistant_prefix() -> String { "AI chatbot: ".to_string() }
fn default_exit_command() -> String { "exit".to_string() }
fn default_llm_provider() -> String { "gemini".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_gemini_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models".to_string()
}
fn default_gemini_model() -> String { "gemini-2.0-flash".to_string() }
fn default_gemini_temperature() -> f32 { 0.7 }
fn default_gemini_max_output_tokens() -> u32 { 2048 }
fn default_gemini_timeout_seconds() -> u64 { 60 }
fn default_log_level() -> String { "warn".to_string() }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from the given path, or `config/default.toml`, then apply
/// env-var overrides. Without an explicit path and without the default file,
/// built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let log_level_override = env::var(LOG_LEVEL_ENV).ok();

    if let Some(path) = config_path {
        return load_from(Path::new(path), log_level_override.as_deref());
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        load_from(default_path, log_level_override.as_deref())
    } else {
        resolve(RawConfig::default(), log_level_override.as_deref())
    }
}

/// Internal loader — accepts an explicit path and optional override.
/// Tests pass the override directly instead of mutating env vars.
pub fn load_from(path: &Path, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;
    resolve(parsed, log_level_override)
}

fn resolve(parsed: RawConfig, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let exit_command = parsed.chat.exit_command.trim().to_string();
    if exit_command.is_empty() {
        return Err(AppError::Config("chat.exit_command must not be empty".into()));
    }

    let api_key_env = parsed.llm.api_key_env.trim().to_string();
    if api_key_env.is_empty() {
        return Err(AppError::Config("llm.api_key_env must not be empty".into()));
    }

    let log_level = log_level_override.unwrap_or(&parsed.logging.level).to_string();
    logger::parse_level(&log_level)
        .map_err(|e| AppError::Config(format!("logging.level: {e}")))?;

    let g = parsed.llm.gemini;
    if g.timeout_seconds == 0 {
        return Err(AppError::Config("llm.gemini.timeout_seconds must be greater than 0".into()));
    }

    Ok(Config {
        chat: ChatConfig {
            user_prompt: parsed.chat.user_prompt,
            assistant_prefix: parsed.chat.assistant_prefix,
            exit_command,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            api_key_env: api_key_env.clone(),
            gemini: GeminiConfig {
                api_base_url: g.api_base_url.trim_end_matches('/').to_string(),
                model: g.model,
                temperature: g.temperature,
                max_output_tokens: g.max_output_tokens,
                timeout_seconds: g.timeout_seconds,
                system_instruction: g.system_instruction.filter(|s| !s.trim().is_empty()),
            },
        },
        logging: LoggingConfig {
            level: log_level,
            file: parsed.logging.file.as_deref().map(expand_home),
        },
        llm_api_key: env::var(&api_key_env).ok(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — dummy LLM, no API key, no external calls.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            chat: ChatConfig {
                user_prompt: default_user_prompt(),
                assistant_prefix: default_assistant_prefix(),
                exit_command: default_exit_command(),
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                api_key_env: default_api_key_env(),
                gemini: GeminiConfig {
                    api_base_url: "http://localhost:0/v1beta/models".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    max_output_tokens: 16,
                    timeout_seconds: 1,
                    system_instruction: None,
                },
            },
            logging: LoggingConfig { level: "info".into(), file: None },
            llm_api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Points the key lookup at a variable no test environment defines.
    const KEYLESS_TOML: &str = r#"
[llm]
api_key_env = "AI_CHATBOT_TEST_UNSET_KEY_VAR"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let f = write_toml(KEYLESS_TOML);
        let cfg = load_from(f.path(), None).unwrap();
        assert_eq!(cfg.chat.user_prompt, "You: ");
        assert_eq!(cfg.chat.assistant_prefix, "AI chatbot: ");
        assert_eq!(cfg.chat.exit_command, "exit");
        assert_eq!(cfg.llm.provider, "gemini");
        assert_eq!(cfg.llm.gemini.model, "gemini-2.0-flash");
        assert_eq!(cfg.logging.level, "warn");
        assert!(cfg.logging.file.is_none());
    }

    #[test]
    fn unset_key_env_leaves_key_absent() {
        let f = write_toml(KEYLESS_TOML);
        let cfg = load_from(f.path(), None).unwrap();
        assert_eq!(cfg.llm.api_key_env, "AI_CHATBOT_TEST_UNSET_KEY_VAR");
        assert!(cfg.llm_api_key.is_none());
    }

    #[test]
    fn gemini_section_overrides() {
        let f = write_toml(
            r#"
[llm]
default = "gemini"
api_key_env = "AI_CHATBOT_TEST_UNSET_KEY_VAR"

[llm.gemini]
api_base_url = "http://127.0.0.1:9999/models/"
model = "gemini-2.5-flash"
temperature = 0.1
max_output_tokens = 128
timeout_seconds = 5
system_instruction = "Answer briefly."
"#,
        );
        let cfg = load_from(f.path(), None).unwrap();
        let g = &cfg.llm.gemini;
        assert_eq!(g.api_base_url, "http://127.0.0.1:9999/models");
        assert_eq!(g.model, "gemini-2.5-flash");
        assert_eq!(g.max_output_tokens, 128);
        assert_eq!(g.timeout_seconds, 5);
        assert_eq!(g.system_instruction.as_deref(), Some("Answer briefly."));
    }

    #[test]
    fn blank_system_instruction_is_dropped() {
        let f = write_toml(
            r#"
[llm.gemini]
system_instruction = "   "
"#,
        );
        let cfg = load_from(f.path(), None).unwrap();
        assert!(cfg.llm.gemini.system_instruction.is_none());
    }

    #[test]
    fn chat_wording_overrides() {
        let f = write_toml(
            r#"
[chat]
user_prompt = "> "
assistant_prefix = "bot: "
exit_command = " Quit "
"#,
        );
        let cfg = load_from(f.path(), None).unwrap();
        assert_eq!(cfg.chat.user_prompt, "> ");
        assert_eq!(cfg.chat.assistant_prefix, "bot: ");
        assert_eq!(cfg.chat.exit_command, "Quit");
    }

    #[test]
    fn empty_exit_command_rejected() {
        let f = write_toml("[chat]\nexit_command = \"  \"\n");
        let err = load_from(f.path(), None).unwrap_err();
        assert!(err.to_string().contains("exit_command"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let f = write_toml("[llm.gemini]\ntimeout_seconds = 0\n");
        assert!(matches!(load_from(f.path(), None), Err(AppError::Config(_))));
    }

    #[test]
    fn malformed_toml_errors() {
        let f = write_toml("[chat\nuser_prompt = ");
        let msg = load_from(f.path(), None).unwrap_err().to_string();
        assert!(msg.contains("parse error"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/ai-chatbot.toml"), None);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn log_level_override() {
        let f = write_toml(KEYLESS_TOML);
        let cfg = load_from(f.path(), Some("debug")).unwrap();
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn invalid_log_level_rejected() {
        let f = write_toml("[logging]\nlevel = \"verbose\"\n");
        let err = load_from(f.path(), None).unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("logging.level")));
    }

    #[test]
    fn invalid_log_level_override_rejected() {
        let f = write_toml(KEYLESS_TOML);
        assert!(load_from(f.path(), Some("loud")).is_err());
    }

    #[test]
    fn log_file_tilde_expands() {
        let f = write_toml("[logging]\nfile = \"~/.ai-chatbot/chat.log\"\n");
        let cfg = load_from(f.path(), None).unwrap();
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let file = cfg.logging.file.unwrap();
        assert!(file.starts_with(&home));
        assert!(file.ends_with("chat.log"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/var/log/chat.log"), PathBuf::from("/var/log/chat.log"));
    }
}
