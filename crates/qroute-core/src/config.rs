//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. qroute.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::audit::AuditConfig;
use crate::Error;

/// LLM Provider type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Claude API
    #[default]
    Claude,
    /// OpenAI-compatible API (GLM, vLLM, etc.)
    OpenAi,
}

impl LlmProvider {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "openai" | "glm" | "vllm" | "ollama" => LlmProvider::OpenAi,
            _ => LlmProvider::Claude,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key
    pub api_key: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// API provider
    #[serde(default)]
    pub provider: LlmProvider,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            provider: LlmProvider::Claude,
            base_url: None,
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

/// ルーティング状態機械の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// 1 リクエスト全体のタイムアウト（秒）
    pub timeout_secs: u64,
    /// プロンプトに含める履歴の件数
    pub history_window: usize,
    /// 意図明確化の最大試行回数
    pub clarify_attempts: usize,
    /// 明確化リトライ間のバックオフ（ミリ秒）
    pub clarify_backoff_ms: Vec<u64>,
    /// 分類器のブロッキングワーカー数
    pub classifier_workers: usize,
    /// Direct 実行の最大トークン数
    pub direct_max_tokens: u32,
    /// Direct 実行の temperature
    pub direct_temperature: f32,
    /// 明確化リクエストの最大トークン数
    pub clarify_max_tokens: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            history_window: 10,
            clarify_attempts: 3,
            clarify_backoff_ms: vec![100, 200, 400],
            classifier_workers: 4,
            direct_max_tokens: 1024,
            direct_temperature: 0.7,
            clarify_max_tokens: 512,
        }
    }
}

impl RouterConfig {
    /// Whole-invocation budget
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Attempts beyond the configured list reuse its last entry.
    pub fn backoff_after(&self, attempt: usize) -> Duration {
        let ms = self
            .clarify_backoff_ms
            .get(attempt.saturating_sub(1))
            .or_else(|| self.clarify_backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// Sequential ワークフローの上限（設定でこれを超えることはできない）
pub const SEQUENTIAL_CAP: usize = 5;

/// Parallel ワークフローの上限（設定でこれを超えることはできない）
pub const PARALLEL_CAP: usize = 3;

/// マルチレスポンダー実行エンジンの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sequential で実行できるレスポンダーの上限
    pub max_sequential: usize,
    /// Parallel で実行できるレスポンダーの上限
    pub max_parallel: usize,
    /// レスポンダー選択呼び出しの最大トークン数
    pub planner_max_tokens: u32,
    /// レスポンダーの最大トークン数
    pub responder_max_tokens: u32,
    /// レスポンダーの temperature
    pub responder_temperature: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sequential: SEQUENTIAL_CAP,
            max_parallel: PARALLEL_CAP,
            planner_max_tokens: 64,
            responder_max_tokens: 2048,
            responder_temperature: 0.4,
        }
    }
}

/// Main configuration for qroute
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Routing state machine configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Multi-responder engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Audit log configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 設定ファイル内の `${VAR_NAME}` は環境変数の値に置換されます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;

        // 既存の環境変数で上書き（環境変数が優先）
        cfg.apply_env_overrides();

        Ok(cfg)
    }

    /// TOML 文字列から設定を構築（環境変数の上書きは行わない）
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded_content = Self::expand_env_vars(content);
        let toml: TomlConfig = toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        let cfg = Self::from_toml_config(toml);
        cfg.validate()?;
        Ok(cfg)
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// 1. `./qroute.toml`
    /// 2. 見つからない場合は環境変数のみ
    pub fn load() -> crate::Result<Self> {
        if Path::new("qroute.toml").exists() {
            return Self::from_toml_file("qroute.toml");
        }

        Self::from_env()
    }

    /// TOML 構造から Config を構築
    fn from_toml_config(toml: TomlConfig) -> Self {
        let defaults = Config::default();

        let llm = toml.llm.unwrap_or_default();
        let llm_config = LlmConfig {
            api_key: llm.api_key.unwrap_or_default(),
            model: llm.model.unwrap_or_else(default_model),
            provider: LlmProvider::parse(&llm.provider.unwrap_or_default()),
            base_url: llm.base_url,
        };

        let router = toml.router.unwrap_or_default();
        let router_defaults = defaults.router;
        let router_config = RouterConfig {
            timeout_secs: router.timeout_secs.unwrap_or(router_defaults.timeout_secs),
            history_window: router.history_window.unwrap_or(router_defaults.history_window),
            clarify_attempts: router.clarify_attempts.unwrap_or(router_defaults.clarify_attempts),
            clarify_backoff_ms: router
                .clarify_backoff_ms
                .unwrap_or(router_defaults.clarify_backoff_ms),
            classifier_workers: router
                .classifier_workers
                .unwrap_or(router_defaults.classifier_workers),
            direct_max_tokens: router.direct_max_tokens.unwrap_or(router_defaults.direct_max_tokens),
            direct_temperature: router
                .direct_temperature
                .unwrap_or(router_defaults.direct_temperature),
            clarify_max_tokens: router
                .clarify_max_tokens
                .unwrap_or(router_defaults.clarify_max_tokens),
        };

        let engine = toml.engine.unwrap_or_default();
        let engine_defaults = defaults.engine;
        let engine_config = EngineConfig {
            max_sequential: engine.max_sequential.unwrap_or(engine_defaults.max_sequential),
            max_parallel: engine.max_parallel.unwrap_or(engine_defaults.max_parallel),
            planner_max_tokens: engine
                .planner_max_tokens
                .unwrap_or(engine_defaults.planner_max_tokens),
            responder_max_tokens: engine
                .responder_max_tokens
                .unwrap_or(engine_defaults.responder_max_tokens),
            responder_temperature: engine
                .responder_temperature
                .unwrap_or(engine_defaults.responder_temperature),
        };

        let audit = toml.audit.unwrap_or_default();
        let audit_defaults = defaults.audit;
        let audit_config = AuditConfig {
            enabled: audit.enabled.unwrap_or(audit_defaults.enabled),
            log_file: audit.log_file.or(audit_defaults.log_file),
            max_file_size: audit.max_file_size.unwrap_or(audit_defaults.max_file_size),
            max_rotated_files: audit
                .max_rotated_files
                .unwrap_or(audit_defaults.max_rotated_files),
            log_to_console: audit.log_to_console.unwrap_or(audit_defaults.log_to_console),
        };

        Config {
            llm: llm_config,
            router: router_config,
            engine: engine_config,
            audit: audit_config,
        }
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self) {
        if let Ok(api_key) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            if !provider.is_empty() {
                self.llm.provider = LlmProvider::parse(&provider);
            }
        }
        if let Ok(base_url) = std::env::var("LLM_BASE_URL") {
            if !base_url.is_empty() {
                self.llm.base_url = Some(base_url);
            }
        }

        if let Some(secs) = env_parse("ROUTER_TIMEOUT_SECS") {
            self.router.timeout_secs = secs;
        }
        if let Some(workers) = env_parse("ROUTER_CLASSIFIER_WORKERS") {
            self.router.classifier_workers = workers;
        }

        if let Ok(path) = std::env::var("AUDIT_LOG_FILE") {
            self.audit.log_file = if path.is_empty() { None } else { Some(path) };
        }
        if let Ok(enabled) = std::env::var("AUDIT_ENABLED") {
            self.audit.enabled = enabled.to_lowercase() != "false";
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| Error::Config("LLM_API_KEY not set".to_string()))?;

        let mut cfg = Config {
            llm: LlmConfig {
                api_key,
                ..LlmConfig::default()
            },
            ..Config::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// 値の整合性を検証する
    pub fn validate(&self) -> crate::Result<()> {
        if self.router.timeout_secs == 0 {
            return Err(Error::Config("router.timeout_secs must be positive".to_string()));
        }
        if self.router.clarify_attempts == 0 {
            return Err(Error::Config("router.clarify_attempts must be at least 1".to_string()));
        }
        if self.router.classifier_workers == 0 {
            return Err(Error::Config("router.classifier_workers must be at least 1".to_string()));
        }
        if self.engine.max_sequential == 0 || self.engine.max_parallel == 0 {
            return Err(Error::Config("engine responder caps must be at least 1".to_string()));
        }
        if self.engine.max_sequential > SEQUENTIAL_CAP {
            return Err(Error::Config(format!(
                "engine.max_sequential must be at most {}",
                SEQUENTIAL_CAP
            )));
        }
        if self.engine.max_parallel > PARALLEL_CAP {
            return Err(Error::Config(format!(
                "engine.max_parallel must be at most {}",
                PARALLEL_CAP
            )));
        }
        Ok(())
    }

    /// Get the effective LLM configuration
    pub fn llm_config(&self) -> &LlmConfig {
        &self.llm
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ============================================================================
// TOML 構造体定義（ファイル解析用）
// ============================================================================

/// TOML ファイル用のトップレベル構造
#[derive(Debug, Deserialize)]
struct TomlConfig {
    llm: Option<TomlLlmConfig>,
    router: Option<TomlRouterConfig>,
    engine: Option<TomlEngineConfig>,
    audit: Option<TomlAuditConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlLlmConfig {
    /// API プロバイダー ("claude" または "openai")
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlRouterConfig {
    timeout_secs: Option<u64>,
    history_window: Option<usize>,
    clarify_attempts: Option<usize>,
    clarify_backoff_ms: Option<Vec<u64>>,
    classifier_workers: Option<usize>,
    direct_max_tokens: Option<u32>,
    direct_temperature: Option<f32>,
    clarify_max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlEngineConfig {
    max_sequential: Option<usize>,
    max_parallel: Option<usize>,
    planner_max_tokens: Option<u32>,
    responder_max_tokens: Option<u32>,
    responder_temperature: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlAuditConfig {
    enabled: Option<bool>,
    log_file: Option<String>,
    max_file_size: Option<usize>,
    max_rotated_files: Option<usize>,
    log_to_console: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "claude-sonnet-4-20250514");
        assert_eq!(config.provider, LlmProvider::Claude);
        assert!(config.api_key.is_empty());
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_router_config_default() {
        let config = RouterConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert_eq!(config.history_window, 10);
        assert_eq!(config.clarify_attempts, 3);
        assert_eq!(config.backoff_after(1), Duration::from_millis(100));
        assert_eq!(config.backoff_after(2), Duration::from_millis(200));
        assert_eq!(config.backoff_after(3), Duration::from_millis(400));
        assert_eq!(config.backoff_after(7), Duration::from_millis(400));
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.max_sequential, 5);
        assert_eq!(config.max_parallel, 3);
    }

    #[test]
    fn test_expand_env_vars() {
        // テスト用環境変数を設定
        unsafe {
            std::env::set_var("QROUTE_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${QROUTE_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        // 存在しない環境変数
        let result = Config::expand_env_vars("prefix_${QROUTE_NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("QROUTE_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_empty_name() {
        let result = Config::expand_env_vars("${}_content");
        assert_eq!(result, "_content");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[llm]
provider = "openai"
model = "glm-4.7"
api_key = "test_key"
base_url = "https://api.example.com"

[router]
timeout_secs = 60
clarify_backoff_ms = [10, 20, 40]

[engine]
max_parallel = 2

[audit]
enabled = false
"#;

        let config = Config::from_toml_str(toml_content).unwrap();

        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.model, "glm-4.7");
        assert_eq!(config.llm.base_url, Some("https://api.example.com".to_string()));
        assert_eq!(config.router.timeout_secs, 60);
        assert_eq!(config.router.clarify_backoff_ms, vec![10, 20, 40]);
        // 未指定の値はデフォルト
        assert_eq!(config.router.history_window, 10);
        assert_eq!(config.engine.max_parallel, 2);
        assert_eq!(config.engine.max_sequential, 5);
        assert!(!config.audit.enabled);
    }

    #[test]
    fn test_toml_config_rejects_zero_timeout() {
        let result = Config::from_toml_str("[router]\ntimeout_secs = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_caps_above_limits() {
        let mut config = Config::default();
        config.engine.max_parallel = 6;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.engine.max_sequential = 6;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let result = Config::from_toml_str("[engine]\nmax_parallel = 4\n");
        assert!(matches!(result, Err(Error::Config(_))));

        let mut config = Config::default();
        config.engine.max_sequential = SEQUENTIAL_CAP;
        config.engine.max_parallel = PARALLEL_CAP;
        assert!(config.validate().is_ok());
    }
}
