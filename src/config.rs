use anyhow::{Context, Result};
use globset::GlobBuilder;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::models::AnalysisMode;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_heartbeat_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_kt_max_tokens")]
    pub kt_max_tokens: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_kt_timeout_secs")]
    pub kt_timeout_secs: u64,
    #[serde(default = "default_overview_timeout_secs")]
    pub overview_timeout_secs: u64,
    #[serde(default = "default_kt_overview_timeout_secs")]
    pub kt_overview_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            kt_max_tokens: default_kt_max_tokens(),
            timeout_secs: default_timeout_secs(),
            kt_timeout_secs: default_kt_timeout_secs(),
            overview_timeout_secs: default_overview_timeout_secs(),
            kt_overview_timeout_secs: default_kt_overview_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:11434/api/generate".to_string()
}
fn default_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_max_tokens() -> usize {
    2000
}
fn default_kt_max_tokens() -> usize {
    4000
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_kt_timeout_secs() -> u64 {
    120
}
fn default_overview_timeout_secs() -> u64 {
    120
}
fn default_kt_overview_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Characters assumed per model token when sizing chunks.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    /// Share of the mode's token budget a chunk may occupy.
    #[serde(default = "default_budget_fraction")]
    pub budget_fraction: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
            budget_fraction: default_budget_fraction(),
        }
    }
}

fn default_chars_per_token() -> usize {
    1
}
fn default_budget_fraction() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_kt_ttl_secs")]
    pub kt_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            kt_ttl_secs: default_kt_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_kt_ttl_secs() -> u64 {
    7200
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Chunks of one file analyzed at once. `1` keeps strict sequencing.
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunk_concurrency: default_chunk_concurrency(),
            include_globs: default_include_globs(),
            exclude_globs: default_exclude_globs(),
        }
    }
}

fn default_chunk_concurrency() -> usize {
    1
}
fn default_include_globs() -> Vec<String> {
    ["*.cls", "*.trigger", "*.page", "*.component", "*.js", "*.html", "*.cmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_exclude_globs() -> Vec<String> {
    vec!["*-meta.xml".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding a fallback token when a request carries
    /// no `Authorization` header.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// How many directory levels below the root are listed. `0` lists only
    /// the root directory.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_env: default_token_env(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_max_depth() -> usize {
    8
}

/// Token budget and deadline for one analysis mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSettings {
    pub max_tokens: usize,
    pub timeout: Duration,
    pub summary_timeout: Duration,
}

impl Config {
    /// All-defaults config for commands that can run without a file.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn mode_settings(&self, mode: AnalysisMode) -> ModeSettings {
        match mode {
            AnalysisMode::Standard => ModeSettings {
                max_tokens: self.llm.max_tokens,
                timeout: Duration::from_secs(self.llm.timeout_secs),
                summary_timeout: Duration::from_secs(self.llm.overview_timeout_secs),
            },
            AnalysisMode::Kt => ModeSettings {
                max_tokens: self.llm.kt_max_tokens,
                timeout: Duration::from_secs(self.llm.kt_timeout_secs),
                summary_timeout: Duration::from_secs(self.llm.kt_overview_timeout_secs),
            },
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    pub fn cache_ttl(&self, mode: AnalysisMode) -> Duration {
        match mode {
            AnalysisMode::Standard => Duration::from_secs(self.cache.ttl_secs),
            AnalysisMode::Kt => Duration::from_secs(self.cache.kt_ttl_secs),
        }
    }

    /// Largest chunk, in characters, for the given mode's token budget.
    pub fn max_chunk_chars(&self, mode: AnalysisMode) -> usize {
        crate::chunk::max_chunk_chars(
            self.mode_settings(mode).max_tokens,
            self.chunking.chars_per_token,
            self.chunking.budget_fraction,
        )
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate server
    if config.server.heartbeat_secs == 0 {
        anyhow::bail!("server.heartbeat_secs must be > 0");
    }

    // Validate llm
    if config.llm.max_tokens == 0 || config.llm.kt_max_tokens == 0 {
        anyhow::bail!("llm.max_tokens and llm.kt_max_tokens must be > 0");
    }
    if config.llm.timeout_secs == 0 || config.llm.kt_timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs and llm.kt_timeout_secs must be > 0");
    }
    if config.llm.overview_timeout_secs == 0 || config.llm.kt_overview_timeout_secs == 0 {
        anyhow::bail!("llm.overview_timeout_secs and llm.kt_overview_timeout_secs must be > 0");
    }
    if config.llm.endpoint.trim().is_empty() {
        anyhow::bail!("llm.endpoint must not be empty");
    }

    // Validate retry
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    // Validate chunking
    if config.chunking.chars_per_token == 0 {
        anyhow::bail!("chunking.chars_per_token must be > 0");
    }
    if !(config.chunking.budget_fraction > 0.0 && config.chunking.budget_fraction <= 1.0) {
        anyhow::bail!("chunking.budget_fraction must be in (0.0, 1.0]");
    }

    // Validate analysis
    if config.analysis.chunk_concurrency == 0 {
        anyhow::bail!("analysis.chunk_concurrency must be >= 1");
    }
    if config.analysis.include_globs.is_empty() {
        anyhow::bail!("analysis.include_globs must list at least one pattern");
    }
    for pattern in config
        .analysis
        .include_globs
        .iter()
        .chain(config.analysis.exclude_globs.iter())
    {
        GlobBuilder::new(pattern)
            .build()
            .with_context(|| format!("Invalid glob pattern in [analysis]: '{}'", pattern))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.llm.max_tokens, 2000);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert_eq!(cfg.cache.kt_ttl_secs, 7200);
        assert_eq!(cfg.server.heartbeat_secs, 30);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn kt_mode_has_larger_budget_and_deadline() {
        let cfg = Config::minimal();
        let std = cfg.mode_settings(AnalysisMode::Standard);
        let kt = cfg.mode_settings(AnalysisMode::Kt);
        assert!(kt.max_tokens > std.max_tokens);
        assert!(kt.timeout > std.timeout);
        assert_eq!(cfg.max_chunk_chars(AnalysisMode::Standard), 1000);
        assert!(cfg.cache_ttl(AnalysisMode::Kt) > cfg.cache_ttl(AnalysisMode::Standard));
    }

    #[test]
    fn load_config_rejects_zero_attempts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nmax_attempts = 0").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn zero_heartbeat_and_summary_timeouts_are_rejected() {
        let mut cfg = Config::minimal();
        cfg.server.heartbeat_secs = 0;
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("heartbeat_secs"));

        let mut cfg = Config::minimal();
        cfg.llm.overview_timeout_secs = 0;
        assert!(validate(&cfg).unwrap_err().to_string().contains("overview_timeout_secs"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm]\nkt_overview_timeout_secs = 0").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("kt_overview_timeout_secs"));
    }

    #[test]
    fn load_config_rejects_bad_glob() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[analysis]\ninclude_globs = [\"*.{{cls\"]").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn load_config_reads_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[llm]\nmodel = \"codellama\"\nmax_tokens = 800\n\n[server]\nbind = \"0.0.0.0:9000\""
        )
        .unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.llm.model, "codellama");
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.max_chunk_chars(AnalysisMode::Standard), 400);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/rana.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rana.toml"));
    }
}
