use serde::Deserialize;
use std::fs;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AnalyzerConfig {
    /// Analyzer binary to invoke
    #[serde(default = "default_analyzer_command")]
    pub command: String,
    /// Wall-clock limit for one analyzer run
    #[serde(default = "default_analyzer_timeout_secs")]
    pub timeout_secs: u64,
    /// Keep only diagnostics from MISRA rules
    #[serde(default = "default_misra_only")]
    pub misra_only: bool,
    /// Extra arguments appended to every invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct InferenceConfig {
    /// Base URL of the local model server (OpenAI-compatible completions)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name passed through to the server
    #[serde(default = "default_model")]
    pub model: String,
    /// Generation length cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Low temperature keeps retries close to deterministic
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Wall-clock limit for one completion
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    /// Retries per task after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Concurrent tasks per session; inference still runs one at a time
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// Fallback line radius around the violation when no enclosing
    /// block is found
    #[serde(default = "default_context_radius")]
    pub context_radius: u32,
    /// Character budget for one context window
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding per-session working copies of uploaded files
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: default_analyzer_command(),
            timeout_secs: default_analyzer_timeout_secs(),
            misra_only: default_misra_only(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_parallel_tasks: default_max_parallel_tasks(),
            context_radius: default_context_radius(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            workspace: default_workspace(),
        }
    }
}

fn default_analyzer_command() -> String {
    "cppcheck".into()
}

fn default_analyzer_timeout_secs() -> u64 {
    30
}

fn default_misra_only() -> bool {
    true
}

fn default_base_url() -> String {
    "http://127.0.0.1:8081".into()
}

fn default_model() -> String {
    "codellama-7b-instruct".into()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.1
}

fn default_inference_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_parallel_tasks() -> usize {
    4
}

fn default_context_radius() -> u32 {
    8
}

fn default_max_context_chars() -> usize {
    4000
}

fn default_port() -> u16 {
    7860
}

fn default_workspace() -> String {
    ".misramend".into()
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the config if the file exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Rendered by `misramend init`
pub const DEFAULT_CONFIG: &str = r#"[analyzer]
# Analyzer binary to invoke (must support the MISRA addon)
command = "cppcheck"
# Wall-clock limit for one analyzer run, in seconds
timeout_secs = 30
# Keep only diagnostics from MISRA rules
misra_only = true
# Extra arguments appended to every invocation
extra_args = []

[inference]
# Base URL of the local model server (OpenAI-compatible completions)
base_url = "http://127.0.0.1:8081"
# Model name passed through to the server
model = "codellama-7b-instruct"
# Generation length cap
max_tokens = 512
# Low temperature keeps retries close to deterministic
temperature = 0.1
# Wall-clock limit for one completion, in seconds
timeout_secs = 120

[pipeline]
# Retries per task after the first attempt
max_retries = 2
# Concurrent tasks per session; inference still runs one at a time
max_parallel_tasks = 4
# Fallback line radius around the violation
context_radius = 8
# Character budget for one context window
max_context_chars = 4000

[server]
# Port for the review interface
port = 7860
# Directory holding per-session working copies of uploaded files
workspace = ".misramend"
"#;
