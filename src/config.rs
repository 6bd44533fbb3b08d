//! Configuration for the masking router.
//!
//! Loaded once at startup from a YAML file with `${VAR}` / `${VAR:-default}`
//! environment variable expansion. Every key is optional; the recognized
//! defaults are:
//!
//! - `target_separator` absent/empty → literal tab
//! - `target_name_postfix` absent → target table names identical to source
//! - `schema_change_log` absent → `schema_change_events.log`
//! - `engine.command` absent → `sortcl`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Path to the rule library (named, typed rule templates)
    #[serde(default)]
    pub rules_library: Option<PathBuf>,

    /// Path to the data-class library (matchers bound to rules)
    #[serde(default)]
    pub class_library: Option<PathBuf>,

    /// Target file path; file output is insert-only
    #[serde(default)]
    pub target: Option<PathBuf>,

    /// Process type for the file target (default RECORD when unset)
    #[serde(default)]
    pub target_process_type: Option<String>,

    /// Schema prefixed onto target table names (database targets)
    #[serde(default)]
    pub target_schema: Option<String>,

    /// Column separator emitted on the target side
    #[serde(default)]
    pub target_separator: Option<String>,

    /// Postfix appended to target table/file names
    #[serde(default)]
    pub target_name_postfix: Option<String>,

    /// Append-only log of detected DDL events
    #[serde(default = "default_schema_change_log")]
    pub schema_change_log: PathBuf,

    /// Connection reference for a database target
    #[serde(default)]
    pub dsn: Option<String>,

    /// External row-processing engine
    #[serde(default)]
    pub engine: EngineConfig,

    /// Change event source
    #[serde(default)]
    pub source: SourceConfig,
}

/// External engine subprocess configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Engine executable
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Extra arguments placed before the script flag
    #[serde(default)]
    pub args: Vec<String>,

    /// Flag prefix for the generated script path
    #[serde(default = "default_spec_flag")]
    pub spec_flag: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            args: Vec::new(),
            spec_flag: default_spec_flag(),
        }
    }
}

/// Change event source configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Path to a newline-delimited JSON event file; `-` or absent reads stdin
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Resolved target description handed to jobs at creation.
///
/// Derived once from [`Config`]; separator and postfix defaults are applied
/// here so job construction never consults raw configuration again.
#[derive(Debug, Clone, Default)]
pub struct TargetSpec {
    /// File target path (insert-only)
    pub path: Option<PathBuf>,
    /// File target process type; RECORD is substituted at render time
    pub process_type: Option<String>,
    /// Target schema name for database targets
    pub schema: Option<String>,
    /// Target-side column separator
    pub separator: String,
    /// Postfix for target table/file names
    pub postfix: String,
    /// Database connection reference
    pub dsn: Option<String>,
}

fn default_schema_change_log() -> PathBuf {
    PathBuf::from("schema_change_events.log")
}

fn default_engine_command() -> String {
    "sortcl".to_string()
}

fn default_spec_flag() -> String {
    "/SPEC=".to_string()
}

impl Config {
    /// Load configuration from a YAML file with env var expansion
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let expanded = Self::expand_env_vars(&content);

        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Parse configuration from a YAML string (no env expansion)
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Expand `${VAR}` and `${VAR:-default}` references
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                }
            })
            .to_string()
    }

    /// Resolve the target description for job creation
    pub fn target_spec(&self) -> TargetSpec {
        let separator = match self.target_separator.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => "\t".to_string(),
        };
        TargetSpec {
            path: self.target.clone(),
            process_type: self.target_process_type.clone(),
            schema: self.target_schema.clone(),
            separator,
            postfix: self.target_name_postfix.clone().unwrap_or_default(),
            dsn: self.dsn.clone(),
        }
    }
}
