//! JSON configuration: which commands exist and how they are screened.
//!
//! The core never reads files; this layer turns one JSON document into
//! validated [`SessionSpec`]s and one-shot command descriptions. Command
//! names become tool-name prefixes, so they are restricted to the tool
//! naming alphabet at load time, and unknown fields are rejected — a
//! typoed key must not silently become a default.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use termbridge_core::{PatternGate, ScreeningLevel, SessionSpec};

use crate::error::ConfigError;

const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
const MAX_COMMAND_NAME_LEN: usize = 32;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub commands: BTreeMap<String, CommandConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// One configured command.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Program name or path. Never passed through a shell.
    pub program: String,
    /// Arguments prepended to every invocation.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub mode: CommandMode,
    /// Session mode only: lines sent to the process on close.
    #[serde(default)]
    pub shutdown_args: Vec<String>,
    /// Default receive timeout (session) or run deadline (oneshot).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Session mode only: prompt substring that ends receives early.
    #[serde(default)]
    pub prompt_marker: Option<String>,
}

fn default_timeout_secs() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    /// Run once per call, collect output, return.
    #[default]
    Oneshot,
    /// Long-lived interactive session.
    Session,
}

/// Screening configuration for the validation gate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    #[serde(default)]
    pub level: ScreeningLevel,
    /// Extra deny regexes, enforced at every screening level.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
}

impl ServerConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every command entry and the security section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, command) in &self.commands {
            validate_command_name(name)?;
            command.validate(name)?;
        }
        for pattern in &self.security.deny_patterns {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidDenyPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Builds the validation gate described by the security section.
    pub fn build_gate(&self) -> Result<PatternGate, ConfigError> {
        let mut patterns = Vec::with_capacity(self.security.deny_patterns.len());
        for pattern in &self.security.deny_patterns {
            patterns.push(Regex::new(pattern).map_err(|source| {
                ConfigError::InvalidDenyPattern {
                    pattern: pattern.clone(),
                    source,
                }
            })?);
        }
        Ok(PatternGate::new(self.security.level).with_deny_patterns(patterns))
    }
}

impl CommandConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidCommand {
            name: name.to_string(),
            reason,
        };

        if self.program.trim().is_empty() {
            return Err(invalid("program must not be empty".to_string()));
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs <= 0.0 {
            return Err(invalid(format!(
                "timeout_secs must be positive and finite, got {}",
                self.timeout_secs
            )));
        }
        if self.mode == CommandMode::Oneshot {
            if !self.shutdown_args.is_empty() {
                return Err(invalid(
                    "shutdown_args only applies to session mode".to_string(),
                ));
            }
            if self.prompt_marker.is_some() {
                return Err(invalid(
                    "prompt_marker only applies to session mode".to_string(),
                ));
            }
        }
        if let Some(marker) = &self.prompt_marker {
            if marker.is_empty() {
                return Err(invalid("prompt_marker must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Timeout as a `Duration` (validated positive and finite).
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    /// Session spec for this entry. Only meaningful in session mode.
    pub fn to_session_spec(&self) -> SessionSpec {
        let mut spec = SessionSpec::new(self.program.clone())
            .with_start_args(self.args.iter().cloned())
            .with_shutdown_args(self.shutdown_args.iter().cloned())
            .with_default_timeout(self.timeout());
        if let Some(marker) = &self.prompt_marker {
            spec = spec.with_prompt_marker(marker.clone());
        }
        spec
    }
}

fn validate_command_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidCommand {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() || name.len() > MAX_COMMAND_NAME_LEN {
        return Err(invalid("name must be 1..=32 characters"));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or_default();
    if !first.is_ascii_lowercase() {
        return Err(invalid("name must start with a lowercase letter"));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(invalid(
            "name may only contain lowercase letters, digits, and underscores",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(json: &str) -> Result<ServerConfig, ConfigError> {
        let config: ServerConfig =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse {
                path: "inline".into(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn full_document_parses() {
        let config = parse(
            r#"{
                "commands": {
                    "python": {
                        "program": "python3",
                        "args": ["-i", "-q"],
                        "mode": "session",
                        "shutdown_args": ["exit()"],
                        "timeout_secs": 5.0,
                        "prompt_marker": ">>> "
                    },
                    "uname": { "program": "uname", "args": ["-a"] }
                },
                "security": { "level": "strict", "deny_patterns": ["rm\\s+-rf"] }
            }"#,
        )
        .expect("valid config");

        assert_eq!(config.commands.len(), 2);
        let python = &config.commands["python"];
        assert_eq!(python.mode, CommandMode::Session);
        assert_eq!(python.timeout(), Duration::from_secs(5));

        let spec = python.to_session_spec();
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.prompt_marker.as_deref(), Some(">>> "));
        assert!(spec.validate().is_ok());

        assert_eq!(config.commands["uname"].mode, CommandMode::Oneshot);
        config.build_gate().expect("gate builds");
    }

    #[test]
    fn empty_program_is_rejected() {
        let err = parse(r#"{"commands": {"x": {"program": "  "}}}"#).expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidCommand { .. }));
    }

    #[test]
    fn bad_names_are_rejected() {
        for name in ["Python", "1two", "has-dash", "has space", ""] {
            let doc = format!(r#"{{"commands": {{"{name}": {{"program": "x"}}}}}}"#);
            assert!(parse(&doc).is_err(), "accepted bad name: {name:?}");
        }
    }

    #[test]
    fn nonpositive_timeout_is_rejected() {
        let err = parse(r#"{"commands": {"x": {"program": "x", "timeout_secs": 0}}}"#)
            .expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidCommand { .. }));
    }

    #[test]
    fn session_fields_on_oneshot_are_rejected() {
        let err = parse(r#"{"commands": {"x": {"program": "x", "shutdown_args": ["quit"]}}}"#)
            .expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidCommand { .. }));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse(r#"{"commands": {"x": {"program": "x", "shell": true}}}"#).is_err());
        assert!(parse(r#"{"bogus_top_level": 1}"#).is_err());
    }

    #[test]
    fn invalid_deny_pattern_is_rejected() {
        let err = parse(r#"{"security": {"deny_patterns": ["("]}}"#).expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidDenyPattern { .. }));
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"commands": {{"echo": {{"program": "echo"}}}}}}"#
        )
        .expect("write");

        let config = ServerConfig::load(file.path()).expect("load");
        assert_eq!(config.commands.len(), 1);

        let missing = ServerConfig::load(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
