//! Outbound text screening.
//!
//! A [`ValidationGate`] is consulted once per outbound send, before any
//! text reaches a process's input stream. Gates must be side-effect-free
//! and must never spawn processes themselves.
//!
//! The production gate, [`PatternGate`], screens for command-injection
//! shapes: command substitution, shell chaining, and dangerous commands
//! hiding behind separators. It is program-agnostic — it has no idea
//! whether the session is a Python interpreter or a database shell — so
//! the levels trade false positives against coverage.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Text screen applied before anything is written to a process.
///
/// `Err(reason)` means the text must not be sent; the caller maps it to a
/// security rejection without touching the process.
pub trait ValidationGate: Send + Sync {
    fn validate(&self, text: &str) -> Result<(), String>;
}

/// How aggressively [`PatternGate`] screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreeningLevel {
    /// No screening at all.
    Disabled,
    /// Only unambiguous red flags (null bytes, `rm -rf /`).
    Relaxed,
    /// Substitution, chaining, and dangerous chained commands.
    #[default]
    Balanced,
    /// Balanced plus any bare separator or redirection character.
    Strict,
}

/// Pattern-based injection screen.
///
/// # Examples
///
/// ```
/// use termbridge_core::{PatternGate, ScreeningLevel, ValidationGate};
///
/// let gate = PatternGate::new(ScreeningLevel::Balanced);
/// assert!(gate.validate("print(40 + 2)").is_ok());
/// assert!(gate.validate("ls && rm -rf /").is_err());
/// ```
pub struct PatternGate {
    level: ScreeningLevel,
    deny_patterns: Vec<Regex>,
}

impl PatternGate {
    /// Creates a gate at the given level with no extra deny patterns.
    pub fn new(level: ScreeningLevel) -> Self {
        Self {
            level,
            deny_patterns: Vec::new(),
        }
    }

    /// Adds operator-configured deny regexes, checked at every level
    /// (including `Disabled` — an explicit pattern is an explicit ban).
    #[must_use]
    pub fn with_deny_patterns(mut self, patterns: Vec<Regex>) -> Self {
        self.deny_patterns = patterns;
        self
    }
}

impl std::fmt::Debug for PatternGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternGate")
            .field("level", &self.level)
            .field("deny_patterns", &self.deny_patterns.len())
            .finish()
    }
}

impl ValidationGate for PatternGate {
    fn validate(&self, text: &str) -> Result<(), String> {
        for pattern in &self.deny_patterns {
            if pattern.is_match(text) {
                return Err(format!("matches deny pattern `{pattern}`"));
            }
        }

        match self.level {
            ScreeningLevel::Disabled => Ok(()),
            ScreeningLevel::Relaxed => check_obvious(text),
            ScreeningLevel::Balanced => check_obvious(text).and_then(|()| check_injection(text)),
            ScreeningLevel::Strict => check_obvious(text)
                .and_then(|()| check_injection(text))
                .and_then(|()| check_strict(text)),
        }
    }
}

/// Commands that are suspicious when they appear after a separator.
const CHAINED_COMMANDS: &[&str] = &[
    "rm ", "rm\t", "curl ", "wget ", "nc ", "sh ", "bash ", "chmod ", "chown ", "mkfifo ", "dd ",
];

fn check_obvious(text: &str) -> Result<(), String> {
    if text.contains('\0') {
        return Err("contains a null byte".to_string());
    }
    if text.to_lowercase().contains("rm -rf /") {
        return Err("destructive filesystem wipe".to_string());
    }
    Ok(())
}

fn check_injection(text: &str) -> Result<(), String> {
    // Fast path for text with nothing shell-flavored in it at all.
    if text
        .chars()
        .all(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Ok(());
    }

    for needle in ["$(", "${", "`"] {
        if text.contains(needle) {
            return Err(format!("command substitution (`{needle}`)"));
        }
    }
    if text.contains("&&") || text.contains("||") {
        return Err("shell command chaining (`&&`/`||`)".to_string());
    }

    let lower = text.to_lowercase();
    for segment in lower.split([';', '|', '\n']).skip(1) {
        let head = segment.trim_start();
        if let Some(cmd) = CHAINED_COMMANDS.iter().find(|c| head.starts_with(**c)) {
            return Err(format!("dangerous command after separator (`{}`)", cmd.trim_end()));
        }
    }

    Ok(())
}

fn check_strict(text: &str) -> Result<(), String> {
    if let Some(c) = text.chars().find(|c| matches!(c, ';' | '|' | '&' | '>' | '<')) {
        return Err(format!("shell control character (`{c}`)"));
    }
    Ok(())
}
