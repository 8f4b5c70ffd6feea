//! Tool implementations generated from the configuration.
//!
//! Every configured session-mode command contributes five tools
//! (`<name>_start_session`, `<name>_send`, `<name>_receive`,
//! `<name>_send_receive`, `<name>_close_session`); every one-shot command
//! contributes `<name>_run`; a single `list_sessions` tool spans them all.

mod run;
mod session;

pub use run::RunTool;
pub use session::{
    CloseSessionTool, ListSessionsTool, ReceiveTool, SendReceiveTool, SendTool, StartSessionTool,
};

use std::time::Duration;

use termbridge_core::Collected;

use crate::error::ToolError;

/// Converts a caller-supplied timeout in seconds into a `Duration`.
///
/// Rejected before conversion: non-finite, zero, negative, or absurdly
/// large values (`Duration::from_secs_f64` would panic on them).
pub(crate) fn timeout_from_secs(secs: Option<f64>) -> Result<Option<Duration>, ToolError> {
    let Some(secs) = secs else {
        return Ok(None);
    };
    if !secs.is_finite() || secs <= 0.0 || secs > 86_400.0 {
        return Err(ToolError::InvalidInput(format!(
            "timeout must be a positive number of seconds up to 86400, got {secs}"
        )));
    }
    Ok(Some(Duration::from_secs_f64(secs)))
}

/// An empty end marker would match everything; reject it up front.
pub(crate) fn end_marker_param(marker: Option<&String>) -> Result<Option<&str>, ToolError> {
    match marker {
        Some(marker) if marker.is_empty() => Err(ToolError::InvalidInput(
            "end_marker must not be empty".to_string(),
        )),
        Some(marker) => Ok(Some(marker.as_str())),
        None => Ok(None),
    }
}

/// Renders a collection window as tool-result text: stdout first, stderr
/// labelled, and a trailing note when the process was observed to close.
/// Empty text is a valid result — silence within the window is success.
pub(crate) fn render_collected(collected: &Collected) -> String {
    let mut text = collected.stdout.clone();
    if !collected.stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("[stderr]\n");
        text.push_str(&collected.stderr);
    }
    if let Some(code) = collected.exit_code {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("[process exited with code {code}]"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_conversion_bounds() {
        assert_eq!(timeout_from_secs(None).expect("none"), None);
        assert_eq!(
            timeout_from_secs(Some(1.5)).expect("ok"),
            Some(Duration::from_millis(1500))
        );
        assert!(timeout_from_secs(Some(0.0)).is_err());
        assert!(timeout_from_secs(Some(-1.0)).is_err());
        assert!(timeout_from_secs(Some(f64::NAN)).is_err());
        assert!(timeout_from_secs(Some(f64::INFINITY)).is_err());
        assert!(timeout_from_secs(Some(1e9)).is_err());
    }

    #[test]
    fn empty_marker_is_rejected() {
        assert!(end_marker_param(Some(&String::new())).is_err());
        assert_eq!(
            end_marker_param(Some(&">>> ".to_string())).expect("ok"),
            Some(">>> ")
        );
        assert_eq!(end_marker_param(None).expect("ok"), None);
    }

    #[test]
    fn rendering_labels_stderr_and_exit() {
        let collected = Collected {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            marker_found: false,
            exit_code: Some(0),
        };
        let text = render_collected(&collected);
        assert!(text.contains("out"));
        assert!(text.contains("[stderr]\nerr"));
        assert!(text.contains("[process exited with code 0]"));

        let empty = render_collected(&Collected::default());
        assert!(empty.is_empty());
    }
}
