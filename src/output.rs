//! Output parsing: extract the JSON envelope from mixed stdout and map
//! OS-specific sandbox denial messages to short user-facing labels.

use serde_json::Value;

/// JSON extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStrategy {
    /// Parse the entire trimmed output as JSON.
    Full,
    /// First line that starts with `{`, ends with `}`, and parses.
    Line,
    /// Last `{`…`}` pair by outermost braces.
    Brace,
    /// Try Full → Line → Brace; first success wins.
    Auto,
}

/// Extract a JSON object from output that may contain log lines or other
/// noise around the envelope.
///
/// The `Brace` strategy assumes the envelope is the *last* brace pair in the
/// output; an embedded `{…}` in trailing prose can win instead. Well-formed
/// envelopes never reach that path under `Auto` because `Full` or `Line`
/// matches first.
pub fn extract_json_from_output(output: &str, strategy: ExtractStrategy) -> Option<Value> {
    if output.is_empty() {
        return None;
    }

    let auto = strategy == ExtractStrategy::Auto;

    if auto || strategy == ExtractStrategy::Full {
        if let Ok(v) = serde_json::from_str::<Value>(output.trim()) {
            return Some(v);
        }
        if !auto {
            return None;
        }
    }

    if auto || strategy == ExtractStrategy::Line {
        for line in output.lines() {
            let line = line.trim();
            if line.starts_with('{') && line.ends_with('}') {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) {
                    return Some(Value::Object(map));
                }
            }
        }
        if !auto {
            return None;
        }
    }

    if auto || strategy == ExtractStrategy::Brace {
        let start = output.rfind('{')?;
        let end = output.rfind('}')?;
        if end >= start {
            if let Ok(v) = serde_json::from_str::<Value>(&output[start..=end]) {
                return Some(v);
            }
        }
    }

    None
}

/// Known sandbox denial substrings and their user-facing labels.
const SANDBOX_ERROR_LABELS: &[(&str, &str)] = &[
    (
        "BlockingIOError",
        "Sandbox blocked process creation (fork/exec not allowed)",
    ),
    (
        "Resource temporarily unavailable",
        "Sandbox blocked system resource access",
    ),
    ("Operation not permitted", "Sandbox blocked this operation"),
    ("Permission denied", "Sandbox denied file/resource access"),
    ("sandbox-exec", "Sandbox restriction triggered"),
    ("seccomp", "System call blocked by sandbox"),
    ("namespace", "Namespace isolation restriction"),
];

/// Map known OS sandbox error strings to a short label with a hint to relax
/// the isolation tier. Raw tracebacks are suppressed for these; unknown
/// errors pass through verbatim so the skill's own exceptions stay visible.
pub fn format_sandbox_error(error_msg: &str) -> String {
    for (pattern, label) in SANDBOX_ERROR_LABELS {
        if error_msg.contains(pattern) {
            return format!("{} (run at sandbox level 1 if intentional)", label);
        }
    }
    error_msg.to_string()
}
