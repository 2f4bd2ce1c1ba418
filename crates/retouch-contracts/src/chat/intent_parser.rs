use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{lookup, ArgShape};

/// One parsed line of session input.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    /// Edit instruction, for plain-text lines.
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: impl Into<String>) -> Self {
        self.command_args
            .insert(key.to_string(), Value::String(value.into()));
        self
    }

    /// Trimmed argument, or `None` when missing or blank.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Turns one line of session input into an intent.
///
/// Lines starting with `/name` are commands; anything else is an edit
/// instruction for the current source image.
pub fn parse_intent(text: &str) -> Intent {
    let line = text.trim();
    if line.is_empty() {
        return Intent::new("noop", text);
    }

    let Some((name, arg)) = split_command(line) else {
        let mut intent = Intent::new("edit", text);
        intent.prompt = Some(line.to_string());
        return intent;
    };

    let Some(spec) = lookup(&name) else {
        return Intent::new("unknown", text)
            .with_arg("command", name)
            .with_arg("arg", arg);
    };

    let intent = Intent::new(spec.action, text);
    match spec.shape {
        ArgShape::Raw(key) => intent.with_arg(key, arg),
        ArgShape::Path => intent.with_arg("path", single_path(arg)),
        ArgShape::Bare => intent,
    }
}

/// Lowercased command name and the trimmed rest of the line. A `/` that is
/// not followed by a name is plain text.
fn split_command(line: &str) -> Option<(String, &str)> {
    let tail = line.strip_prefix('/')?;
    let end = tail
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .unwrap_or(tail.len());
    if end == 0 {
        return None;
    }
    Some((tail[..end].to_ascii_lowercase(), tail[end..].trim()))
}

fn single_path(arg: &str) -> String {
    match shell_words::split(arg) {
        Ok(parts) => parts.join(" "),
        Err(_) => arg.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}
