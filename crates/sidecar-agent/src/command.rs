//! Command detection.
//!
//! A model reply is command-shaped only when the entire trimmed reply is
//! a JSON object or array and every element carries an `action` field.
//! Anything else, including valid JSON without `action`, is plain text.

use serde_json::Value;

/// One structured command from the model, e.g.
/// `{"action": "FETCH", "urls": ["https://example.com"]}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(flatten)]
    pub args: serde_json::Map<String, Value>,
}

impl Command {
    /// The `urls` argument of a FETCH command, if present and well-formed.
    pub fn urls(&self) -> Vec<String> {
        self.args
            .get("urls")
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    PlainText,
    Commands(Vec<Command>),
}

/// Classify a model reply as plain text or a command set.
pub fn classify(reply: &str) -> Classification {
    let trimmed = reply.trim();

    // Pure JSON only: the whole trimmed reply must be one literal, with no
    // surrounding natural language.
    let looks_like_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if !looks_like_json {
        return Classification::PlainText;
    }

    let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
        return Classification::PlainText;
    };

    let elements = match parsed {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut commands = Vec::with_capacity(elements.len());
    for element in elements {
        let Value::Object(mut fields) = element else {
            return Classification::PlainText;
        };
        // Key presence is the test. A non-string value still names an
        // action; the executor reports it as unknown downstream.
        let action = match fields.remove("action") {
            Some(Value::String(action)) => action,
            Some(other) => other.to_string(),
            None => return Classification::PlainText,
        };
        commands.push(Command {
            action,
            args: fields,
        });
    }
    Classification::Commands(commands)
}
