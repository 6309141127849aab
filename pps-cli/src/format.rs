//! Attribute argument parsing and record rendering

use console::style;
use pps_channel::{decode, PpsError, Record, Value};

/// Build a record from `name:type:value` arguments
///
/// Arguments use the wire grammar directly, so `state::up`,
/// `count:n:3` and `tags:json:["a"]` are all accepted.
pub fn parse_attributes(object: Option<&str>, attrs: &[String]) -> Result<Record, PpsError> {
    let mut record = decode(attrs.join("\n").as_bytes())?;
    if let Some(name) = object {
        record.set_object_name(Some(name.to_string()));
    }
    Ok(record)
}

/// Parse a JSON text into a value
///
/// Line breaks are only whitespace in JSON, so they are folded to spaces
/// before the text is framed as a single attribute line.
pub fn parse_json(text: &str) -> Result<Value, PpsError> {
    let line = text.replace(['\n', '\r'], " ");
    let record = decode(format!("v:json:{}", line).as_bytes())?;
    match record.get("v") {
        Some(value) if record.len() == 1 => Ok(value.clone()),
        _ => Err(PpsError::Decode {
            line: 1,
            reason: "expected a single JSON value".to_string(),
        }),
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => format!("{:?}", other),
    }
}

/// One line per attribute, aligned on the name column
pub fn render(record: &Record) -> String {
    let width = record.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    if let Some(name) = record.object_name() {
        out.push_str(&format!("{}\n", style(format!("@{}", name)).cyan().bold()));
    }
    for (name, value) in record.iter() {
        out.push_str(&format!(
            "   {:width$}  {:7} {}\n",
            style(name).green(),
            style(type_label(value)).dim(),
            value_text(value),
            width = width
        ));
    }
    out
}
