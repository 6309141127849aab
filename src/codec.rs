//! Wire codec for PPS attribute text
//!
//! Each publish is UTF-8 text, one attribute per line:
//!
//! ```text
//! @object
//! name:type:value
//! ```
//!
//! The type tag is empty for raw strings, `n` for numbers, `b` for
//! booleans and `json` for arrays, objects, null and strings that
//! contain a newline. The `@object` header line is optional.

use crate::error::{EncodeError, PpsError, Result};
use crate::value::{Record, Value};
use serde_json::Number;
use std::collections::BTreeMap;

/// Largest magnitude written as a JSON integer
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0; // 2^53

const TAG_STRING: &str = "";
const TAG_NUMBER: &str = "n";
const TAG_BOOL: &str = "b";
const TAG_JSON: &str = "json";

/// Encode a record into its wire text
pub fn encode(record: &Record) -> Result<Vec<u8>> {
    let mut out = String::new();

    if let Some(name) = record.object_name() {
        if name.is_empty() || name.contains('\n') {
            return Err(EncodeError::InvalidName(name.to_string()).into());
        }
        out.push('@');
        out.push_str(name);
    }

    for (name, value) in record.iter() {
        if !out.is_empty() {
            out.push('\n');
        }
        encode_line(&mut out, name, value, false)?;
    }

    Ok(out.into_bytes())
}

/// Encode a server message in the `msg` / `id` / `dat` convention
///
/// `dat` is always written with the `json` tag so the receiver sees the
/// same structure regardless of its type.
pub fn encode_message(msg: &str, id: Option<&str>, dat: &Value) -> Result<Vec<u8>> {
    let mut out = String::new();
    encode_line(&mut out, "msg", &Value::String(msg.to_string()), false)?;
    if let Some(id) = id {
        out.push('\n');
        encode_line(&mut out, "id", &Value::String(id.to_string()), false)?;
    }
    out.push('\n');
    encode_line(&mut out, "dat", dat, true)?;
    Ok(out.into_bytes())
}

fn encode_line(out: &mut String, name: &str, value: &Value, force_json: bool) -> Result<()> {
    if !is_valid_name(name) {
        return Err(EncodeError::InvalidName(name.to_string()).into());
    }

    let (tag, text) = match value {
        _ if force_json => (TAG_JSON, to_json(name, value)?.to_string()),
        Value::Number(n) => {
            if !n.is_finite() {
                return Err(EncodeError::NonFinite {
                    name: name.to_string(),
                }
                .into());
            }
            (TAG_NUMBER, n.to_string())
        }
        Value::Bool(b) => (TAG_BOOL, b.to_string()),
        Value::String(s) if s.contains('\n') => (TAG_JSON, to_json(name, value)?.to_string()),
        Value::String(s) => (TAG_STRING, s.clone()),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            (TAG_JSON, to_json(name, value)?.to_string())
        }
    };

    out.push_str(name);
    out.push(':');
    out.push_str(tag);
    out.push(':');
    out.push_str(&text);
    Ok(())
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('@') && !name.contains([':', '\n'])
}

fn to_json(name: &str, value: &Value) -> std::result::Result<serde_json::Value, EncodeError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(json_number(name, *n)?),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| to_json(name, item))
                .collect::<std::result::Result<_, _>>()?,
        ),
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| to_json(name, v).map(|json| (k.clone(), json)))
                .collect::<std::result::Result<_, _>>()?,
        ),
    })
}

fn json_number(name: &str, n: f64) -> std::result::Result<Number, EncodeError> {
    let non_finite = || EncodeError::NonFinite {
        name: name.to_string(),
    };
    if !n.is_finite() {
        return Err(non_finite());
    }
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INT {
        return Ok(Number::from(n as i64));
    }
    Number::from_f64(n).ok_or_else(non_finite)
}

fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

/// Decode wire text into a record
///
/// Empty lines are skipped and a repeated attribute keeps its last value.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PpsError::decode(0, format!("invalid UTF-8: {}", e)))?;

    let mut record = Record::new();
    let mut seen_line = false;

    for (idx, line) in text.split('\n').enumerate() {
        let lineno = idx + 1;
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('@') {
            if seen_line || record.object_name().is_some() {
                return Err(PpsError::decode(lineno, "object header must be the first line"));
            }
            if name.is_empty() {
                return Err(PpsError::decode(lineno, "empty object name"));
            }
            record.set_object_name(Some(name.to_string()));
            seen_line = true;
            continue;
        }
        seen_line = true;

        let (name, rest) = line
            .split_once(':')
            .ok_or_else(|| PpsError::decode(lineno, "missing type separator"))?;
        if name.is_empty() {
            return Err(PpsError::decode(lineno, "empty attribute name"));
        }
        let (tag, text) = rest
            .split_once(':')
            .ok_or_else(|| PpsError::decode(lineno, "missing value separator"))?;

        let value = match tag {
            TAG_STRING => Value::String(text.to_string()),
            TAG_NUMBER => match text.parse::<f64>() {
                Ok(n) if n.is_finite() => Value::Number(n),
                _ => return Err(PpsError::decode(lineno, format!("invalid number '{}'", text))),
            },
            TAG_BOOL => match text {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => return Err(PpsError::decode(lineno, format!("invalid boolean '{}'", text))),
            },
            TAG_JSON => {
                let json = serde_json::from_str(text)
                    .map_err(|e| PpsError::decode(lineno, format!("invalid json: {}", e)))?;
                from_json(json)
            }
            other => return Err(PpsError::decode(lineno, format!("unknown type tag '{}'", other))),
        };

        record.insert(name, value);
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(record: &Record) -> String {
        String::from_utf8(encode(record).unwrap()).unwrap()
    }

    #[test]
    fn test_encode_scalar_forms() {
        assert_eq!(text(&Record::new().with("boolVal", true)), "boolVal:b:true");
        assert_eq!(text(&Record::new().with("strVal", "test")), "strVal::test");
        assert_eq!(text(&Record::new().with("doubleVal", 10.5)), "doubleVal:n:10.5");
    }

    #[test]
    fn test_encode_json_forms() {
        assert_eq!(
            text(&Record::new().with("arrayVal", vec![10, 20])),
            "arrayVal:json:[10,20]"
        );
        assert_eq!(
            text(&Record::new().with("nullVal", Value::Null)),
            "nullVal:json:null"
        );

        let mut obj = BTreeMap::new();
        obj.insert("b".to_string(), Value::Bool(false));
        obj.insert("a".to_string(), Value::Number(1.5));
        assert_eq!(
            text(&Record::new().with("objVal", obj)),
            r#"objVal:json:{"a":1.5,"b":false}"#
        );
    }

    #[test]
    fn test_encode_object_header_and_order() {
        let record = Record::named("status").with("b", 2).with("a", "x");
        assert_eq!(text(&record), "@status\nb:n:2\na::x");
    }

    #[test]
    fn test_multiline_string_goes_through_json() {
        let record = Record::new().with("s", "line1\nline2");
        assert_eq!(text(&record), r#"s:json:"line1\nline2""#);
        assert_eq!(decode(&encode(&record).unwrap()).unwrap(), record);
    }

    #[test]
    fn test_encode_rejects_bad_input() {
        for name in ["", "a:b", "a\nb", "@a"] {
            let err = encode(&Record::new().with(name, 1)).unwrap_err();
            assert!(matches!(err, PpsError::Encode(EncodeError::InvalidName(_))));
        }
        let err = encode(&Record::new().with("x", f64::NAN)).unwrap_err();
        assert!(matches!(err, PpsError::Encode(EncodeError::NonFinite { .. })));
        let err = encode(&Record::new().with("x", vec![f64::INFINITY])).unwrap_err();
        assert!(matches!(err, PpsError::Encode(EncodeError::NonFinite { .. })));
    }

    #[test]
    fn test_round_trip() {
        let mut nested = BTreeMap::new();
        nested.insert("inner".to_string(), Value::from(vec!["a", "b"]));
        nested.insert("flag".to_string(), Value::Null);

        let record = Record::named("device")
            .with("doubleVal", 10.5)
            .with("intVal", -3)
            .with("big", 1e300)
            .with("boolVal", false)
            .with("strVal", "with:colons: inside")
            .with("empty", "")
            .with("arrayVal", vec![Value::Number(0.25), Value::Bool(true), Value::Null])
            .with("objVal", nested)
            .with("nullVal", Value::Null);

        let decoded = decode(&encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_typed_lines() {
        let record = decode(b"@obj\nn1:n:42\nb1:b:false\ns1::hello:world\nj1:json:{\"k\":[1]}\n").unwrap();
        assert_eq!(record.object_name(), Some("obj"));
        assert_eq!(record.get("n1"), Some(&Value::Number(42.0)));
        assert_eq!(record.get("b1"), Some(&Value::Bool(false)));
        assert_eq!(record.get("s1").and_then(Value::as_str), Some("hello:world"));

        let mut obj = BTreeMap::new();
        obj.insert("k".to_string(), Value::Array(vec![Value::Number(1.0)]));
        assert_eq!(record.get("j1"), Some(&Value::Object(obj)));
    }

    #[test]
    fn test_decode_last_duplicate_wins() {
        let record = decode(b"a::1\na::2").unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("a").and_then(Value::as_str), Some("2"));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let cases: &[&[u8]] = &[
            b"a:json:[1,2",
            b"a:json:{\"k\":",
            b"a:x:1",
            b"a:n:ten",
            b"a:n:inf",
            b"a:b:yes",
            b"no-separator",
            b"a:",
            b":n:1",
            b"a::ok\n@late",
            b"a::\xff\xfe",
        ];
        for case in cases {
            let err = decode(case).unwrap_err();
            assert!(
                matches!(err, PpsError::Decode { .. }),
                "expected decode error for {:?}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn test_decode_reports_line_number() {
        match decode(b"a::1\n\nb:q:2") {
            Err(PpsError::Decode { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encode_message() {
        let bytes = encode_message("play", Some("7"), &Value::from(vec![1, 2])).unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            "msg::play\nid::7\ndat:json:[1,2]"
        );

        let scalar = encode_message("stop", None, &Value::from("now")).unwrap();
        assert_eq!(String::from_utf8(scalar.clone()).unwrap(), "msg::stop\ndat:json:\"now\"");
        assert_eq!(decode(&scalar).unwrap().get("dat"), Some(&Value::from("now")));
    }
}
