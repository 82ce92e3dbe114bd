// MOBATCH WIRE FORMAT
// ONE MESSAGE = ONE UTF-8 JSON ARRAY OF STRING-ENCODED SCALARS, NEWLINE-TERMINATED.
// REQUESTS: POSITIONAL TELEMETRY FIELDS. RESPONSES: [] OR ["<batch size>"].

use serde_json::Value;

use crate::error::RequestError;

pub fn decode_fields(line: &str) -> Result<Vec<String>, RequestError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let value: Value = serde_json::from_str(line)
        .map_err(|e| RequestError::MalformedMessage(format!("not json: {e}")))?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(RequestError::MalformedMessage(format!(
                "expected array, got {}",
                kind(&other)
            )))
        }
    };

    // CLIENTS SEND STRINGS; BARE NUMBERS ARE ACCEPTED AS THEIR TEXT FORM
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Null => Ok(String::new()),
            other => Err(RequestError::MalformedMessage(format!(
                "unexpected {} element",
                kind(&other)
            ))),
        })
        .collect()
}

pub fn encode_response(values: &[u64]) -> String {
    let items: Vec<Value> = values.iter().map(|v| Value::String(v.to_string())).collect();
    let mut out = Value::Array(items).to_string();
    out.push('\n');
    out
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_string_array() {
        let fields = decode_fields("[\"a\", \"0\", \"12.5\"]\n").unwrap();
        assert_eq!(fields, vec!["a", "0", "12.5"]);
    }

    #[test]
    fn accepts_bare_numbers() {
        let fields = decode_fields("[\"a\", 1, 2.5]").unwrap();
        assert_eq!(fields, vec!["a", "1", "2.5"]);
    }

    #[test]
    fn rejects_non_array() {
        assert!(matches!(decode_fields("{\"a\":1}"), Err(RequestError::MalformedMessage(_))));
        assert!(matches!(decode_fields("garbage"), Err(RequestError::MalformedMessage(_))));
        assert!(matches!(decode_fields("[[1]]"), Err(RequestError::MalformedMessage(_))));
    }

    #[test]
    fn response_framing() {
        assert_eq!(encode_response(&[72]), "[\"72\"]\n");
        assert_eq!(encode_response(&[]), "[]\n");
    }
}
