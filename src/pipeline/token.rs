//! Structured output tokens and helpers to fold them back into values.

use serde_json::{Map, Value};

/// One element of a command's structured output stream.
///
/// Names are keys inside the enclosing object; items of arrays and
/// top-level records carry `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputToken {
    ObjectStart(Option<String>),
    ArrayStart(Option<String>),
    /// Closes the innermost object or array.
    ObjectEnd,
    Value(Option<String>, Value),
    EndOfStream,
}

/// Rebuilds complete top-level records from a token stream.
#[derive(Debug, Default)]
pub struct Assembler {
    stack: Vec<(Option<String>, Value)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feed one token. Returns a record once it is complete at depth 0.
    pub fn push(&mut self, token: OutputToken) -> Option<(Option<String>, Value)> {
        match token {
            OutputToken::ObjectStart(name) => {
                self.stack.push((name, Value::Object(Map::new())));
                None
            }
            OutputToken::ArrayStart(name) => {
                self.stack.push((name, Value::Array(Vec::new())));
                None
            }
            OutputToken::ObjectEnd => {
                let (name, value) = self.stack.pop()?;
                self.attach(name, value)
            }
            OutputToken::Value(name, value) => self.attach(name, value),
            OutputToken::EndOfStream => None,
        }
    }

    /// Close any containers left open by a truncated stream.
    pub fn finish(&mut self) -> Option<(Option<String>, Value)> {
        let mut done = None;
        while let Some((name, value)) = self.stack.pop() {
            done = self.attach(name, value);
        }
        done
    }

    fn attach(&mut self, name: Option<String>, value: Value) -> Option<(Option<String>, Value)> {
        match self.stack.last_mut() {
            None => Some((name, value)),
            Some((_, Value::Array(items))) => {
                items.push(value);
                None
            }
            Some((_, Value::Object(map))) => {
                let key = name.unwrap_or_else(|| map.len().to_string());
                map.insert(key, value);
                None
            }
            Some(_) => None,
        }
    }
}

/// Decompose a value into the tokens that would have produced it.
pub fn tokens_of(name: Option<String>, value: &Value, out: &mut Vec<OutputToken>) {
    match value {
        Value::Object(map) => {
            out.push(OutputToken::ObjectStart(name));
            for (key, item) in map {
                tokens_of(Some(key.clone()), item, out);
            }
            out.push(OutputToken::ObjectEnd);
        }
        Value::Array(items) => {
            out.push(OutputToken::ArrayStart(name));
            for item in items {
                tokens_of(None, item, out);
            }
            out.push(OutputToken::ObjectEnd);
        }
        scalar => out.push(OutputToken::Value(name, scalar.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assembles_nested_record() {
        let mut asm = Assembler::new();
        let stream = vec![
            OutputToken::ObjectStart(None),
            OutputToken::Value(Some("host".into()), json!("db1")),
            OutputToken::ArrayStart(Some("ports".into())),
            OutputToken::Value(None, json!(22)),
            OutputToken::Value(None, json!(5432)),
            OutputToken::ObjectEnd,
        ];
        for token in stream {
            assert!(asm.push(token).is_none());
        }
        let (name, value) = asm.push(OutputToken::ObjectEnd).unwrap();
        assert_eq!(name, None);
        assert_eq!(value, json!({"host": "db1", "ports": [22, 5432]}));
    }

    #[test]
    fn scalars_at_top_level_are_records() {
        let mut asm = Assembler::new();
        let got = asm.push(OutputToken::Value(Some("n".into()), json!(1)));
        assert_eq!(got, Some((Some("n".into()), json!(1))));
    }

    #[test]
    fn decomposition_matches_assembly() {
        let value = json!({"a": [1, {"b": true}], "c": null});
        let mut tokens = Vec::new();
        tokens_of(None, &value, &mut tokens);
        let mut asm = Assembler::new();
        let rebuilt = tokens.into_iter().find_map(|t| asm.push(t));
        assert_eq!(rebuilt, Some((None, value)));
    }
}
