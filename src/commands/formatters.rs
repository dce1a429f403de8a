//! Standard formatters.

use std::io::Write;

use serde_json::{Map, Value};

use crate::bind::DynOptions;
use crate::commands::{Formatter, options_of};
use crate::error::ExecError;
use crate::pipeline::{Assembler, OutputToken, StageInput};

#[derive(Debug, Default)]
pub struct JsonOptions {
    pub compact: bool,
}

crate::bind_options! {
    JsonOptions {
        compact: "*=c|compact",
    }
}

/// Human-readable text, one line per value, nested containers indented.
pub struct Text;

impl Formatter for Text {
    fn run(
        &self,
        _options: &dyn DynOptions,
        input: &mut StageInput,
        out: &mut dyn Write,
    ) -> Result<(), ExecError> {
        // One entry per open container: whether it indented its children.
        let mut open: Vec<bool> = Vec::new();
        let mut pad = 0;
        for token in input {
            match token {
                OutputToken::ObjectStart(name) | OutputToken::ArrayStart(name) => {
                    let label = match name {
                        Some(name) => Some(format!("{name}:")),
                        None if !open.is_empty() => Some("-".to_string()),
                        None => None,
                    };
                    if let Some(label) = &label {
                        writeln!(out, "{:pad$}{label}", "")?;
                        pad += 2;
                    }
                    open.push(label.is_some());
                }
                OutputToken::ObjectEnd => {
                    if open.pop() == Some(true) {
                        pad -= 2;
                    }
                }
                OutputToken::Value(name, value) => {
                    let value = scalar_text(&value);
                    match name {
                        Some(name) => writeln!(out, "{:pad$}{name}: {value}", "")?,
                        None => writeln!(out, "{:pad$}{value}", "")?,
                    }
                }
                OutputToken::EndOfStream => break,
            }
        }
        Ok(())
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One JSON document per top-level record; `-compact` for one per line.
pub struct Json;

impl Formatter for Json {
    fn new_options(&self) -> Box<dyn DynOptions> {
        Box::new(JsonOptions::default())
    }

    fn run(
        &self,
        options: &dyn DynOptions,
        input: &mut StageInput,
        out: &mut dyn Write,
    ) -> Result<(), ExecError> {
        let compact = options_of::<JsonOptions>("json", options)?.compact;
        let mut asm = Assembler::new();
        for token in &mut *input {
            if let Some(record) = asm.push(token) {
                write_record(out, record, compact)?;
            }
        }
        if let Some(record) = asm.finish() {
            write_record(out, record, compact)?;
        }
        Ok(())
    }
}

/// Named top-level values become single-key objects.
fn write_record(
    out: &mut dyn Write,
    (name, value): (Option<String>, Value),
    compact: bool,
) -> Result<(), ExecError> {
    let value = match name {
        Some(name) => Value::Object(Map::from_iter([(name, value)])),
        None => value,
    };
    if compact {
        serde_json::to_writer(&mut *out, &value)?;
    } else {
        serde_json::to_writer_pretty(&mut *out, &value)?;
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::run;
    use crate::pipeline::Output;
    use crate::repl::SharedBuffer;
    use serde_json::json;

    fn render(formatter: impl Formatter + 'static, compact: bool, value: Value) -> String {
        let buffer = SharedBuffer::new();
        let formatter = std::sync::Arc::new(formatter);
        let mut output = Output::start(
            Vec::new(),
            Box::new(move |input: &mut StageInput, out: &mut dyn Write| {
                formatter.run(&JsonOptions { compact }, input, out)
            }),
            Box::new(buffer.clone()),
            4,
        )
        .unwrap();
        output.write_tree(None, &value);
        output.close().unwrap();
        buffer.contents()
    }

    #[test]
    fn text_indents_nested_containers() {
        let value = json!({"host": "db1", "ports": [22, 5432], "meta": {"up": true}});
        assert_eq!(
            render(Text, false, value),
            "host: db1\nmeta:\n  up: true\nports:\n  22\n  5432\n"
        );
    }

    #[test]
    fn text_marks_unnamed_nested_objects() {
        let value = json!([{"a": 1}, {"a": 2}]);
        assert_eq!(render(Text, false, value), "-\n  a: 1\n-\n  a: 2\n");
    }

    #[test]
    fn json_compact_and_pretty() {
        let value = json!({"a": [1, 2]});
        assert_eq!(render(Json, true, value.clone()), "{\"a\":[1,2]}\n");
        assert_eq!(
            render(Json, false, value),
            "{\n  \"a\": [\n    1,\n    2\n  ]\n}\n"
        );
    }

    #[test]
    fn json_redirection_wraps_named_values() {
        assert_eq!(run(&["echo -n k v | json -c"]).0, "{\"k\":\"v\"}\n");
        assert_eq!(run(&["seq 2 | json --compact"]).0, "1\n2\n");
    }
}
