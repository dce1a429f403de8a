//! Standard filters. Both work on whole top-level records, so nested
//! objects are never split.

use serde_json::Value;

use crate::bind::DynOptions;
use crate::commands::{Pipe, options_of};
use crate::error::ExecError;
use crate::pipeline::{Assembler, StageInput, StageOutput, tokens_of};

#[derive(Debug, Default)]
pub struct LimitOptions {
    pub count: usize,
}

#[derive(Debug, Default)]
pub struct GrepOptions {
    pub pattern: String,
    pub ignore_case: bool,
    pub invert: bool,
}

crate::bind_options! {
    LimitOptions {
        count: "*=#1",
    }
    GrepOptions {
        pattern: "*=#1",
        ignore_case: "*=i|ignore-case",
        invert: "*=v|invert",
    }
}

/// `limit N`: pass the first N records, then stop reading.
pub struct Limit;

impl Pipe for Limit {
    fn new_options(&self) -> Box<dyn DynOptions> {
        Box::new(LimitOptions::default())
    }

    fn run(
        &self,
        options: &dyn DynOptions,
        input: &mut StageInput,
        output: &mut StageOutput,
    ) -> Result<(), ExecError> {
        let count = options_of::<LimitOptions>("limit", options)?.count;
        let mut seen = 0;
        let mut asm = Assembler::new();
        while seen < count {
            let Some(token) = input.next_token() else {
                break;
            };
            if asm.push(token.clone()).is_some() {
                seen += 1;
            }
            output.send(token)?;
        }
        Ok(())
    }
}

/// `grep [-i] [-v] PATTERN`: keep records whose text contains PATTERN.
pub struct Grep;

impl Pipe for Grep {
    fn new_options(&self) -> Box<dyn DynOptions> {
        Box::new(GrepOptions::default())
    }

    fn run(
        &self,
        options: &dyn DynOptions,
        input: &mut StageInput,
        output: &mut StageOutput,
    ) -> Result<(), ExecError> {
        let opts = options_of::<GrepOptions>("grep", options)?;
        let pattern = if opts.ignore_case {
            opts.pattern.to_lowercase()
        } else {
            opts.pattern.clone()
        };

        let mut asm = Assembler::new();
        let mut tokens = Vec::new();
        while let Some(token) = input.next_token() {
            let Some((name, value)) = asm.push(token) else {
                continue;
            };
            let mut text = record_text(name.as_deref(), &value);
            if opts.ignore_case {
                text = text.to_lowercase();
            }
            if text.contains(&pattern) != opts.invert {
                tokens_of(name, &value, &mut tokens);
                for token in tokens.drain(..) {
                    output.send(token)?;
                }
            }
        }
        Ok(())
    }
}

/// What a record is matched against: `name: value`, strings unquoted.
fn record_text(name: Option<&str>, value: &Value) -> String {
    let value = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match name {
        Some(name) => format!("{name}: {value}"),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::run;
    use serde_json::json;

    #[test]
    fn limit_passes_first_records() {
        assert_eq!(run(&["seq 10 | limit 3"]).0, "1\n2\n3\n");
        assert_eq!(run(&["seq 10 | limit 0"]).0, "");
        assert_eq!(run(&["seq 2 | limit 5"]).0, "1\n2\n");
    }

    #[test]
    fn grep_filters_records() {
        assert_eq!(run(&["seq 20 | grep 1 | limit 3"]).0, "1\n10\n11\n");
        assert_eq!(run(&["seq 5 | grep -v 3"]).0, "1\n2\n4\n5\n");
    }

    #[test]
    fn grep_ignores_case_on_request() {
        assert_eq!(run(&["echo Hello | grep hello"]).0, "");
        assert_eq!(run(&["echo Hello | grep -i hello"]).0, "Hello\n");
    }

    #[test]
    fn grep_requires_a_pattern() {
        let (_, diag) = run(&["seq 3 | grep"]);
        assert!(diag.contains("missing argument #1"), "{diag}");
    }

    #[test]
    fn record_text_includes_name() {
        assert_eq!(record_text(Some("host"), &json!("db1")), "host: db1");
        assert_eq!(record_text(None, &json!({"a": 1})), "{\"a\":1}");
    }
}
