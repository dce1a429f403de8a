use crate::bind::DynOptions;
use crate::commands::Command;
use crate::error::ExecError;
use crate::repl::{Context, Request, Session};

#[derive(Debug, Default)]
pub struct EchoOptions {
    pub words: Vec<String>,
    /// Field name attached to the value.
    pub name: Option<String>,
}

crate::bind_options! {
    EchoOptions {
        words: "*=#1,opt",
        name: "*=n|name,opt",
    }
}

/// Write the arguments, space-joined, as a single value.
pub struct Echo;

impl Command for Echo {
    fn new_options(&self, _ctx: &Context) -> Box<dyn DynOptions> {
        Box::new(EchoOptions::default())
    }

    fn execute(&self, _session: &mut Session, req: &mut Request<'_>) -> Result<(), ExecError> {
        let opts = req.options::<EchoOptions>()?;
        let line = opts.words.join(" ");
        let name = opts.name.clone();
        req.output()?.write_value(name.as_deref(), line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::Options;
    use crate::commands::testing::run;

    #[test]
    fn joins_words() {
        let (out, diag) = run(&["echo hello   'big world'"]);
        assert_eq!(out, "hello big world\n");
        assert_eq!(diag, "");
    }

    #[test]
    fn named_value() {
        let (out, _) = run(&["echo -n greeting hi there"]);
        assert_eq!(out, "greeting: hi there\n");
    }

    #[test]
    fn option_after_words_is_rejected() {
        let (out, diag) = run(&["echo a -n x"]);
        assert_eq!(out, "");
        assert!(diag.contains("unexpected option after arguments: -n"), "{diag}");
    }

    #[test]
    fn usage_lists_options() {
        assert_eq!(
            EchoOptions::fields().usage("echo"),
            "echo [-n|--name <string>] [words...]"
        );
    }
}
