use crate::bind::DynOptions;
use crate::commands::{Command, CompletionRequest};
use crate::error::ExecError;
use crate::repl::{Context, Request, Session};

#[derive(Debug, Default)]
pub struct SetOptions {
    pub unset: bool,
    pub name: Option<String>,
    pub value: Option<String>,
}

crate::bind_options! {
    SetOptions {
        unset: "*=u|unset",
        name: "*=#1,opt",
        value: "*=#2,opt",
    }
}

/// Session variables.
///
/// `set` lists them, `set NAME` shows one, `set NAME VALUE` assigns and
/// `set -u NAME` removes. Values are visible to later commands as `$NAME`.
pub struct Set;

impl Command for Set {
    fn new_options(&self, _ctx: &Context) -> Box<dyn DynOptions> {
        Box::new(SetOptions::default())
    }

    fn complete(&self, ctx: &Context, req: &mut CompletionRequest) {
        if req.args.is_empty() {
            for name in ctx.vars().keys() {
                req.add(name.clone());
            }
        }
    }

    fn execute(&self, session: &mut Session, req: &mut Request<'_>) -> Result<(), ExecError> {
        let opts = req.options::<SetOptions>()?;
        let (unset, name, value) = (opts.unset, opts.name.clone(), opts.value.clone());
        match (name, value) {
            (Some(name), _) if unset => {
                if session.context_mut().unset_var(&name).is_none() {
                    return Err(ExecError::failed(format!("{name} is not set")));
                }
            }
            (None, _) if unset => return Err(ExecError::failed("-unset needs a name")),
            (Some(name), Some(value)) => session.context_mut().set_var(name, value),
            (Some(name), None) => {
                let value = session
                    .context()
                    .var(&name)
                    .map(str::to_string)
                    .ok_or_else(|| ExecError::failed(format!("{name} is not set")))?;
                req.output()?.write_value(Some(name.as_str()), value);
            }
            (None, _) => {
                let vars = session.context().vars().clone();
                let output = req.output()?;
                for (name, value) in &vars {
                    output.write_value(Some(name.as_str()), value.as_str());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::run;

    #[test]
    fn assigned_values_interpolate() {
        let (out, diag) = run(&["set target db1; echo host-$target \"${target}:5432\" '$target'"]);
        assert_eq!(diag, "");
        assert_eq!(out, "host-db1 db1:5432 $target\n");
    }

    #[test]
    fn lists_and_shows_variables() {
        let (out, _) = run(&["set b 2; set a 1; set; set b"]);
        assert_eq!(out, "a: 1\nb: 2\nb: 2\n");
    }

    #[test]
    fn unset_removes() {
        let (out, diag) = run(&["set a 1; set -u a; set a"]);
        assert_eq!(out, "");
        assert!(diag.contains("set: a is not set"), "{diag}");
    }
}
