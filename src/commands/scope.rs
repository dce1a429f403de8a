use log::debug;

use crate::bind::DynOptions;
use crate::commands::Command;
use crate::error::ExecError;
use crate::repl::{Context, Request, Session};

#[derive(Debug, Default)]
pub struct InOptions {
    pub path: String,
}

crate::bind_options! {
    InOptions {
        path: "*=#1",
    }
}

/// `in PATH { … }`: run the block with PATH pushed onto the context path.
///
/// The previous path is restored afterwards, whether or not the block
/// failed. Variables set inside the block are kept.
pub struct In;

impl Command for In {
    fn new_options(&self, _ctx: &Context) -> Box<dyn DynOptions> {
        Box::new(InOptions::default())
    }

    fn execute(&self, session: &mut Session, req: &mut Request<'_>) -> Result<(), ExecError> {
        let path = req.options::<InOptions>()?.path.clone();
        let Some(block) = req.block() else {
            return Err(ExecError::failed("missing { … } block"));
        };
        let saved = session.context().path();
        session.context_mut().cd(&path);
        debug!("in {}: entering block", session.context());
        let result = session.run_block(block);
        session.context_mut().cd(&saved);
        result
    }
}

/// Print the context path.
pub struct Pwd;

impl Command for Pwd {
    fn execute(&self, _session: &mut Session, req: &mut Request<'_>) -> Result<(), ExecError> {
        let path = req.context().path();
        req.output()?.write_value(None, path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::run;

    #[test]
    fn block_runs_in_pushed_path() {
        let (out, diag) = run(&["in hosts/db { pwd; in .. { pwd } }; pwd"]);
        assert_eq!(diag, "");
        assert_eq!(out, "/hosts/db\n/hosts\n/\n");
    }

    #[test]
    fn path_restored_after_failure() {
        let (out, diag) = run(&["in db { pwd; bogus; pwd }; pwd"]);
        assert_eq!(out, "/db\n/db\n/\n");
        assert!(diag.contains("bogus: not found or not applicable"), "{diag}");
        assert!(diag.contains("nested block failed"), "{diag}");
    }

    #[test]
    fn block_is_required() {
        let (_, diag) = run(&["in db"]);
        assert!(diag.contains("in: missing { … } block"), "{diag}");
    }
}
