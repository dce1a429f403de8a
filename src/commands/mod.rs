//! Handler traits and the standard handler set.
//!
//! Four kinds of handlers can be registered: commands, pipes (filters),
//! formatters and sinks. Each declares its option struct through
//! `new_options`; the dispatch loop binds arguments onto it before the
//! handler runs. Defaults decline options and completion.

/// `echo`: write its arguments as one value.
pub mod echo;
/// `text` and `json` formatters.
pub mod formatters;
/// `limit` and `grep` filters.
pub mod pipes;
/// Handler registry keyed by name and kind.
pub mod registry;
/// `in` and `pwd`: context-path commands.
pub mod scope;
/// `seq`: stream a range of integers.
pub mod seq;
/// `stdout`, `file`, `sh` and in-memory sinks.
pub mod sinks;
/// `set`: session variables.
pub mod vars;

use std::io::Write;

pub use registry::{HandlerDescriptor, HandlerKind, Registry};

use crate::bind::{DynOptions, NoOptions, Options, downcast};
use crate::error::ExecError;
use crate::pipeline::{StageInput, StageOutput};
use crate::repl::{Context, Request, Session};

/// Candidate collection for one word being completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Handler whose arguments are being completed.
    pub command: String,
    /// Partial word under the cursor (possibly empty).
    pub word: String,
    /// Argument words already typed before `word`.
    pub args: Vec<String>,
    pub candidates: Vec<String>,
}

impl CompletionRequest {
    /// Offer `candidate` if it extends the current word.
    pub fn add(&mut self, candidate: impl Into<String>) {
        let candidate = candidate.into();
        if candidate.starts_with(&self.word) && !self.candidates.contains(&candidate) {
            self.candidates.push(candidate);
        }
    }
}

pub trait Command: Send + Sync {
    /// Whether the command may run in the given context state.
    fn is_applicable(&self, _ctx: &Context) -> bool {
        true
    }

    fn new_options(&self, _ctx: &Context) -> Box<dyn DynOptions> {
        Box::new(NoOptions)
    }

    fn complete(&self, _ctx: &Context, _req: &mut CompletionRequest) {}

    /// Run the bound request. Output goes through `req.output()`; a
    /// trailing block can be run with [`Session::run_block`].
    fn execute(&self, session: &mut Session, req: &mut Request<'_>) -> Result<(), ExecError>;
}

pub trait Pipe: Send + Sync {
    fn new_options(&self) -> Box<dyn DynOptions> {
        Box::new(NoOptions)
    }

    fn complete(&self, _req: &mut CompletionRequest) {}

    /// Transform the token stream. Returning early is fine: the remaining
    /// input is drained by the pipeline.
    fn run(
        &self,
        options: &dyn DynOptions,
        input: &mut StageInput,
        output: &mut StageOutput,
    ) -> Result<(), ExecError>;
}

pub trait Formatter: Send + Sync {
    fn new_options(&self) -> Box<dyn DynOptions> {
        Box::new(NoOptions)
    }

    fn complete(&self, _req: &mut CompletionRequest) {}

    fn run(
        &self,
        options: &dyn DynOptions,
        input: &mut StageInput,
        out: &mut dyn Write,
    ) -> Result<(), ExecError>;
}

pub trait Sink: Send + Sync {
    fn new_options(&self, _ctx: &Context) -> Box<dyn DynOptions> {
        Box::new(NoOptions)
    }

    fn complete(&self, _ctx: &Context, _req: &mut CompletionRequest) {}

    /// Open the destination the formatter writes into.
    fn new_sink(
        &self,
        options: &dyn DynOptions,
        ctx: &Context,
    ) -> Result<Box<dyn Write + Send>, ExecError>;
}

/// Downcast handler options to the struct the handler declared.
pub fn options_of<'o, T: Options>(
    handler: &str,
    options: &'o dyn DynOptions,
) -> Result<&'o T, ExecError> {
    downcast::<T>(options)
        .ok_or_else(|| ExecError::failed(format!("{handler}: unexpected option type")))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Registry;
    use super::sinks::Buffer;
    use crate::config::Config;
    use crate::repl::{Session, SharedBuffer};

    /// Run each line as a script against the standard registry with
    /// `stdout` captured. Returns `(stdout, diagnostics)`.
    pub(crate) fn run<S: AsRef<str>>(lines: &[S]) -> (String, String) {
        let stdout = Buffer::default();
        let mut registry = Registry::standard();
        registry.add_sink("stdout", "test", stdout.clone());
        let diag = SharedBuffer::new();
        let mut session = Session::new(Config::default_config(), registry);
        session.set_diagnostics(Box::new(diag.clone()));
        for line in lines {
            let _ = session.run_source(line.as_ref());
        }
        (stdout.contents(), diag.contents())
    }
}
