//! The dispatch loop.
//!
//! A [`Session`] reads physical lines until the tokenizer has a complete
//! logical line, then walks its commands in order. Each command is resolved
//! against the builtins and the [`Registry`], bound, given its redirection
//! chain and executed. Lexical, binding and dispatch errors are printed
//! with a caret under the offending token; execution errors are logged and
//! the loop goes on with the next command.

pub mod cancel;
pub mod context;
pub mod reader;
pub mod render;
pub mod request;

use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

pub use cancel::{CancelHandler, CancelHandlerFactory, FlagCancel, NoCancel};
pub use context::Context;
pub use reader::{EditorReader, LineReader, ReadError, ScriptedReader, SharedBuffer};
pub use request::{FormatterRequest, PipeRequest, Request, SinkRequest, SubRequest};

use crate::bind::{DynOptions, NoOptions, bind};
use crate::commands::{Command, CompletionRequest, HandlerKind, Registry};
use crate::config::Config;
use crate::error::{BindError, DispatchError, Error, ExecError};
use crate::parse::{
    Args, BlockWalker, CommandWalker, RedirWalker, Span, Token, TokenType, Tokenizer, tokenize,
};
use render::{render, render_lines};

/// Names handled by the loop itself; they cannot be registered.
pub const BUILTINS: [&str; 4] = ["cd", "exit", "reload", "source"];

const MAX_SOURCE_DEPTH: usize = 16;

#[derive(Debug, Default)]
struct CdOptions {
    path: Option<String>,
}

#[derive(Debug, Default)]
struct SourceOptions {
    file: PathBuf,
}

crate::bind_options! {
    CdOptions {
        path: "*=#1,opt",
    }
    SourceOptions {
        file: "*=#1",
    }
}

pub struct Session {
    config: Config,
    registry: Arc<Registry>,
    context: Context,
    tokenizer: Tokenizer,
    diag: Box<dyn Write + Send>,
    cancel: Box<dyn CancelHandlerFactory>,
    next_id: u64,
    exit: bool,
    depth: usize,
}

impl Session {
    pub fn new(config: Config, registry: Registry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            context: Context::new(),
            tokenizer: Tokenizer::new(),
            diag: Box::new(io::stderr()),
            cancel: Box::new(NoCancel),
            next_id: 0,
            exit: false,
            depth: 0,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Set once `exit` ran; the loop stops before the next command.
    pub fn exit_requested(&self) -> bool {
        self.exit
    }

    pub fn set_cancel_factory(&mut self, factory: Box<dyn CancelHandlerFactory>) {
        self.cancel = factory;
    }

    /// Where carets and error messages go outside of [`run`](Self::run).
    pub fn set_diagnostics(&mut self, diag: Box<dyn Write + Send>) {
        self.diag = diag;
    }

    /// Interactive loop over `reader` until EOF or `exit`.
    ///
    /// Ctrl-C discards the pending logical line. Diagnostics go to the
    /// reader's stderr.
    pub fn run(&mut self, reader: &mut dyn LineReader) -> Result<(), Error> {
        self.diag = reader.stderr();
        let result = self.read_loop(reader);
        reader.close();
        result
    }

    fn read_loop(&mut self, reader: &mut dyn LineReader) -> Result<(), Error> {
        while !self.exit {
            let settings = &self.config.settings;
            if self.tokenizer.expect_more() {
                reader.set_prompt(&settings.continuation_prompt);
            } else {
                reader.set_prompt(&settings.prompt);
            }
            let line = match reader.readline() {
                Ok(line) => line,
                Err(ReadError::Interrupted) => {
                    debug!("interrupted, discarding pending input");
                    self.tokenizer.reset();
                    continue;
                }
                Err(ReadError::Eof) => {
                    if self.tokenizer.expect_more() {
                        self.finish_line();
                    }
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if let Err(err) = self.tokenizer.feed(&line) {
                let text = render_lines(self.tokenizer.source(), err.span(), &err.to_string());
                self.diagnose(&text);
                self.tokenizer.reset();
                continue;
            }
            if !self.tokenizer.expect_more() {
                self.finish_line();
            }
        }
        Ok(())
    }

    fn finish_line(&mut self) {
        match self.tokenizer.finish() {
            Ok(script) => {
                // Failures were already reported command by command.
                let _ = self.run_block(script.walk());
            }
            Err(err) => {
                let text = render_lines(self.tokenizer.source(), err.span(), &err.to_string());
                self.diagnose(&text);
                self.tokenizer.reset();
            }
        }
    }

    /// Run a complete script, e.g. a file or a `-c` argument. Unbalanced
    /// braces fail immediately instead of waiting for more input.
    pub fn run_source(&mut self, text: &str) -> Result<(), Error> {
        let script = match tokenize(text) {
            Ok(script) => script,
            Err(err) => {
                let rendered = render_lines(text, err.span(), &err.to_string());
                self.diagnose(&rendered);
                return Err(err.into());
            }
        };
        self.run_block(script.walk())?;
        Ok(())
    }

    /// Execute every command of `block` in order.
    ///
    /// A failing command is reported and the rest still run; the block as a
    /// whole then fails with [`ExecError::Block`]. Commands use this to run
    /// their trailing `{ … }` block.
    pub fn run_block(&mut self, block: BlockWalker<'_>) -> Result<(), ExecError> {
        let mut failed = 0;
        for command in block {
            if self.exit {
                break;
            }
            if let Err(err) = self.dispatch(command) {
                self.report(command, &err);
                failed += 1;
            }
        }
        if failed > 0 {
            Err(ExecError::Block)
        } else {
            Ok(())
        }
    }

    fn dispatch(&mut self, walker: CommandWalker<'_>) -> Result<(), Error> {
        let name = walker.name();
        if BUILTINS.contains(&name) {
            return self.builtin(walker);
        }
        let command = self
            .registry
            .command(name)
            .filter(|c| c.is_applicable(&self.context))
            .ok_or_else(|| DispatchError::NotFound {
                name: name.to_string(),
                token: walker.token_index(),
            })?;
        let mut options = command.new_options(&self.context);
        options.bind_args(name, walker.args(), &self.context)?;

        self.next_id += 1;
        let mut req = Request::new(
            self.next_id,
            walker,
            options,
            self.context.clone(),
            self.config.settings.queue_capacity,
        );
        self.attach_redirections(walker, &mut req)?;
        info!("request #{}: {}", req.id(), walker.source_text());
        self.execute(command, &mut req)?;
        Ok(())
    }

    fn execute(&mut self, command: Arc<dyn Command>, req: &mut Request<'_>) -> Result<(), ExecError> {
        let mut watch = self.cancel.create(&self.context, req.cancel_flag());
        let result = catch_unwind(AssertUnwindSafe(|| command.execute(self, req)))
            .unwrap_or_else(|payload| Err(ExecError::from_panic(payload)));
        watch.reset();
        watch.wait();
        let closed = req.close_output();
        match (result, closed) {
            (Err(err), Err(also)) => {
                debug!("request #{}: output also failed: {also}", req.id());
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), closed) => closed,
        }
    }

    fn builtin(&mut self, walker: CommandWalker<'_>) -> Result<(), Error> {
        let name = walker.name();
        let args = walker.args();
        match name {
            "cd" => {
                let mut opts = CdOptions::default();
                bind(name, &mut opts, args, &self.context)?;
                self.context.cd(opts.path.as_deref().unwrap_or("/"));
                debug!("cd {}", self.context);
            }
            "exit" => {
                bind(name, &mut NoOptions, args, &self.context)?;
                info!("exit requested");
                self.exit = true;
            }
            "reload" => {
                bind(name, &mut NoOptions, args, &self.context)?;
                self.config = Config::load()?;
                info!("configuration reloaded");
            }
            "source" => {
                let mut opts = SourceOptions::default();
                bind(name, &mut opts, args, &self.context)?;
                self.source(&opts.file)?;
            }
            _ => {
                return Err(DispatchError::NotFound {
                    name: name.to_string(),
                    token: walker.token_index(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn source(&mut self, file: &Path) -> Result<(), ExecError> {
        let path = PathBuf::from(shellexpand::tilde(&file.to_string_lossy()).as_ref());
        if self.depth >= MAX_SOURCE_DEPTH {
            return Err(ExecError::failed(format!(
                "{}: nested too deeply",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ExecError::failed(format!("{}: {e}", path.display())))?;
        debug!("sourcing {}", path.display());
        self.depth += 1;
        let result = self.run_source(&text);
        self.depth -= 1;
        result.map_err(|err| match err {
            Error::Exec(err) => err,
            other => ExecError::failed(format!("{}: {other}", path.display())),
        })
    }

    fn attach_redirections(
        &self,
        mut walker: CommandWalker<'_>,
        req: &mut Request<'_>,
    ) -> Result<(), Error> {
        while let Some(redir) = walker.next_redirection() {
            self.attach(redir, req)?;
        }
        self.attach_defaults(walker, req);
        Ok(())
    }

    fn attach(&self, redir: RedirWalker<'_>, req: &mut Request<'_>) -> Result<(), Error> {
        let token = redir.token_index();
        let name = redir.name();
        // `> path` and `! cmd` carry their operand in the redirection token
        // itself; bind it as the sink's only argument.
        let operand = |kind| {
            let head = redir.token();
            [Token {
                kind,
                text: head.text.clone(),
                start: head.start,
                end: head.end,
                line: head.line,
                arg_index: 1,
                node: None,
            }]
        };
        match redir.kind() {
            TokenType::FileRedirection => {
                let operand = operand(TokenType::RawArgument);
                self.attach_sink("file", token, Args::new(&operand, token), req)
            }
            TokenType::ShellRedirection => {
                let operand = operand(TokenType::SingleQuotedArgument);
                self.attach_sink("sh", token, Args::new(&operand, token), req)
            }
            _ => {
                if let Some(block) = redir.node().blocks.first() {
                    return Err(DispatchError::UnexpectedBlock {
                        name: name.to_string(),
                        token: block.start,
                    }
                    .into());
                }
                self.attach_named(name, token, redir.args(), req)
            }
        }
    }

    fn attach_named(
        &self,
        name: &str,
        token: usize,
        args: Args<'_>,
        req: &mut Request<'_>,
    ) -> Result<(), Error> {
        if let Some(handler) = self.registry.pipe(name) {
            if let Some(previous) = occupied(req) {
                return Err(misplaced(name, "pipe", previous, token));
            }
            let mut options = handler.new_options();
            options
                .bind_args(name, args, &self.context)
                .map_err(|e| at_redirection(e, token))?;
            req.push_pipe(SubRequest {
                name: name.to_string(),
                token,
                handler,
                options,
            });
            return Ok(());
        }
        if let Some(handler) = self.registry.formatter(name) {
            if let Some(previous) = occupied(req) {
                return Err(misplaced(name, "formatter", previous, token));
            }
            let mut options = handler.new_options();
            options
                .bind_args(name, args, &self.context)
                .map_err(|e| at_redirection(e, token))?;
            req.set_formatter(SubRequest {
                name: name.to_string(),
                token,
                handler,
                options,
            });
            return Ok(());
        }
        if self.registry.sink(name).is_some() {
            return self.attach_sink(name, token, args, req);
        }
        Err(DispatchError::UnknownRedirection {
            name: name.to_string(),
            token,
        }
        .into())
    }

    fn attach_sink(
        &self,
        name: &str,
        token: usize,
        args: Args<'_>,
        req: &mut Request<'_>,
    ) -> Result<(), Error> {
        if req.sink().is_some() {
            return Err(misplaced(name, "sink", "sink", token));
        }
        let handler = self
            .registry
            .sink(name)
            .ok_or_else(|| DispatchError::UnknownRedirection {
                name: name.to_string(),
                token,
            })?;
        let mut options = handler.new_options(&self.context);
        options
            .bind_args(name, args, &self.context)
            .map_err(|e| at_redirection(e, token))?;
        req.set_sink(SubRequest {
            name: name.to_string(),
            token,
            handler,
            options,
        });
        Ok(())
    }

    fn attach_defaults(&self, walker: CommandWalker<'_>, req: &mut Request<'_>) {
        let settings = &self.config.settings;
        let token = walker.token_index();
        if req.formatter().is_none()
            && let Some(handler) = self.registry.formatter(&settings.default_formatter)
        {
            let options = handler.new_options();
            req.set_formatter(SubRequest {
                name: settings.default_formatter.clone(),
                token,
                handler,
                options,
            });
        }
        if req.sink().is_none()
            && let Some(handler) = self.registry.sink(&settings.default_sink)
        {
            let options = handler.new_options(&self.context);
            req.set_sink(SubRequest {
                name: settings.default_sink.clone(),
                token,
                handler,
                options,
            });
        }
    }

    fn report(&mut self, walker: CommandWalker<'_>, err: &Error) {
        let script = walker.script();
        let caret = |token: Option<usize>| -> Span {
            token
                .and_then(|i| script.tokens().get(i))
                .unwrap_or(walker.token())
                .span()
        };
        let text = match err {
            Error::Bind(e) => {
                render(script.source(), walker.span(), caret(e.token), &e.to_string())
            }
            Error::Dispatch(e) => render(
                script.source(),
                walker.span(),
                caret(Some(e.token())),
                &e.to_string(),
            ),
            Error::Lex(e) => render_lines(script.source(), e.span(), &e.to_string()),
            other => {
                warn!("{}: {other}", walker.name());
                format!("{}: {other}\n", walker.name())
            }
        };
        self.diagnose(&text);
    }

    fn diagnose(&mut self, text: &str) {
        let written = self
            .diag
            .write_all(text.as_bytes())
            .and_then(|()| self.diag.flush());
        if let Err(e) = written {
            warn!("could not write diagnostics: {e}");
        }
    }

    /// Candidates for the last word of a partial `line`.
    ///
    /// Command and redirection names come from the registry, option names
    /// from the handler's option table; anything else is asked from the
    /// handler's `complete`, which must answer within the configured
    /// completion timeout.
    pub fn complete(&self, line: &str) -> Vec<String> {
        let mut tokenizer = Tokenizer::new();
        if let Err(err) = tokenizer.feed(line) {
            debug!("no completion: {err}");
            return Vec::new();
        }
        let script = tokenizer.snapshot();
        let tokens = script.tokens();
        let fresh = line.is_empty() || line.ends_with([' ', '\t', '\n']);
        let word = match tokens.last() {
            Some(t) if !fresh && !t.kind.is_structural() => t.text.clone(),
            _ => String::new(),
        };

        let Some(at) = tokens.iter().rposition(|t| {
            t.kind == TokenType::Command || t.kind.is_redirection() || t.kind.is_structural()
        }) else {
            return self.complete_names(&[HandlerKind::Command], &word);
        };
        let head = &tokens[at];
        let on_head = at + 1 == tokens.len() && !fresh;
        match head.kind {
            TokenType::Command if on_head => self.complete_names(&[HandlerKind::Command], &word),
            TokenType::Redirection if on_head => self.complete_names(
                &[HandlerKind::Pipe, HandlerKind::Formatter, HandlerKind::Sink],
                &word,
            ),
            TokenType::FileRedirection if on_head => {
                let Some(sink) = self.registry.sink("file") else {
                    return Vec::new();
                };
                let req = CompletionRequest {
                    command: "file".into(),
                    word,
                    ..CompletionRequest::default()
                };
                let ctx = self.context.clone();
                self.complete_within_deadline(req, move |req| sink.complete(&ctx, req))
            }
            TokenType::Command | TokenType::Redirection => {
                let mut args: Vec<String> = tokens[at + 1..].iter().map(|t| t.text.clone()).collect();
                if !fresh {
                    args.pop();
                }
                let req = CompletionRequest {
                    command: head.text.clone(),
                    word,
                    args,
                    candidates: Vec::new(),
                };
                if head.kind == TokenType::Command {
                    self.complete_command_args(req)
                } else {
                    self.complete_redirection_args(req)
                }
            }
            TokenType::ShellRedirection | TokenType::FileRedirection => Vec::new(),
            _ => self.complete_names(&[HandlerKind::Command], &word),
        }
    }

    fn complete_names(&self, kinds: &[HandlerKind], word: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for &kind in kinds {
            for name in self.registry.names(kind) {
                let usable = kind != HandlerKind::Command
                    || self
                        .registry
                        .command(name)
                        .is_some_and(|c| c.is_applicable(&self.context));
                if usable && name.starts_with(word) {
                    names.push(name.to_string());
                }
            }
            if kind == HandlerKind::Command {
                names.extend(
                    BUILTINS
                        .iter()
                        .filter(|b| b.starts_with(word))
                        .map(|b| b.to_string()),
                );
            }
        }
        names.sort_unstable();
        names.dedup();
        names
    }

    fn complete_command_args(&self, req: CompletionRequest) -> Vec<String> {
        let Some(command) = self.registry.command(&req.command) else {
            return Vec::new();
        };
        if req.word.starts_with('-') {
            let options = command.new_options(&self.context);
            return option_candidates(&*options, req);
        }
        let ctx = self.context.clone();
        self.complete_within_deadline(req, move |req| command.complete(&ctx, req))
    }

    fn complete_redirection_args(&self, req: CompletionRequest) -> Vec<String> {
        let name = req.command.clone();
        if let Some(pipe) = self.registry.pipe(&name) {
            if req.word.starts_with('-') {
                return option_candidates(&*pipe.new_options(), req);
            }
            return self.complete_within_deadline(req, move |req| pipe.complete(req));
        }
        if let Some(formatter) = self.registry.formatter(&name) {
            if req.word.starts_with('-') {
                return option_candidates(&*formatter.new_options(), req);
            }
            return self.complete_within_deadline(req, move |req| formatter.complete(req));
        }
        if let Some(sink) = self.registry.sink(&name) {
            if req.word.starts_with('-') {
                return option_candidates(&*sink.new_options(&self.context), req);
            }
            let ctx = self.context.clone();
            return self.complete_within_deadline(req, move |req| sink.complete(&ctx, req));
        }
        Vec::new()
    }

    /// Run a handler's completion on a helper thread and give up on it
    /// after the configured timeout. A late answer is discarded.
    fn complete_within_deadline<F>(&self, mut req: CompletionRequest, complete: F) -> Vec<String>
    where
        F: FnOnce(&mut CompletionRequest) + Send + 'static,
    {
        let timeout = Duration::from_millis(self.config.settings.completion_timeout_ms);
        let command = req.command.clone();
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("opsh-complete".into())
            .spawn(move || {
                complete(&mut req);
                let _ = tx.send(req.candidates);
            });
        if let Err(e) = spawned {
            warn!("completion for {command} not started: {e}");
            return Vec::new();
        }
        match rx.recv_timeout(timeout) {
            Ok(mut candidates) => {
                candidates.sort();
                candidates
            }
            Err(e) => {
                debug!("completion for {command} abandoned: {e}");
                Vec::new()
            }
        }
    }
}

fn option_candidates(options: &dyn DynOptions, mut req: CompletionRequest) -> Vec<String> {
    for name in options.option_names(&req.command) {
        req.add(name);
    }
    req.candidates.sort();
    req.candidates
}

/// What already closes the chain for a new pipe or formatter.
fn occupied(req: &Request<'_>) -> Option<&'static str> {
    if req.sink().is_some() {
        Some("sink")
    } else if req.formatter().is_some() {
        Some("formatter")
    } else {
        None
    }
}

fn misplaced(name: &str, kind: &'static str, previous: &'static str, token: usize) -> Error {
    DispatchError::Misplaced {
        name: name.to_string(),
        kind,
        previous,
        token,
    }
    .into()
}

/// Omissions in a redirection's arguments point at the redirection.
fn at_redirection(mut err: BindError, token: usize) -> BindError {
    err.token.get_or_insert(token);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::sinks::Buffer;

    fn session() -> (Session, Buffer, SharedBuffer) {
        let stdout = Buffer::default();
        let mut registry = Registry::standard();
        registry.add_sink("stdout", "test", stdout.clone());
        let mut session = Session::new(Config::default_config(), registry);
        let diag = SharedBuffer::new();
        session.set_diagnostics(Box::new(diag.clone()));
        (session, stdout, diag)
    }

    #[test]
    fn continuation_prompts_until_complete() {
        let (mut session, stdout, _) = session();
        let mut reader = ScriptedReader::new(["echo 'a", "b'", "in x {", "pwd", "}"]);
        session.run(&mut reader).unwrap();
        assert_eq!(stdout.contents(), "a\nb\n/x\n");
        assert_eq!(reader.prompts(), ["opsh> ", "...> ", "opsh> ", "...> ", "...> "]);
        assert_eq!(reader.diagnostics(), "");
    }

    #[test]
    fn lex_error_resets_the_line() {
        let (mut session, stdout, _) = session();
        let mut reader = ScriptedReader::new(["echo a } b", "echo ok"]);
        session.run(&mut reader).unwrap();
        assert_eq!(stdout.contents(), "ok\n");
        assert!(reader.diagnostics().contains("block underflow"));
    }

    #[test]
    fn eof_inside_a_quote_is_reported() {
        let (mut session, _, _) = session();
        let mut reader = ScriptedReader::new(["echo 'open"]);
        session.run(&mut reader).unwrap();
        assert_eq!(
            reader.diagnostics(),
            "echo 'open\n     ^^^^^\nunterminated quote\n"
        );
    }

    #[test]
    fn exit_stops_the_loop() {
        let (mut session, stdout, _) = session();
        let mut reader = ScriptedReader::new(["echo 1; exit; echo 2", "echo 3"]);
        session.run(&mut reader).unwrap();
        assert!(session.exit_requested());
        assert_eq!(stdout.contents(), "1\n");
    }

    #[test]
    fn bind_error_caret_points_at_token() {
        let (mut session, _, diag) = session();
        let _ = session.run_source("echo ok; seq 1 2 3");
        assert_eq!(diag.contents(), "seq 1 2 3\n        ^\nunexpected argument #3\n");
    }

    #[test]
    fn missing_argument_points_at_command() {
        let (mut session, _, diag) = session();
        let _ = session.run_source("seq");
        assert_eq!(diag.contents(), "seq\n^^^\nmissing argument #1\n");
    }

    #[test]
    fn missing_redirection_argument_points_at_redirection() {
        let (mut session, _, diag) = session();
        let _ = session.run_source("seq 3 | limit");
        assert_eq!(
            diag.contents(),
            "seq 3 | limit\n        ^^^^^\nmissing argument #1\n"
        );
    }

    #[test]
    fn misplaced_redirections() {
        let (mut session, stdout, diag) = session();
        let _ = session.run_source("seq 2 | json | limit 1");
        assert!(diag.contents().contains("limit: a pipe cannot follow a formatter"));
        diag.clear();
        let _ = session.run_source("seq 2 | stdout | text");
        assert!(diag.contents().contains("text: a formatter cannot follow a sink"));
        assert_eq!(stdout.contents(), "");
    }

    #[test]
    fn block_on_a_redirection_is_rejected() {
        let (mut session, stdout, diag) = session();
        let _ = session.run_source("seq 3 | limit 1 { echo never }");
        assert_eq!(
            diag.contents(),
            "seq 3 | limit 1 { echo never }\n                ^\nlimit: a redirection takes no { … } block\n"
        );
        assert_eq!(stdout.contents(), "");
    }

    #[test]
    fn unknown_redirection() {
        let (mut session, _, diag) = session();
        let _ = session.run_source("seq 2 | nope");
        assert!(
            diag.contents()
                .contains("nope: no pipe, formatter or sink with this name")
        );
    }

    #[test]
    fn cd_moves_the_context() {
        let (mut session, stdout, _) = session();
        session.run_source("cd a/b; pwd; cd ..; pwd; cd; pwd").unwrap();
        assert_eq!(stdout.contents(), "/a/b\n/a\n/\n");
    }

    #[test]
    fn source_runs_a_file() {
        let (mut session, stdout, diag) = session();
        let path = std::env::temp_dir().join(format!("opsh-source-{}.opsh", std::process::id()));
        std::fs::write(&path, "set who world\necho hello $who\n").unwrap();
        session
            .run_source(&format!("source {}", path.display()))
            .unwrap();
        assert_eq!(stdout.contents(), "hello world\n");
        assert_eq!(diag.contents(), "");

        std::fs::write(&path, "echo {\n").unwrap();
        let _ = session.run_source(&format!("source {}", path.display()));
        assert!(diag.contents().contains("unpaired braces"));
    }

    #[test]
    fn panicking_command_is_contained() {
        struct Boom;
        impl Command for Boom {
            fn execute(&self, _: &mut Session, _: &mut Request<'_>) -> Result<(), ExecError> {
                panic!("kaboom");
            }
        }
        let (mut session, stdout, diag) = session();
        let mut registry = Registry::standard();
        registry.add_command("boom", "test", Boom);
        registry.add_sink("stdout", "test", stdout.clone());
        session.registry = Arc::new(registry);
        let _ = session.run_source("boom; echo after");
        assert_eq!(stdout.contents(), "after\n");
        assert_eq!(diag.contents(), "boom: panic: kaboom\n");
    }

    #[test]
    fn completes_names_and_options() {
        let (mut session, _, _) = session();
        assert_eq!(session.complete("se"), ["seq", "set"]);
        assert_eq!(session.complete("so"), ["source"]);
        assert_eq!(session.complete("seq 3 | j"), ["json"]);
        assert_eq!(session.complete("seq 3 | json -"), ["--compact", "-c"]);
        assert_eq!(session.complete("grep "), Vec::<String>::new());
        session.context_mut().set_var("host", "db1");
        session.context_mut().set_var("port", "5432");
        assert_eq!(session.complete("set h"), ["host"]);
        assert_eq!(session.complete("set "), ["host", "port"]);
        assert_eq!(session.complete("echo a; ec"), ["echo"]);
    }

    #[test]
    fn slow_completion_is_abandoned() {
        struct Slow;
        impl Command for Slow {
            fn complete(&self, _: &Context, req: &mut CompletionRequest) {
                thread::sleep(Duration::from_secs(2));
                req.add("late");
            }
            fn execute(&self, _: &mut Session, _: &mut Request<'_>) -> Result<(), ExecError> {
                Ok(())
            }
        }
        let mut registry = Registry::new();
        registry.add_command("slow", "test", Slow);
        let session = Session::new(Config::default_config(), registry);
        assert!(session.complete("slow ").is_empty());
    }
}
