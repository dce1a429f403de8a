//! One resolved invocation and its output chain.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use super::Context;
use crate::bind::{DynOptions, Options};
use crate::commands::{Formatter, Pipe, Sink, options_of};
use crate::error::ExecError;
use crate::parse::{Args, BlockWalker, CommandWalker};
use crate::pipeline::{FilterFn, FormatFn, Output, StageInput, StageOutput};

/// A bound pipe, formatter or sink attached to a request.
pub struct SubRequest<H: ?Sized> {
    pub name: String,
    /// Script index of the redirection token.
    pub token: usize,
    pub handler: Arc<H>,
    pub options: Box<dyn DynOptions>,
}

pub type PipeRequest = SubRequest<dyn Pipe>;
pub type FormatterRequest = SubRequest<dyn Formatter>;
pub type SinkRequest = SubRequest<dyn Sink>;

/// A command bound to its options with the pipe → formatter → sink chain
/// resolved. The pipeline is started on the first call to [`output`].
///
/// [`output`]: Request::output
pub struct Request<'a> {
    id: u64,
    walker: CommandWalker<'a>,
    options: Box<dyn DynOptions>,
    pipes: Vec<PipeRequest>,
    formatter: Option<FormatterRequest>,
    sink: Option<SinkRequest>,
    block: Option<BlockWalker<'a>>,
    context: Context,
    capacity: usize,
    cancel: Arc<AtomicBool>,
    output: Option<Output>,
}

impl<'a> Request<'a> {
    pub(crate) fn new(
        id: u64,
        walker: CommandWalker<'a>,
        options: Box<dyn DynOptions>,
        context: Context,
        capacity: usize,
    ) -> Self {
        let mut blocks = walker;
        let block = blocks.next_block();
        Self {
            id,
            walker,
            options,
            pipes: Vec::new(),
            formatter: None,
            sink: None,
            block,
            context,
            capacity,
            cancel: Arc::new(AtomicBool::new(false)),
            output: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &'a str {
        self.walker.name()
    }

    pub fn walker(&self) -> CommandWalker<'a> {
        self.walker
    }

    pub fn args(&self) -> Args<'a> {
        self.walker.args()
    }

    /// Context state as it was when the request was built.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The bound option struct, downcast to the type the command declared.
    pub fn options<T: Options>(&self) -> Result<&T, ExecError> {
        options_of(self.name(), &*self.options)
    }

    /// The trailing `{ … }` block, if the command has one.
    pub fn block(&self) -> Option<BlockWalker<'a>> {
        self.block
    }

    pub fn pipes(&self) -> &[PipeRequest] {
        &self.pipes
    }

    pub fn formatter(&self) -> Option<&FormatterRequest> {
        self.formatter.as_ref()
    }

    pub fn sink(&self) -> Option<&SinkRequest> {
        self.sink.as_ref()
    }

    pub(crate) fn push_pipe(&mut self, pipe: PipeRequest) {
        self.pipes.push(pipe);
    }

    pub(crate) fn set_formatter(&mut self, formatter: FormatterRequest) {
        self.formatter = Some(formatter);
    }

    pub(crate) fn set_sink(&mut self, sink: SinkRequest) {
        self.sink = Some(sink);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Flag a cancel handler raises to stop this request.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Producer handle of the request's pipeline, started on first use.
    pub fn output(&mut self) -> Result<&Output, ExecError> {
        if self.output.is_none() {
            self.output = Some(self.start_output()?);
        }
        self.output.as_ref().ok_or(ExecError::PipelineClosed)
    }

    /// Wait for the pipeline to drain; no-op if nothing was written.
    pub fn close_output(&mut self) -> Result<(), ExecError> {
        match self.output.take() {
            Some(mut output) => output.close(),
            None => Ok(()),
        }
    }

    fn start_output(&mut self) -> Result<Output, ExecError> {
        let name = self.walker.name();
        let formatter = self
            .formatter
            .take()
            .ok_or_else(|| ExecError::failed(format!("{name}: no formatter available")))?;
        let sink = self
            .sink
            .take()
            .ok_or_else(|| ExecError::failed(format!("{name}: no sink available")))?;
        let writer: Box<dyn Write + Send> = sink.handler.new_sink(&*sink.options, &self.context)?;

        let filters: Vec<FilterFn> = self
            .pipes
            .drain(..)
            .map(|pipe| {
                let SubRequest {
                    handler, options, ..
                } = pipe;
                Box::new(move |input: &mut StageInput, output: &mut StageOutput| {
                    handler.run(&*options, input, output)
                }) as FilterFn
            })
            .collect();
        let FormatterRequest {
            name: format_name,
            handler,
            options,
            ..
        } = formatter;
        let format: FormatFn = Box::new(move |input: &mut StageInput, out: &mut dyn Write| {
            handler.run(&*options, input, out)
        });

        debug!(
            "request #{}: output {} pipe(s) | {} > {}",
            self.id,
            filters.len(),
            format_name,
            sink.name
        );
        Output::start(filters, format, writer, self.capacity)
    }
}
