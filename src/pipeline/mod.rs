//! Concurrent output pipeline: producer → filters → formatter → sink.
//!
//! Every stage boundary is a bounded `sync_channel` with exactly one writer
//! and one reader. Each filter and the formatter run on their own thread;
//! the sink is written by the formatter thread.
//!
//! A failing stage records the first error, drains its inbound queue up to
//! the end-of-stream marker, and forwards an end-of-stream marker
//! downstream. Upstream writers therefore never block forever and
//! [`Output::close`] always returns once every thread has exited.
//!
//! A filter may also stop reading before the end of its input (`limit`).
//! Its inbound boundary is then marked gone: the stage writing into it
//! stops forwarding, and the stop travels back up to the producer.

pub mod token;

use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use serde_json::Value;

pub use token::{Assembler, OutputToken, tokens_of};

use crate::error::ExecError;

/// Default capacity of each stage queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// A filter stage body.
pub type FilterFn =
    Box<dyn FnOnce(&mut StageInput, &mut StageOutput) -> Result<(), ExecError> + Send>;

/// The formatter stage body; it renders tokens into the sink.
pub type FormatFn =
    Box<dyn FnOnce(&mut StageInput, &mut dyn Write) -> Result<(), ExecError> + Send>;

/// State shared by every stage of one request's pipeline.
#[derive(Debug, Default)]
struct Shared {
    failed: AtomicBool,
    error: Mutex<Option<ExecError>>,
}

impl Shared {
    /// Record `err` if it is the first failure.
    fn fail(&self, err: ExecError) {
        if self
            .failed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("pipeline failed: {err}");
            *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        } else {
            debug!("pipeline already failed, dropping: {err}");
        }
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn take_error(&self) -> Option<ExecError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Inbound side of a stage.
pub struct StageInput {
    rx: Receiver<OutputToken>,
    done: bool,
    /// Raised when this stage stops reading before end of stream.
    gone: Arc<AtomicBool>,
}

impl StageInput {
    fn new(rx: Receiver<OutputToken>, gone: Arc<AtomicBool>) -> Self {
        Self {
            rx,
            done: false,
            gone,
        }
    }

    /// True once the end-of-stream marker has been read.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Next token, or `None` at end of stream.
    pub fn next_token(&mut self) -> Option<OutputToken> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(OutputToken::EndOfStream) | Err(_) => {
                self.done = true;
                None
            }
            Ok(token) => Some(token),
        }
    }

    /// Discard everything up to the end-of-stream marker.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.next_token().is_some() {
            dropped += 1;
        }
        dropped
    }
}

impl Iterator for StageInput {
    type Item = OutputToken;

    fn next(&mut self) -> Option<OutputToken> {
        self.next_token()
    }
}

/// Outbound side of a filter stage.
pub struct StageOutput {
    tx: SyncSender<OutputToken>,
    shared: Arc<Shared>,
    downstream_gone: Arc<AtomicBool>,
}

impl StageOutput {
    /// Forward a token. Fails once the pipeline has failed or the next
    /// stage has stopped reading, so a filter can stop early.
    pub fn send(&mut self, token: OutputToken) -> Result<(), ExecError> {
        if self.is_closed() {
            return Err(ExecError::PipelineClosed);
        }
        self.tx.send(token).map_err(|_| ExecError::PipelineClosed)
    }

    pub fn is_failed(&self) -> bool {
        self.shared.is_failed()
    }

    /// Nothing sent from now on will be read.
    pub fn is_closed(&self) -> bool {
        self.shared.is_failed() || self.downstream_gone.load(Ordering::Acquire)
    }

    fn end(&self) {
        let _ = self.tx.send(OutputToken::EndOfStream);
    }
}

/// Producer handle of a running pipeline.
///
/// Dropping it closes the pipeline and waits for the stages.
pub struct Output {
    head: Option<SyncSender<OutputToken>>,
    head_gone: Arc<AtomicBool>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Output {
    /// Spawn the stage threads and return the producer handle.
    pub fn start(
        filters: Vec<FilterFn>,
        formatter: FormatFn,
        sink: Box<dyn Write + Send>,
        capacity: usize,
    ) -> Result<Self, ExecError> {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared::default());
        let mut workers = Vec::with_capacity(filters.len() + 1);

        let (tx, rx) = sync_channel(capacity);
        let gone = Arc::new(AtomicBool::new(false));
        let input = StageInput::new(rx, Arc::clone(&gone));
        let worker_shared = Arc::clone(&shared);
        workers.push(
            thread::Builder::new()
                .name("opsh-format".into())
                .spawn(move || run_formatter(formatter, input, sink, &worker_shared))?,
        );

        let mut downstream = (tx, gone);
        for (i, filter) in filters.into_iter().enumerate().rev() {
            let (tx, rx) = sync_channel(capacity);
            let gone = Arc::new(AtomicBool::new(false));
            let input = StageInput::new(rx, Arc::clone(&gone));
            let output = StageOutput {
                tx: downstream.0,
                shared: Arc::clone(&shared),
                downstream_gone: downstream.1,
            };
            let spawned = thread::Builder::new()
                .name(format!("opsh-filter-{i}"))
                .spawn(move || run_filter(filter, input, output));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Stages already running see their senders dropped and exit.
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
            downstream = (tx, gone);
        }
        debug!("pipeline started: {} stage(s), capacity {capacity}", workers.len());

        let (head, head_gone) = downstream;
        Ok(Self {
            head: Some(head),
            head_gone,
            shared,
            workers,
        })
    }

    fn send(&self, token: OutputToken) {
        if self.is_closed() {
            return;
        }
        if let Some(head) = &self.head
            && head.send(token).is_err()
        {
            self.shared.fail(ExecError::PipelineClosed);
        }
    }

    pub fn start_object(&self, name: Option<&str>) {
        self.send(OutputToken::ObjectStart(name.map(String::from)));
    }

    pub fn start_array(&self, name: Option<&str>) {
        self.send(OutputToken::ArrayStart(name.map(String::from)));
    }

    /// Close the innermost object or array.
    pub fn end_object(&self) {
        self.send(OutputToken::ObjectEnd);
    }

    pub fn write_value(&self, name: Option<&str>, value: impl Into<Value>) {
        self.send(OutputToken::Value(name.map(String::from), value.into()));
    }

    /// Emit a whole JSON value as a token sequence.
    pub fn write_tree(&self, name: Option<&str>, value: &Value) {
        let mut tokens = Vec::new();
        tokens_of(name.map(String::from), value, &mut tokens);
        for token in tokens {
            self.send(token);
        }
    }

    /// Abort the pipeline with `err`; later writes are ignored.
    pub fn fail(&self, err: ExecError) {
        self.shared.fail(err);
    }

    pub fn is_failed(&self) -> bool {
        self.shared.is_failed()
    }

    /// True once writes are discarded: the pipeline failed or the first
    /// stage stopped reading. Producers should stop generating.
    pub fn is_closed(&self) -> bool {
        self.shared.is_failed() || self.head_gone.load(Ordering::Acquire)
    }

    /// Send end-of-stream, wait for every stage, and report the first error.
    pub fn close(&mut self) -> Result<(), ExecError> {
        if let Some(head) = self.head.take() {
            // Stages drain until this marker even after a failure.
            let _ = head.send(OutputToken::EndOfStream);
        }
        for handle in self.workers.drain(..) {
            if let Err(payload) = handle.join() {
                self.shared.fail(ExecError::from_panic(payload));
            }
        }
        match self.shared.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if (self.head.is_some() || !self.workers.is_empty())
            && let Err(e) = self.close()
        {
            warn!("output closed with error: {e}");
        }
    }
}

fn guarded<F>(body: F) -> Result<(), ExecError>
where
    F: FnOnce() -> Result<(), ExecError>,
{
    catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| Err(ExecError::from_panic(payload)))
}

fn run_filter(filter: FilterFn, mut input: StageInput, mut output: StageOutput) {
    let result = guarded(|| filter(&mut input, &mut output));
    match result {
        Ok(()) => {}
        // The next stage stopped reading; this one is done too.
        Err(ExecError::PipelineClosed) if !output.shared.is_failed() => {}
        Err(err) => output.shared.fail(err),
    }
    if !input.done {
        input.gone.store(true, Ordering::Release);
    }
    let dropped = input.drain();
    if dropped > 0 {
        debug!("filter drained {dropped} token(s)");
    }
    output.end();
}

fn run_formatter(
    formatter: FormatFn,
    mut input: StageInput,
    mut sink: Box<dyn Write + Send>,
    shared: &Shared,
) {
    let result = guarded(|| {
        formatter(&mut input, &mut *sink)?;
        sink.flush()?;
        Ok(())
    });
    if let Err(err) = result {
        shared.fail(err);
    }
    input.drain();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repl::SharedBuffer;
    use serde_json::json;

    fn lines() -> FormatFn {
        Box::new(|input: &mut StageInput, out: &mut dyn Write| {
            for token in input {
                if let OutputToken::Value(_, v) = token {
                    writeln!(out, "{v}")?;
                }
            }
            Ok(())
        })
    }

    fn double() -> FilterFn {
        Box::new(|input: &mut StageInput, output: &mut StageOutput| {
            while let Some(token) = input.next_token() {
                if let OutputToken::Value(name, Value::Number(n)) = &token
                    && let Some(n) = n.as_i64()
                {
                    output.send(OutputToken::Value(name.clone(), json!(n * 2)))?;
                } else {
                    output.send(token)?;
                }
            }
            Ok(())
        })
    }

    #[test]
    fn values_flow_in_order_through_filters() {
        let buffer = SharedBuffer::new();
        let mut output =
            Output::start(vec![double(), double()], lines(), Box::new(buffer.clone()), 2).unwrap();
        for i in 0..50 {
            output.write_value(None, i);
        }
        output.close().unwrap();
        let expected: String = (0..50).map(|i| format!("{}\n", i * 4)).collect();
        assert_eq!(buffer.contents(), expected);
    }

    #[test]
    fn failing_filter_does_not_strand_the_producer() {
        let failing: FilterFn = Box::new(|input: &mut StageInput, _: &mut StageOutput| {
            input.next_token();
            Err(ExecError::failed("boom"))
        });
        let buffer = SharedBuffer::new();
        let mut output =
            Output::start(vec![double(), failing], lines(), Box::new(buffer.clone()), 1).unwrap();
        for i in 0..1000 {
            output.write_value(None, i);
        }
        let err = output.close().unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(output.is_failed());
        assert_eq!(buffer.contents(), "");
    }

    #[test]
    fn panicking_formatter_is_reported() {
        let formatter: FormatFn = Box::new(|input: &mut StageInput, _: &mut dyn Write| {
            input.next_token();
            panic!("formatter exploded");
        });
        let mut output =
            Output::start(Vec::new(), formatter, Box::new(SharedBuffer::new()), 1).unwrap();
        for i in 0..100 {
            output.write_value(None, i);
        }
        match output.close() {
            Err(ExecError::Panic(message)) => assert_eq!(message, "formatter exploded"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn producer_failure_is_first_error() {
        let mut output =
            Output::start(Vec::new(), lines(), Box::new(SharedBuffer::new()), 4).unwrap();
        output.write_value(None, 1);
        output.fail(ExecError::failed("first"));
        output.write_value(None, 2);
        output.fail(ExecError::failed("second"));
        assert_eq!(output.close().unwrap_err().to_string(), "first");
    }

    #[test]
    fn nested_structures_reach_the_formatter() {
        let collect: FormatFn = Box::new(|input: &mut StageInput, out: &mut dyn Write| {
            let mut asm = Assembler::new();
            for token in input {
                if let Some((_, value)) = asm.push(token) {
                    writeln!(out, "{value}")?;
                }
            }
            Ok(())
        });
        let buffer = SharedBuffer::new();
        let mut output = Output::start(Vec::new(), collect, Box::new(buffer.clone()), 3).unwrap();
        output.start_object(None);
        output.write_value(Some("name"), "db");
        output.start_array(Some("tags"));
        output.write_value(None, "a");
        output.end_object();
        output.end_object();
        output.close().unwrap();
        assert_eq!(buffer.contents(), "{\"name\":\"db\",\"tags\":[\"a\"]}\n");
    }

    #[test]
    fn early_stop_reaches_the_producer() {
        let first_two: FilterFn = Box::new(|input: &mut StageInput, output: &mut StageOutput| {
            for token in input.take(2) {
                output.send(token)?;
            }
            Ok(())
        });
        let buffer = SharedBuffer::new();
        let mut output =
            Output::start(vec![double(), first_two], lines(), Box::new(buffer.clone()), 1)
                .unwrap();
        let mut written = 0;
        while !output.is_closed() {
            output.write_value(None, written);
            written += 1;
            assert!(written < 100_000, "producer never saw the stop");
        }
        output.close().unwrap();
        assert!(!output.is_failed());
        assert_eq!(buffer.contents(), "0\n2\n");
    }

    #[test]
    fn drop_closes_pipeline() {
        let buffer = SharedBuffer::new();
        {
            let output =
                Output::start(Vec::new(), lines(), Box::new(buffer.clone()), 4).unwrap();
            output.write_value(None, "x");
        }
        assert_eq!(buffer.contents(), "\"x\"\n");
    }
}
