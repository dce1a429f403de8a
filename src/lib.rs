//! opsh: a framework for line-oriented operational command shells.
//!
//! Input is tokenized into commands with trailing `{ … }` blocks and
//! redirections (`| pipe`, `| formatter`, `| sink`, `> file`, `| sh cmd`).
//! Each command is bound to a typed options struct, then executed with its
//! output streamed through a chain of worker threads: filters, one
//! formatter and one sink.
//!
//! # Architecture
//!
//! - **[`parse`]**: Tokenizer with line continuation, command tree, walkers.
//! - **[`bind`]**: Tag-driven argument binding into options structs.
//! - **[`pipeline`]**: Output tokens, bounded queues and stage workers.
//! - **[`commands`]**: Handler traits, registry and the standard handlers.
//! - **[`repl`]**: Session dispatch loop, context, requests, line readers.
//! - **[`config`]**: Embedded defaults + user overlay merge.
//! - **[`logging`]**: `simplelog` setup.

/// Argument binding: field tags, coercion, usage synopses.
pub mod bind;
/// Handler traits, registry and standard commands, pipes, formatters, sinks.
pub mod commands;
/// Configuration types, loading, and overlay merge logic.
pub mod config;
/// Error taxonomy shared by every layer.
pub mod error;
/// Logger initialisation.
pub mod logging;
/// Tokenizer, command tree and walkers.
pub mod parse;
/// Streaming output pipeline.
pub mod pipeline;
/// Dispatch loop and per-request state.
pub mod repl;

pub use error::Error;

/// Run `source` through a fresh session with the standard handlers and
/// the default configuration, returning what reached `stdout` and the
/// diagnostics.
///
/// This is the main entry point for tests and simple embedding.
pub fn run_script(source: &str) -> (String, String) {
    let stdout = repl::SharedBuffer::new();
    let diag = repl::SharedBuffer::new();
    let mut registry = commands::Registry::standard();
    registry.add_sink("stdout", "standard", commands::sinks::Buffer(stdout.clone()));
    let mut session = repl::Session::new(config::Config::default_config(), registry);
    session.set_diagnostics(Box::new(diag.clone()));
    // Failures are already in the diagnostics.
    let _ = session.run_source(source);
    (stdout.contents(), diag.contents())
}
