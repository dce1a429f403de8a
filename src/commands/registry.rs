//! Handler registry.
//!
//! Read-only once the session starts. The descriptor table is append-only:
//! each registration adds a descriptor pointing into its kind's handler
//! table. Registering a name again for the same kind shadows the earlier
//! entry for lookups; the earlier descriptor stays in the table.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use super::{Command, Formatter, Pipe, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Command,
    Pipe,
    Formatter,
    Sink,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::Command => "command",
            HandlerKind::Pipe => "pipe",
            HandlerKind::Formatter => "formatter",
            HandlerKind::Sink => "sink",
        }
    }
}

/// Registration record of one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    pub name: String,
    /// Free-form grouping used for help listings.
    pub group: String,
    pub kind: HandlerKind,
    /// Position in the handler table of `kind`.
    pub index: usize,
}

#[derive(Default)]
pub struct Registry {
    descriptors: Vec<HandlerDescriptor>,
    /// Live descriptor per `(kind, name)`.
    by_name: HashMap<(HandlerKind, String), usize>,
    commands: Vec<Arc<dyn Command>>,
    pipes: Vec<Arc<dyn Pipe>>,
    formatters: Vec<Arc<dyn Formatter>>,
    sinks: Vec<Arc<dyn Sink>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The demo commands plus every standard pipe, formatter and sink.
    pub fn standard() -> Self {
        use super::{echo, formatters, pipes, scope, seq, sinks, vars};

        let mut registry = Self::new();
        registry.add_command("echo", "demo", echo::Echo);
        registry.add_command("seq", "demo", seq::Seq);
        registry.add_command("set", "session", vars::Set);
        registry.add_command("in", "session", scope::In);
        registry.add_command("pwd", "session", scope::Pwd);
        registry.add_pipe("limit", "filter", pipes::Limit);
        registry.add_pipe("grep", "filter", pipes::Grep);
        registry.add_formatter("text", "format", formatters::Text);
        registry.add_formatter("json", "format", formatters::Json);
        registry.add_sink("stdout", "output", sinks::Stdout);
        registry.add_sink("file", "output", sinks::File);
        registry.add_sink("sh", "output", sinks::Shell);
        registry
    }

    fn describe(&mut self, name: &str, group: &str, kind: HandlerKind, index: usize) {
        let id = self.descriptors.len();
        self.descriptors.push(HandlerDescriptor {
            name: name.to_string(),
            group: group.to_string(),
            kind,
            index,
        });
        if self.by_name.insert((kind, name.to_string()), id).is_some() {
            debug!("registered {} {name}, shadowing an earlier one", kind.as_str());
        } else {
            debug!("registered {} {name}", kind.as_str());
        }
    }

    pub fn add_command(&mut self, name: &str, group: &str, handler: impl Command + 'static) {
        self.describe(name, group, HandlerKind::Command, self.commands.len());
        self.commands.push(Arc::new(handler));
    }

    pub fn add_pipe(&mut self, name: &str, group: &str, handler: impl Pipe + 'static) {
        self.describe(name, group, HandlerKind::Pipe, self.pipes.len());
        self.pipes.push(Arc::new(handler));
    }

    pub fn add_formatter(&mut self, name: &str, group: &str, handler: impl Formatter + 'static) {
        self.describe(name, group, HandlerKind::Formatter, self.formatters.len());
        self.formatters.push(Arc::new(handler));
    }

    pub fn add_sink(&mut self, name: &str, group: &str, handler: impl Sink + 'static) {
        self.describe(name, group, HandlerKind::Sink, self.sinks.len());
        self.sinks.push(Arc::new(handler));
    }

    /// Live descriptor registered under `name` for `kind`.
    pub fn lookup(&self, kind: HandlerKind, name: &str) -> Option<&HandlerDescriptor> {
        self.by_name
            .get(&(kind, name.to_string()))
            .map(|&id| &self.descriptors[id])
    }

    fn index_of(&self, kind: HandlerKind, name: &str) -> Option<usize> {
        self.lookup(kind, name).map(|d| d.index)
    }

    pub fn command(&self, name: &str) -> Option<Arc<dyn Command>> {
        let index = self.index_of(HandlerKind::Command, name)?;
        self.commands.get(index).cloned()
    }

    pub fn pipe(&self, name: &str) -> Option<Arc<dyn Pipe>> {
        let index = self.index_of(HandlerKind::Pipe, name)?;
        self.pipes.get(index).cloned()
    }

    pub fn formatter(&self, name: &str) -> Option<Arc<dyn Formatter>> {
        let index = self.index_of(HandlerKind::Formatter, name)?;
        self.formatters.get(index).cloned()
    }

    pub fn sink(&self, name: &str) -> Option<Arc<dyn Sink>> {
        let index = self.index_of(HandlerKind::Sink, name)?;
        self.sinks.get(index).cloned()
    }

    /// Every registration in order, shadowed ones included.
    pub fn descriptors(&self) -> &[HandlerDescriptor] {
        &self.descriptors
    }

    /// Sorted names registered for `kind`.
    pub fn names(&self, kind: HandlerKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .by_name
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}
