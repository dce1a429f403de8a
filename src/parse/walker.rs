//! Read-only cursors over a [`Script`].
//!
//! Walkers never copy tokens: each step re-slices the script's token array
//! using the ranges recorded on its [`CommandNode`]s.

use super::types::{CommandNode, NodeId, Script, Span, Token, TokenRange, TokenType};

/// Cursor over the commands of one block (or of the whole script).
#[derive(Debug, Clone, Copy)]
pub struct BlockWalker<'a> {
    script: &'a Script,
    /// Next token index to inspect.
    head: usize,
    /// One past the last token belonging to the block.
    end: usize,
}

impl<'a> BlockWalker<'a> {
    pub(crate) fn root(script: &'a Script) -> Self {
        Self {
            script,
            head: 0,
            end: script.tokens.len(),
        }
    }

    /// Walker over the inside of a `{ … }` range.
    fn block(script: &'a Script, range: TokenRange) -> Self {
        let closed = script.tokens[range.end].kind == TokenType::BlockEnd && range.end > range.start;
        Self {
            script,
            head: range.start + 1,
            end: if closed { range.end } else { script.tokens.len() },
        }
    }

    pub fn script(&self) -> &'a Script {
        self.script
    }

    /// Return the command at the head and advance past its whole range.
    pub fn next_command(&mut self) -> Option<CommandWalker<'a>> {
        while self.head < self.end {
            let token = &self.script.tokens[self.head];
            if token.kind == TokenType::Command
                && let Some(id) = token.node
            {
                self.head = self.script.nodes[id].command.end + 1;
                return Some(CommandWalker::new(self.script, id));
            }
            self.head += 1;
        }
        None
    }
}

impl<'a> Iterator for BlockWalker<'a> {
    type Item = CommandWalker<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_command()
    }
}

/// A command's argument tokens together with their absolute position.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    tokens: &'a [Token],
    first: usize,
}

impl<'a> Args<'a> {
    /// `first` is the absolute index of `tokens[0]` in its script.
    pub fn new(tokens: &'a [Token], first: usize) -> Self {
        Self { tokens, first }
    }

    pub fn empty() -> Self {
        Self {
            tokens: &[],
            first: 0,
        }
    }

    pub fn tokens(&self) -> &'a [Token] {
        self.tokens
    }

    pub fn first_index(&self) -> usize {
        self.first
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Shared state of command and redirection cursors.
#[derive(Debug, Clone, Copy)]
struct NodeCursor<'a> {
    script: &'a Script,
    id: NodeId,
    next_block: usize,
    next_redirection: usize,
}

impl<'a> NodeCursor<'a> {
    fn node(&self) -> &'a CommandNode {
        &self.script.nodes[self.id]
    }

    fn token(&self) -> &'a Token {
        &self.script.tokens[self.node().command.start]
    }

    fn args(&self) -> Args<'a> {
        match self.node().args {
            Some(range) => Args::new(&self.script.tokens[range.start..=range.end], range.start),
            None => Args::empty(),
        }
    }

    fn next_block(&mut self) -> Option<BlockWalker<'a>> {
        let range = *self.node().blocks.get(self.next_block)?;
        self.next_block += 1;
        Some(BlockWalker::block(self.script, range))
    }

    fn next_redirection(&mut self) -> Option<RedirWalker<'a>> {
        let range = *self.node().redirections.get(self.next_redirection)?;
        self.next_redirection += 1;
        let id = self.script.tokens[range.start].node?;
        Some(RedirWalker {
            cursor: NodeCursor::new(self.script, id),
        })
    }

    fn new(script: &'a Script, id: NodeId) -> Self {
        Self {
            script,
            id,
            next_block: 0,
            next_redirection: 0,
        }
    }
}

/// Cursor rooted at a command node.
#[derive(Debug, Clone, Copy)]
pub struct CommandWalker<'a> {
    cursor: NodeCursor<'a>,
}

impl<'a> CommandWalker<'a> {
    fn new(script: &'a Script, id: NodeId) -> Self {
        Self {
            cursor: NodeCursor::new(script, id),
        }
    }

    pub fn script(&self) -> &'a Script {
        self.cursor.script
    }

    pub fn node(&self) -> &'a CommandNode {
        self.cursor.node()
    }

    /// The command-name token.
    pub fn token(&self) -> &'a Token {
        self.cursor.token()
    }

    pub fn token_index(&self) -> usize {
        self.node().command.start
    }

    pub fn name(&self) -> &'a str {
        &self.token().text
    }

    pub fn args(&self) -> Args<'a> {
        self.cursor.args()
    }

    /// The next `{ … }` attached to the command, `None` once exhausted.
    pub fn next_block(&mut self) -> Option<BlockWalker<'a>> {
        self.cursor.next_block()
    }

    /// The next `|`, `>` or `!` attached to the command.
    pub fn next_redirection(&mut self) -> Option<RedirWalker<'a>> {
        self.cursor.next_redirection()
    }

    /// Source span of the command including its blocks and redirections.
    pub fn span(&self) -> Span {
        self.script().span_of(self.node().command)
    }

    /// Original source text of the whole command chain.
    pub fn source_text(&self) -> &'a str {
        self.script().text_of(self.node().command)
    }
}

/// Cursor rooted at a redirection node.
#[derive(Debug, Clone, Copy)]
pub struct RedirWalker<'a> {
    cursor: NodeCursor<'a>,
}

impl<'a> RedirWalker<'a> {
    pub fn node(&self) -> &'a CommandNode {
        self.cursor.node()
    }

    /// `Redirection`, `ShellRedirection` or `FileRedirection`.
    pub fn kind(&self) -> TokenType {
        self.token().kind
    }

    pub fn token(&self) -> &'a Token {
        self.cursor.token()
    }

    pub fn token_index(&self) -> usize {
        self.node().command.start
    }

    /// Handler name, shell command text or file path depending on the kind.
    pub fn name(&self) -> &'a str {
        &self.token().text
    }

    pub fn args(&self) -> Args<'a> {
        self.cursor.args()
    }

    pub fn next_block(&mut self) -> Option<BlockWalker<'a>> {
        self.cursor.next_block()
    }

    pub fn next_redirection(&mut self) -> Option<RedirWalker<'a>> {
        self.cursor.next_redirection()
    }

    pub fn span(&self) -> Span {
        self.cursor.script.span_of(self.node().command)
    }
}
