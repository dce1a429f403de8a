//! Types produced by the tokenizer and consumed by the walker and binder.

use super::walker::BlockWalker;

/// Lexical class of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Name of a command (first word of a logical command).
    Command,
    /// `;` or newline.
    CommandSeparator,
    /// `| name`: the token carries `name`.
    Redirection,
    /// `| sh …`, `| !…` or `! …`: the token carries the verbatim command text.
    ShellRedirection,
    /// `> path`: the token carries the decoded path.
    FileRedirection,
    /// `-x` / `--long`; the text keeps its leading dashes.
    Option,
    /// Unquoted argument piece, escapes decoded.
    RawArgument,
    /// `'…'` piece, taken literally.
    SingleQuotedArgument,
    /// `"…"` piece, escapes decoded, eligible for interpolation.
    DoubleQuotedArgument,
    /// `{`
    BlockBegin,
    /// `}`
    BlockEnd,
}

impl TokenType {
    /// Argument pieces, i.e. tokens that can be assembled into a value.
    pub fn is_argument(self) -> bool {
        matches!(
            self,
            TokenType::RawArgument
                | TokenType::SingleQuotedArgument
                | TokenType::DoubleQuotedArgument
        )
    }

    /// Tokens that open a redirection node.
    pub fn is_redirection(self) -> bool {
        matches!(
            self,
            TokenType::Redirection | TokenType::ShellRedirection | TokenType::FileRedirection
        )
    }

    /// Separators and block delimiters. These never belong to an argument group.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            TokenType::CommandSeparator | TokenType::BlockBegin | TokenType::BlockEnd
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Command => "command",
            TokenType::CommandSeparator => "separator",
            TokenType::Redirection => "redirection",
            TokenType::ShellRedirection => "shell redirection",
            TokenType::FileRedirection => "file redirection",
            TokenType::Option => "option",
            TokenType::RawArgument => "argument",
            TokenType::SingleQuotedArgument => "single-quoted argument",
            TokenType::DoubleQuotedArgument => "double-quoted argument",
            TokenType::BlockBegin => "block begin",
            TokenType::BlockEnd => "block end",
        }
    }
}

/// Byte range `[start, end)` into a script's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both.
    pub fn join(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Index of a [`CommandNode`] in [`Script::nodes`].
pub type NodeId = usize;

/// Smallest lexical unit of the command language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenType,
    /// Decoded text (quotes removed, escapes resolved).
    pub text: String,
    /// Byte offset of the first source character, quotes included.
    pub start: usize,
    /// Byte offset one past the last source character.
    pub end: usize,
    /// 1-based physical line the token starts on.
    pub line: usize,
    /// Logical argument group. Adjacent pieces (`a'r'"g"`) share one index.
    /// Structural tokens carry 0.
    pub arg_index: usize,
    /// Node opened by this token (commands and redirections only).
    pub node: Option<NodeId>,
}

impl Token {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Inclusive `[start, end]` range of token indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRange {
    pub start: usize,
    pub end: usize,
}

impl TokenRange {
    pub fn at(index: usize) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// Range-based record of one command or redirection.
///
/// `command.start` is the token that opened the node; `command.end` grows as
/// arguments, blocks and redirections are attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNode {
    pub command: TokenRange,
    pub args: Option<TokenRange>,
    pub redirections: Vec<TokenRange>,
    pub blocks: Vec<TokenRange>,
}

impl CommandNode {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            command: TokenRange::at(index),
            args: None,
            redirections: Vec::new(),
            blocks: Vec::new(),
        }
    }
}

/// A fully tokenized logical input: source text, flat token array and the
/// command nodes indexing into it.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub(crate) source: String,
    pub(crate) tokens: Vec<Token>,
    pub(crate) nodes: Vec<CommandNode>,
}

impl Script {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn nodes(&self) -> &[CommandNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &CommandNode {
        &self.nodes[id]
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Source span covered by an inclusive token range.
    pub fn span_of(&self, range: TokenRange) -> Span {
        let first = &self.tokens[range.start];
        let last = &self.tokens[range.end];
        first.span().join(last.span())
    }

    /// Original source text of an inclusive token range.
    pub fn text_of(&self, range: TokenRange) -> &str {
        let span = self.span_of(range);
        &self.source[span.start..span.end]
    }

    /// Walker over the top-level commands.
    pub fn walk(&self) -> BlockWalker<'_> {
        BlockWalker::root(self)
    }
}
