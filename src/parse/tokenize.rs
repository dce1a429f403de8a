//! Incremental tokenizer for the command language.
//!
//! The tokenizer is fed one physical line at a time. When a line ends inside a
//! quote, after a trailing `\` or `|`, or inside an open `{`, it reports
//! [`Tokenizer::expect_more`] and keeps the unconsumed remainder; the next
//! [`Tokenizer::feed`] joins it to the new line with a newline and resumes.

use log::debug;

use super::tree::TreeBuilder;
use super::types::{Script, Span, Token, TokenType};
use crate::error::LexError;

/// Outcome of scanning one construct.
enum Scan {
    Done,
    /// Input ended inside the construct; resume from its start later.
    Incomplete(Pending),
}

/// What kept the last feed from completing, for error reporting at EOF.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Quote(usize),
    Escape(usize),
    Pipe(usize),
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    source: String,
    /// Resume offset into `source`.
    pos: usize,
    /// Physical line at `pos`.
    line: usize,
    /// Expected class of the next bare word.
    token_type: TokenType,
    allow_options: bool,
    arg_index: usize,
    /// End offset of the last argument piece, for gluing adjacent pieces.
    last_piece_end: Option<usize>,
    pending: Option<Pending>,
    initial: TokenType,
    tree: TreeBuilder,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    /// Tokenizer starting in command position.
    pub fn new() -> Self {
        Self::starting_with(TokenType::Command)
    }

    /// Tokenizer starting in argument position, options allowed.
    ///
    /// Useful for binding or completing a bare argument string.
    pub fn arguments() -> Self {
        Self::starting_with(TokenType::RawArgument)
    }

    fn starting_with(initial: TokenType) -> Self {
        Self {
            source: String::new(),
            pos: 0,
            line: 1,
            token_type: initial,
            allow_options: initial == TokenType::RawArgument,
            arg_index: 0,
            last_piece_end: None,
            pending: None,
            initial,
            tree: if initial == TokenType::RawArgument {
                // Argument mode has no command word; an empty synthetic
                // command token at index 0 heads the pieces.
                TreeBuilder::headed()
            } else {
                TreeBuilder::default()
            },
        }
    }

    /// Discard all state and start a fresh logical line.
    pub fn reset(&mut self) {
        *self = Self::starting_with(self.initial);
    }

    /// True while the current logical line is incomplete.
    pub fn expect_more(&self) -> bool {
        self.pending.is_some() || self.tree.depth() > 0
    }

    /// Accumulated logical source.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[Token] {
        self.tree.tokens()
    }

    /// Copy of everything tokenized so far, complete or not.
    pub fn snapshot(&self) -> Script {
        self.tree.snapshot(&self.source)
    }

    /// Feed one physical line (without its trailing newline).
    pub fn feed(&mut self, line: &str) -> Result<(), LexError> {
        if !self.source.is_empty() {
            self.source.push('\n');
        }
        self.source.push_str(line);
        self.pending = None;
        self.scan()
    }

    /// Close the logical input and hand out the script.
    ///
    /// On success the tokenizer is reset. On failure nothing is consumed and
    /// [`expect_more`](Self::expect_more) keeps its value.
    pub fn finish(&mut self) -> Result<Script, LexError> {
        let end = self.source.len();
        match self.pending {
            Some(Pending::Quote(at)) => return Err(LexError::UnterminatedQuote(Span::new(at, end))),
            Some(Pending::Escape(at)) => return Err(LexError::DanglingEscape(Span::new(at, end))),
            Some(Pending::Pipe(at)) => {
                return Err(LexError::MissingRedirection(Span::new(at, at + 1)));
            }
            None => {}
        }
        if let Some(open) = self.tree.innermost_open() {
            return Err(LexError::UnpairedBraces(open.span()));
        }
        let fresh = Self::starting_with(self.initial);
        let done = std::mem::replace(self, fresh);
        Ok(done.tree.into_script(done.source))
    }

    fn peek(&self, at: usize) -> Option<char> {
        self.source[at..].chars().next()
    }

    /// Move to `to`, counting the newlines passed over.
    fn advance(&mut self, to: usize) {
        if to > self.pos {
            self.line += self.source[self.pos..to].matches('\n').count();
            self.pos = to;
        }
    }

    fn skip_blanks(&self, mut at: usize) -> usize {
        while let Some(c) = self.peek(at) {
            if c != ' ' && c != '\t' && c != '\r' {
                break;
            }
            at += 1;
        }
        at
    }

    fn scan(&mut self) -> Result<(), LexError> {
        loop {
            let Some(c) = self.peek(self.pos) else {
                break;
            };
            let at = self.pos;
            let outcome = match c {
                ' ' | '\t' | '\r' => {
                    self.advance(at + 1);
                    Scan::Done
                }
                '\n' | ';' => {
                    self.emit(TokenType::CommandSeparator, at, at + 1, c.to_string())?;
                    self.to_command_position();
                    Scan::Done
                }
                '#' if self.last_piece_end != Some(at) => {
                    let end = self.source[at..].find('\n').map_or(self.source.len(), |i| at + i);
                    self.advance(end);
                    Scan::Done
                }
                '{' | '}' => {
                    let kind = if c == '{' {
                        TokenType::BlockBegin
                    } else {
                        TokenType::BlockEnd
                    };
                    self.emit(kind, at, at + 1, c.to_string())?;
                    self.to_command_position();
                    Scan::Done
                }
                '\\' if self.last_piece_end != Some(at) && self.line_join_end(at).is_some() => {
                    match self.line_join_end(at) {
                        Some(Some(end)) => {
                            self.advance(end);
                            Scan::Done
                        }
                        _ => Scan::Incomplete(Pending::Escape(at)),
                    }
                }
                '|' => self.scan_redirection(at)?,
                '!' if self.last_piece_end != Some(at)
                    && matches!(self.peek(at + 1), Some(' ' | '\t')) =>
                {
                    self.scan_shell(at, at + 1)?
                }
                '>' => self.scan_file(at)?,
                _ if self.token_type == TokenType::Command => self.scan_command(at)?,
                _ => self.scan_argument(at, c)?,
            };
            if let Scan::Incomplete(pending) = outcome {
                debug!("incomplete input at byte {at}, waiting for more");
                self.pending = Some(pending);
                return Ok(());
            }
        }
        Ok(())
    }

    fn to_command_position(&mut self) {
        self.token_type = TokenType::Command;
        self.allow_options = false;
    }

    fn to_argument_position(&mut self, options: bool) {
        self.token_type = TokenType::RawArgument;
        self.allow_options = options;
    }

    /// `\` followed by blanks and a newline. `Some(Some(end))` when joined,
    /// `Some(None)` when input ends first, `None` when this is not a join.
    fn line_join_end(&self, at: usize) -> Option<Option<usize>> {
        let after = self.skip_blanks(at + 1);
        match self.peek(after) {
            Some('\n') => Some(Some(after + 1)),
            None => Some(None),
            Some(_) => None,
        }
    }

    fn scan_command(&mut self, at: usize) -> Result<Scan, LexError> {
        let Some(end) = self.word_end(at)? else {
            return Ok(Scan::Incomplete(self.incomplete_reason(at)));
        };
        let text = decode(&self.source[at..end], at)?;
        self.emit(TokenType::Command, at, end, text)?;
        self.to_argument_position(true);
        Ok(Scan::Done)
    }

    fn scan_argument(&mut self, at: usize, c: char) -> Result<Scan, LexError> {
        let glued = self.last_piece_end == Some(at);
        let kind = match c {
            '\'' => TokenType::SingleQuotedArgument,
            '"' => TokenType::DoubleQuotedArgument,
            '-' if self.allow_options && !glued => {
                let next = self.peek(at + 1);
                match next {
                    Some(n) if n.is_ascii_digit() || n == '.' || n == '\n' || is_delimiter(n) => {
                        TokenType::RawArgument
                    }
                    None => TokenType::RawArgument,
                    Some(_) => TokenType::Option,
                }
            }
            _ => TokenType::RawArgument,
        };

        let end = match kind {
            TokenType::SingleQuotedArgument | TokenType::DoubleQuotedArgument => {
                match self.quoted_end(at) {
                    Some(end) => end,
                    None => return Ok(Scan::Incomplete(Pending::Quote(at))),
                }
            }
            _ => match self.raw_end(at)? {
                Some(end) => end,
                None => return Ok(Scan::Incomplete(Pending::Escape(at))),
            },
        };

        let raw = &self.source[at..end];
        if kind == TokenType::Option && raw == "--" {
            // `--` ends option recognition for the rest of the command.
            self.allow_options = false;
            self.advance(end);
            return Ok(Scan::Done);
        }
        let text = decode(raw, at)?;
        self.emit(kind, at, end, text)?;
        Ok(Scan::Done)
    }

    fn scan_redirection(&mut self, at: usize) -> Result<Scan, LexError> {
        let mut name_at = at + 1;
        loop {
            name_at = self.skip_blanks(name_at);
            if self.peek(name_at) == Some('\n') {
                name_at += 1;
                continue;
            }
            break;
        }
        let Some(c) = self.peek(name_at) else {
            return Ok(Scan::Incomplete(Pending::Pipe(at)));
        };
        if c == '!' {
            return self.scan_shell(at, name_at + 1);
        }
        if matches!(c, ';' | '|' | '>' | '{' | '}') {
            return Err(LexError::MissingRedirection(Span::new(at, at + 1)));
        }
        let Some(end) = self.word_end(name_at)? else {
            return Ok(Scan::Incomplete(self.incomplete_reason(at)));
        };
        let name = decode(&self.source[name_at..end], name_at)?;
        if name.is_empty() || name == "sh" {
            return self.scan_shell(at, end);
        }
        self.emit(TokenType::Redirection, name_at, end, name)?;
        self.to_argument_position(true);
        Ok(Scan::Done)
    }

    /// Everything from `from` to the next `;` or newline, verbatim.
    fn scan_shell(&mut self, at: usize, from: usize) -> Result<Scan, LexError> {
        let start = self.skip_blanks(from);
        let stop = self.source[start..]
            .find([';', '\n'])
            .map_or(self.source.len(), |i| start + i);
        let text = self.source[start..stop].trim_end();
        if text.is_empty() {
            return Err(LexError::MissingShellCommand(Span::new(at, stop.max(at + 1))));
        }
        let end = start + text.len();
        let text = text.to_string();
        self.emit(TokenType::ShellRedirection, start, end, text)?;
        self.to_argument_position(false);
        Ok(Scan::Done)
    }

    fn scan_file(&mut self, at: usize) -> Result<Scan, LexError> {
        let path_at = self.skip_blanks(at + 1);
        match self.peek(path_at) {
            None => return Err(LexError::MissingFileName(Span::new(at, at + 1))),
            Some(c) if is_delimiter(c) || c == '\n' => {
                return Err(LexError::MissingFileName(Span::new(at, at + 1)));
            }
            Some(_) => {}
        }
        let Some(end) = self.word_end(path_at)? else {
            return Ok(Scan::Incomplete(self.incomplete_reason(path_at)));
        };
        let after = self.skip_blanks(end);
        match self.peek(after) {
            None | Some(';' | '\n' | '}' | '#') => {}
            Some(c) => {
                return Err(LexError::StrayAfterFileRedirection(Span::new(
                    after,
                    after + c.len_utf8(),
                )));
            }
        }
        let path = decode(&self.source[path_at..end], path_at)?;
        self.emit(TokenType::FileRedirection, path_at, end, path)?;
        self.to_argument_position(false);
        Ok(Scan::Done)
    }

    /// Classify why a word starting at `at` could not be completed.
    fn incomplete_reason(&self, at: usize) -> Pending {
        let mut quote = None;
        let mut chars = self.source[at..].char_indices();
        while let Some((i, c)) = chars.next() {
            match (quote, c) {
                (None, '\'' | '"') => quote = Some((c, at + i)),
                (Some((q, _)), c) if c == q => quote = None,
                (Some(('"', _)) | None, '\\') => {
                    chars.next();
                }
                _ => {}
            }
        }
        match quote {
            Some((_, start)) => Pending::Quote(start),
            None => Pending::Escape(at),
        }
    }

    /// End of a quoted piece starting at the quote character.
    fn quoted_end(&self, at: usize) -> Option<usize> {
        let quote = self.peek(at)?;
        let mut chars = self.source[at + 1..].char_indices();
        while let Some((i, c)) = chars.next() {
            if c == quote {
                return Some(at + 1 + i + 1);
            }
            if c == '\\' && quote == '"' {
                chars.next()?;
            }
        }
        None
    }

    /// End of an unquoted piece. `None` when input ends inside an escape.
    fn raw_end(&self, at: usize) -> Result<Option<usize>, LexError> {
        let mut i = at;
        while let Some(c) = self.peek(i) {
            if c == '\\' {
                match self.peek(i + 1) {
                    None => return Ok(None),
                    Some(_) => {
                        if let Some(join) = self.line_join_end(i) {
                            match join {
                                Some(end) => {
                                    i = end;
                                    continue;
                                }
                                None => return Ok(None),
                            }
                        }
                        let escaped = self.peek(i + 1).map_or(0, char::len_utf8);
                        i += 1 + escaped;
                        continue;
                    }
                }
            }
            if is_delimiter(c) || c == '\n' || c == '\'' || c == '"' {
                break;
            }
            i += c.len_utf8();
        }
        Ok(Some(i))
    }

    /// End of a word whose quoted pieces are merged (command and redirection
    /// names, file paths).
    fn word_end(&self, at: usize) -> Result<Option<usize>, LexError> {
        let mut i = at;
        loop {
            match self.peek(i) {
                Some('\'' | '"') => match self.quoted_end(i) {
                    Some(end) => i = end,
                    None => return Ok(None),
                },
                Some(c) if is_delimiter(c) || c == '\n' => return Ok(Some(i)),
                None => return Ok(Some(i)),
                Some(_) => match self.raw_end(i)? {
                    Some(end) if end == i => return Ok(Some(i)),
                    Some(end) => i = end,
                    None => return Ok(None),
                },
            }
        }
    }

    fn emit(
        &mut self,
        kind: TokenType,
        start: usize,
        end: usize,
        text: String,
    ) -> Result<(), LexError> {
        self.advance(start);
        let arg_index = if kind.is_structural() {
            0
        } else if kind.is_argument() && self.last_piece_end == Some(start) {
            self.arg_index
        } else {
            self.arg_index += 1;
            self.arg_index
        };
        self.last_piece_end = kind.is_argument().then_some(end);
        let token = Token {
            kind,
            text,
            start,
            end,
            line: self.line,
            arg_index,
            node: None,
        };
        self.tree.insert(token)?;
        self.advance(end);
        Ok(())
    }
}

/// Characters that end an unquoted piece.
fn is_delimiter(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | ';' | '|' | '>' | '{' | '}')
}

/// Decode the source text of a token: strip quotes and resolve escapes.
///
/// `base` is the byte offset of `raw` in the script source, used to position
/// escape errors. Single-quoted sections are literal.
pub fn decode(raw: &str, base: usize) -> Result<String, LexError> {
    let mut out = String::with_capacity(raw.len());
    let mut quote: Option<char> = None;
    let mut chars = raw.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (Some('\''), c) => out.push(c),
            (_, '\\') => {
                let Some(&(_, next)) = chars.peek() else {
                    return Err(LexError::DanglingEscape(Span::new(base + i, base + i + 1)));
                };
                // Backslash, blanks, newline: joined lines.
                let rest = &raw[i + 1..];
                let blanks = rest.len() - rest.trim_start_matches([' ', '\t', '\r']).len();
                if rest[blanks..].starts_with('\n') {
                    for _ in 0..=blanks {
                        chars.next();
                    }
                    continue;
                }
                chars.next();
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'u' => out.push(hex_escape(&mut chars, 4, raw, i, base)?),
                    'x' => out.push(hex_escape(&mut chars, 2, raw, i, base)?),
                    '0'..='7' => out.push(octal_escape(&mut chars, next, raw, i, base)?),
                    other => out.push(other),
                }
            }
            (_, c) => out.push(c),
        }
    }
    Ok(out)
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

/// `\uHHHH` / `\xHH`; `i` is the offset of the backslash in `raw`.
fn hex_escape(
    chars: &mut Chars<'_>,
    digits: usize,
    raw: &str,
    i: usize,
    base: usize,
) -> Result<char, LexError> {
    let mut value = 0u32;
    let mut consumed = 0;
    while consumed < digits {
        match chars.peek() {
            Some(&(_, d)) if d.is_ascii_hexdigit() => {
                value = value * 16 + d.to_digit(16).unwrap_or(0);
                consumed += 1;
                chars.next();
            }
            _ => break,
        }
    }
    let end = i + 2 + consumed;
    let invalid = || LexError::InvalidEscape {
        seq: raw[i..end].to_string(),
        span: Span::new(base + i, base + end),
    };
    if consumed != digits {
        return Err(invalid());
    }
    char::from_u32(value).ok_or_else(invalid)
}

/// `\O`, `\OO` or `\OOO`, at most 0o377.
fn octal_escape(
    chars: &mut Chars<'_>,
    first: char,
    raw: &str,
    i: usize,
    base: usize,
) -> Result<char, LexError> {
    let mut value = first.to_digit(8).unwrap_or(0);
    let mut consumed = 1;
    while consumed < 3 {
        match chars.peek() {
            Some(&(_, d)) if d.is_digit(8) => {
                value = value * 8 + d.to_digit(8).unwrap_or(0);
                consumed += 1;
                chars.next();
            }
            _ => break,
        }
    }
    let end = i + 1 + consumed;
    match char::from_u32(value).filter(|_| value <= 0o377) {
        Some(c) => Ok(c),
        None => Err(LexError::InvalidEscape {
            seq: raw[i..end].to_string(),
            span: Span::new(base + i, base + end),
        }),
    }
}

/// Tokenize a complete input in one go, as when loading a script.
pub fn tokenize(input: &str) -> Result<Script, LexError> {
    let mut tokenizer = Tokenizer::new();
    tokenizer.feed(input)?;
    tokenizer.finish()
}
