//! Incremental command-tree builder.
//!
//! Every token emitted by the tokenizer goes through [`TreeBuilder::insert`],
//! which records token ranges on [`CommandNode`]s instead of building a
//! pointer tree. One [`ParseState`] frame exists per open block.

use log::trace;

use super::types::{CommandNode, NodeId, Script, Token, TokenRange, TokenType};
use crate::error::LexError;

/// Heads of the innermost open block.
#[derive(Debug, Clone, Default)]
struct ParseState {
    command_head: Option<NodeId>,
    redirection_head: Option<NodeId>,
    /// Index of the `{` token that opened this frame (`None` at the root).
    opened_at: Option<usize>,
}

impl ParseState {
    /// Redirection head if set, else command head.
    fn active(&self) -> Option<NodeId> {
        self.redirection_head.or(self.command_head)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TreeBuilder {
    tokens: Vec<Token>,
    nodes: Vec<CommandNode>,
    stack: Vec<ParseState>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            nodes: Vec::new(),
            stack: vec![ParseState::default()],
        }
    }
}

impl TreeBuilder {
    /// A builder whose root frame is already headed by an empty command at
    /// token 0, so argument pieces can follow directly.
    pub fn headed() -> Self {
        let mut builder = Self::default();
        let id = builder.alloc(0);
        builder.tokens.push(Token {
            kind: TokenType::Command,
            text: String::new(),
            start: 0,
            end: 0,
            line: 1,
            arg_index: 0,
            node: Some(id),
        });
        let root = &mut builder.stack[0];
        root.command_head = Some(id);
        root.redirection_head = Some(id);
        builder
    }

    /// Number of open blocks.
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Token index of the innermost unclosed `{`.
    pub fn innermost_open(&self) -> Option<&Token> {
        self.stack
            .last()
            .and_then(|frame| frame.opened_at)
            .map(|i| &self.tokens[i])
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn snapshot(&self, source: &str) -> Script {
        Script {
            source: source.to_string(),
            tokens: self.tokens.clone(),
            nodes: self.nodes.clone(),
        }
    }

    pub fn into_script(self, source: String) -> Script {
        Script {
            source,
            tokens: self.tokens,
            nodes: self.nodes,
        }
    }

    /// Append a token and update the range tree.
    pub fn insert(&mut self, mut token: Token) -> Result<(), LexError> {
        let index = self.tokens.len();
        let span = token.span();
        let frame = self.stack.len() - 1;

        match token.kind {
            TokenType::Command => {
                let id = self.alloc(index);
                token.node = Some(id);
                let state = &mut self.stack[frame];
                state.command_head = Some(id);
                state.redirection_head = Some(id);
            }
            TokenType::CommandSeparator => {
                let state = &mut self.stack[frame];
                state.command_head = None;
                state.redirection_head = None;
            }
            kind if kind.is_redirection() => {
                let Some(owner) = self.stack[frame].command_head else {
                    return Err(LexError::EmptyCommandHead(span));
                };
                let id = self.alloc(index);
                token.node = Some(id);
                self.nodes[owner].redirections.push(TokenRange::at(index));
                self.nodes[owner].command.end = index;
                self.stack[frame].redirection_head = Some(id);
            }
            TokenType::Option
            | TokenType::RawArgument
            | TokenType::SingleQuotedArgument
            | TokenType::DoubleQuotedArgument => {
                let Some(head) = self.stack[frame].active() else {
                    return Err(LexError::EmptyCommandHead(span));
                };
                let node = &mut self.nodes[head];
                if !node.blocks.is_empty() {
                    return Err(LexError::ArgumentAfterBlock(span));
                }
                match node.args.as_mut() {
                    Some(args) => args.end = index,
                    None => node.args = Some(TokenRange::at(index)),
                }
                self.extend(frame, index);
            }
            TokenType::BlockBegin => {
                let Some(head) = self.stack[frame].active() else {
                    return Err(LexError::EmptyCommandHead(span));
                };
                self.nodes[head].blocks.push(TokenRange::at(index));
                self.extend(frame, index);
                self.stack.push(ParseState {
                    opened_at: Some(index),
                    ..ParseState::default()
                });
            }
            TokenType::BlockEnd => {
                if self.stack.len() == 1 {
                    return Err(LexError::BlockUnderflow(span));
                }
                self.stack.pop();
                let parent = self.stack.len() - 1;
                // The parent's active head opened the block being closed.
                if let Some(head) = self.stack[parent].active()
                    && let Some(block) = self.nodes[head].blocks.last_mut()
                {
                    block.end = index;
                }
                self.extend(parent, index);
            }
            _ => unreachable!("all token kinds are handled above"),
        }

        trace!(
            "token #{index} {} {:?} arg={} depth={}",
            token.kind.as_str(),
            token.text,
            token.arg_index,
            self.depth()
        );
        self.tokens.push(token);
        Ok(())
    }

    fn alloc(&mut self, index: usize) -> NodeId {
        self.nodes.push(CommandNode::new(index));
        self.nodes.len() - 1
    }

    /// Grow the heads of `frame` (and the open redirection entry) to `index`.
    fn extend(&mut self, frame: usize, index: usize) {
        let state = &self.stack[frame];
        if let Some(cmd) = state.command_head {
            let node = &mut self.nodes[cmd];
            node.command.end = node.command.end.max(index);
            if state.redirection_head != Some(cmd)
                && let Some(redir) = node.redirections.last_mut()
            {
                redir.end = redir.end.max(index);
            }
        }
        if let Some(redir) = state.redirection_head
            && Some(redir) != state.command_head
        {
            let node = &mut self.nodes[redir];
            node.command.end = node.command.end.max(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(kind: TokenType, text: &str, at: usize) -> Token {
        Token {
            kind,
            text: text.to_string(),
            start: at,
            end: at + text.len(),
            line: 1,
            arg_index: 0,
            node: None,
        }
    }

    #[test]
    fn argument_without_command_is_rejected() {
        let mut tree = TreeBuilder::default();
        let err = tree
            .insert(token(TokenType::RawArgument, "x", 0))
            .unwrap_err();
        assert!(matches!(err, LexError::EmptyCommandHead(_)));
    }

    #[test]
    fn block_end_at_root_underflows() {
        let mut tree = TreeBuilder::default();
        let err = tree.insert(token(TokenType::BlockEnd, "}", 0)).unwrap_err();
        assert!(matches!(err, LexError::BlockUnderflow(_)));
    }

    #[test]
    fn separator_clears_heads() {
        let mut tree = TreeBuilder::default();
        tree.insert(token(TokenType::Command, "a", 0)).unwrap();
        tree.insert(token(TokenType::CommandSeparator, ";", 1))
            .unwrap();
        let err = tree
            .insert(token(TokenType::Redirection, "r", 3))
            .unwrap_err();
        assert!(matches!(err, LexError::EmptyCommandHead(_)));
    }

    #[test]
    fn block_extends_parent_command() {
        let mut tree = TreeBuilder::default();
        tree.insert(token(TokenType::Command, "a", 0)).unwrap();
        tree.insert(token(TokenType::BlockBegin, "{", 2)).unwrap();
        assert_eq!(tree.depth(), 1);
        tree.insert(token(TokenType::Command, "b", 4)).unwrap();
        tree.insert(token(TokenType::BlockEnd, "}", 6)).unwrap();
        assert_eq!(tree.depth(), 0);
        let script = tree.into_script("a { b }".into());
        let a = script.node(0);
        assert_eq!(a.command, TokenRange { start: 0, end: 3 });
        assert_eq!(a.blocks, vec![TokenRange { start: 1, end: 3 }]);
        assert_eq!(script.node(1).command, TokenRange::at(2));
    }
}
