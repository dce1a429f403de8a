pub mod tokenize;
mod tree;
pub mod types;
pub mod walker;

pub use tokenize::{Tokenizer, decode, tokenize};
pub use types::{CommandNode, NodeId, Script, Span, Token, TokenRange, TokenType};
pub use walker::{Args, BlockWalker, CommandWalker, RedirWalker};
