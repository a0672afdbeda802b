//! A grammar-driven LALR(1)/LR(1) parser generator and runtime.
//!
//! The pipeline is `Language` → `GrammarDB` → `DFA` → `ParseTable` →
//! `Parser`, where the parser drives a stateful `Lexer` over raw text.

pub mod closure;
pub mod dfa;
pub mod first_sets;
pub mod grammar;
pub mod language;
pub mod lexer;
pub mod parser;
pub mod table;
pub mod types;
pub mod util;

pub use crate::{
    grammar::GrammarDB,
    language::{Language, LexRule, Token},
    lexer::{Lexeme, Lexer},
    parser::{Callbacks, ParseTree, Parser},
    table::{ParseTable, ParserGenerator, TableKind},
};
