//! Parsing 6502 assembly source text.
//!
//! Source is read one line at a time. This module consists of:
//! - [`lex`]: tokenizing a single line of source ([`lex::LineLexer`]).
//! - [`expr`]: evaluating operand expressions over those tokens ([`expr::eval`]).
//!
//! Statements themselves are recognized by the assembler (see [`crate::asm`]),
//! as the category of a token (label, mnemonic, directive) depends on where it appears.

pub mod lex;
pub mod expr;
