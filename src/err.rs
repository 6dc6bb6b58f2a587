//! Error interface for this crate.
//! 
//! Every error (and assembler warning) in this crate implements [`Error`],
//! which provides the source location of the problem (if one is known)
//! and an optional hint on how to fix it.
//! 
//! The error types of each module are re-exported here for convenience.

use std::borrow::Cow;

pub use crate::asm::source::SourceLocation;
pub use crate::asm::{AsmErr, AsmErrKind, AsmWarning, AsmWarningKind};
pub use crate::isa::table::TableErr;
pub use crate::parse::expr::ExprErr;
pub use crate::parse::lex::LexErr;
pub use crate::sim::SimErr;

/// Unified error interface for all errors in this crate.
/// 
/// Note that the [`Display`] implementation is used for a brief message,
/// whereas [`Error::help`] is used for any clarifying messages.
/// 
/// [`Display`]: std::fmt::Display
pub trait Error: std::error::Error {
    /// The source line where this error (or warning) occurred, if known.
    fn location(&self) -> Option<&SourceLocation> {
        None
    }

    /// A clarifying message to help aid someone in how to fix the message.
    /// 
    /// By default this is `None`.
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}
