//! Assembling 6502 source into the memory image.
//!
//! This module is used to convert source text into instructions in a simulator's [`Memory`].
//! There is no intermediate object file: assembling writes the instruction bytes
//! straight into the memory the simulator executes out of.
//!
//! The assembler module notably consists of:
//! - [`Assembler`]: the two-pass assembler, which owns the registered sources
//! - [`Assembly`]: the result of assembling, holding symbols, scopes, the line map, breakpoints, and warnings
//! - [`source`]: the source manager, which handles `.include`s
//! - [`symbols`]: the symbol table, scopes, and line map
//!
//! # Passes
//!
//! Assembly reads every source line (including included files) twice:
//! 1. In the first pass, forward references are allowed to be undefined.
//!    Any instruction whose operand is undefined is assumed to take its largest (absolute) form.
//! 2. In the second pass, every reference must resolve. Bytes are written to memory
//!    and instructions are recorded in the line map.
//!
//! Both passes start writing at [`AsmFlags::default_org`].
//!
//! # Example
//! ```
//! use m6502_ensemble::asm::{Assembler, AsmFlags};
//! use m6502_ensemble::sim::mem::Memory;
//!
//! let mut asm = Assembler::new(AsmFlags::default());
//! let root = asm.add_text("main.asm", "
//!         JMP target
//!         NOP
//! target: RTS
//! ");
//!
//! let mut mem = Memory::new(&mut 0u8);
//! let assembly = asm.assemble(root, &mut mem).unwrap();
//!
//! assert_eq!(assembly.lookup_label("target"), Some(0x0204));
//! assert_eq!(&mem.as_slice()[0x0200..0x0205], [0x4C, 0x04, 0x02, 0xEA, 0x60]);
//! ```

pub mod source;
pub mod symbols;

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::isa::table::table;
use crate::isa::{AddrMode, Op};
use crate::parse::expr::{self, ExprErr, SymbolLookup, Value};
use crate::parse::lex::{is_label_name, LexErr, LineLexer, Token};
use crate::sim::mem::Memory;
use crate::sim::trap::Trap;

use self::source::{FileId, OpenErr, SourceLocation, SourceManager};
use self::symbols::{Definition, LineMap, Scopes, Symbol, SymbolKind, SymbolTable};

/// Configuration flags for the [`Assembler`].
///
/// These can be modified after the `Assembler` is created with [`Assembler::flags_mut`]
/// and will take effect on the next call to [`Assembler::assemble`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmFlags {
    /// Whether label definitions must end with `:`.
    ///
    /// When this is false, a word at the start of a line which is not
    /// a mnemonic or directive is a label.
    ///
    /// By default, this flag is `false`.
    pub require_colon: bool,

    /// The address the assembler starts writing at, at the start of each pass.
    ///
    /// By default, this is `$0200`.
    pub default_org: u16,

    /// Directories searched (in order) for `.include`d files
    /// that are not found relative to the including file.
    ///
    /// By default, this is empty.
    pub include_dirs: Vec<PathBuf>,

    /// Whether label and symbol names are case-sensitive.
    ///
    /// By default, this flag is `true`.
    pub case_sensitive_labels: bool,
}
impl Default for AsmFlags {
    fn default() -> Self {
        Self {
            require_colon: false,
            default_org: 0x0200,
            include_dirs: vec![],
            case_sensitive_labels: true,
        }
    }
}

/// Kinds of errors that can occur from assembling given assembly code.
///
/// See [`AsmErr`] for this error type with location information included.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AsmErrKind {
    /// A source file could not be opened.
    Open {
        /// The path that was attempted.
        path: PathBuf,
        /// Why the file couldn't be opened.
        reason: String
    },
    /// A line could not be tokenized.
    Lex(LexErr),
    /// An expression could not be evaluated.
    Expr(ExprErr),
    /// A word in instruction position is not a known mnemonic.
    UnknownMnemonic(String),
    /// A word starting with `.` is not a known directive.
    UnknownDirective(String),
    /// The operation does not support the addressing mode of its operand.
    UnsupportedMode {
        /// The operation.
        op: Op,
        /// The addressing mode.
        mode: AddrMode
    },
    /// A branch target is too far from the branch (pass 2).
    BranchOutOfRange {
        /// The offset from the following instruction to the target.
        offset: i32
    },
    /// An indexed indirect operand was not a zero page address (pass 2).
    ZeroPageRequired(i32),
    /// The line could not be parsed.
    SyntaxError(String),
    /// A label was defined with an invalid name.
    InvalidLabel(String),
    /// A label was defined without a colon, but colons are required.
    MissingColon(String),
    /// An `.org` was given a value which is not known yet.
    UndeterminedOrg,
    /// A directive expected a string literal.
    ExpectedString,
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, reason }        => write!(f, "could not open {}: {reason}", path.display()),
            Self::Lex(e)                       => e.fmt(f),
            Self::Expr(e)                      => e.fmt(f),
            Self::UnknownMnemonic(m)           => write!(f, "unknown mnemonic '{m}'"),
            Self::UnknownDirective(d)          => write!(f, "unknown directive '{d}'"),
            Self::UnsupportedMode { op, mode } => write!(f, "{op} does not support {mode} addressing"),
            Self::BranchOutOfRange { offset }  => write!(f, "branch target is out of range (offset {offset})"),
            Self::ZeroPageRequired(v)          => write!(f, "indexed indirect operand must be in zero page (got ${v:X})"),
            Self::SyntaxError(s)               => f.write_str(s),
            Self::InvalidLabel(l)              => write!(f, "invalid label name '{l}'"),
            Self::MissingColon(l)              => write!(f, "label '{l}' is missing a colon"),
            Self::UndeterminedOrg              => f.write_str("cannot determine address of .org"),
            Self::ExpectedString               => f.write_str("expected a string literal"),
        }
    }
}
impl From<OpenErr> for AsmErrKind {
    fn from(value: OpenErr) -> Self {
        AsmErrKind::Open { path: value.path, reason: value.error.to_string() }
    }
}
impl From<LexErr> for AsmErrKind {
    fn from(value: LexErr) -> Self {
        AsmErrKind::Lex(value)
    }
}
impl From<ExprErr> for AsmErrKind {
    fn from(value: ExprErr) -> Self {
        match value {
            ExprErr::Lex(e) => AsmErrKind::Lex(e),
            e => AsmErrKind::Expr(e),
        }
    }
}

/// Error from assembling given assembly code.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmErr {
    /// The kind of error.
    pub kind: AsmErrKind,
    /// The line which caused this error, if it is known.
    pub location: Option<SourceLocation>,
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new(kind: AsmErrKind, location: Option<SourceLocation>) -> Self {
        AsmErr { kind, location }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{loc}: {}", self.kind),
            None => self.kind.fmt(f),
        }
    }
}
impl std::error::Error for AsmErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            AsmErrKind::Lex(e) => Some(e),
            AsmErrKind::Expr(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for AsmErr {
    fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    fn help(&self) -> Option<Cow<str>> {
        use crate::err::Error;

        match &self.kind {
            AsmErrKind::Open { .. }            => Some("includes are searched for next to the including file, then in the include directories".into()),
            AsmErrKind::Lex(e)                 => e.help(),
            AsmErrKind::Expr(e)                => e.help(),
            AsmErrKind::UnknownMnemonic(_)     => Some("only the documented 6502 instructions are supported".into()),
            AsmErrKind::UnknownDirective(_)    => Some("the directives are .byte, .word, .org, .include, and .break".into()),
            AsmErrKind::UnsupportedMode { op, .. } => {
                let modes: Vec<_> = table().modes(*op).iter().map(|m| m.to_string()).collect();
                Some(format!("{op} supports: {}", modes.join(", ")).into())
            },
            AsmErrKind::BranchOutOfRange { .. } => Some("a branch can reach 128 bytes back or 127 bytes forward; try branching over a JMP".into()),
            AsmErrKind::ZeroPageRequired(_)    => Some("indirect pointers must be stored in zero page ($00-$FF)".into()),
            AsmErrKind::SyntaxError(_)         => None,
            AsmErrKind::InvalidLabel(_)        => Some("labels start with a letter, `_`, or `.` and otherwise consist of letters, digits, and `_`".into()),
            AsmErrKind::MissingColon(_)        => Some("try adding a `:` after the label".into()),
            AsmErrKind::UndeterminedOrg        => Some("symbols used in .org must be defined before the .org".into()),
            AsmErrKind::ExpectedString         => Some("try surrounding the path in double quotes".into()),
        }
    }
}

/// Kinds of warnings that can occur while assembling.
///
/// Warnings do not stop assembly. They are collected in the [`Assembly`]
/// and are also logged when they occur.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AsmWarningKind {
    /// A symbol was redefined with a different value.
    LabelRedefined {
        /// The name of the symbol.
        name: String,
        /// The previous value.
        old: i32,
        /// The new value.
        new: i32
    },
    /// An immediate operand does not fit in a byte.
    ImmediateOutOfRange(i32),
    /// A value does not fit in its destination.
    ValueOutOfRange(i32),
    /// An `.org` address does not fit in 16 bits.
    OrgOutOfRange(i32),
    /// A local label was defined before any non-local label in its file.
    LocalOutsideScope(String),
    /// A label's value differs between the two passes.
    ///
    /// This happens when an instruction before the label changes size between passes
    /// (e.g., an operand that was undefined in the first pass resolves to a zero page address).
    PhaseDrift {
        /// The name of the label.
        name: String,
        /// The value from the first pass.
        first: i32,
        /// The value from the second pass.
        second: i32
    },
    /// An instruction was written at an address that already held an instruction.
    OverlappingCode(u16),
}
impl std::fmt::Display for AsmWarningKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LabelRedefined { name, old, new } => write!(f, "'{name}' redefined from {old} to {new}"),
            Self::ImmediateOutOfRange(v) => write!(f, "immediate value {v} does not fit in a byte"),
            Self::ValueOutOfRange(v) => write!(f, "value {v} is out of range and was truncated"),
            Self::OrgOutOfRange(v) => write!(f, ".org address {v} is out of range and was truncated"),
            Self::LocalOutsideScope(l) => write!(f, "local label '{l}' is not inside any scope"),
            Self::PhaseDrift { name, first, second } => write!(f, "'{name}' moved from ${first:04X} to ${second:04X} between passes"),
            Self::OverlappingCode(addr) => write!(f, "code at ${addr:04X} was overwritten"),
        }
    }
}

/// A warning from assembling, with its location.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmWarning {
    /// The kind of warning.
    pub kind: AsmWarningKind,
    /// The line which caused the warning.
    pub location: SourceLocation,
}
impl std::fmt::Display for AsmWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.kind)
    }
}
impl std::error::Error for AsmWarning {}
impl crate::err::Error for AsmWarning {
    fn location(&self) -> Option<&SourceLocation> {
        Some(&self.location)
    }

    fn help(&self) -> Option<Cow<str>> {
        match &self.kind {
            AsmWarningKind::PhaseDrift { .. } => Some("try defining the operand's symbol before it is used".into()),
            AsmWarningKind::LocalOutsideScope(_) => Some("define a label without a `.` above this one".into()),
            _ => None
        }
    }
}

/// The assembler.
///
/// Sources are registered with [`Assembler::add_text`] or [`Assembler::add_file`]
/// and then assembled from a root source with [`Assembler::assemble`].
/// Registered sources are kept across calls to `assemble`, so a source can be
/// re-assembled after an edit by registering the new text.
#[derive(Debug)]
pub struct Assembler {
    flags: AsmFlags,
    sources: SourceManager,
}
impl Assembler {
    /// Creates a new assembler with the given flags.
    pub fn new(flags: AsmFlags) -> Self {
        let sources = SourceManager::new(flags.include_dirs.clone());
        Self { flags, sources }
    }

    /// The assembler's configuration.
    pub fn flags(&self) -> &AsmFlags {
        &self.flags
    }
    /// The assembler's configuration, mutably.
    pub fn flags_mut(&mut self) -> &mut AsmFlags {
        &mut self.flags
    }

    /// Registers in-memory source text.
    pub fn add_text(&mut self, name: &str, text: &str) -> FileId {
        self.sources.add_text(name, text)
    }
    /// Registers a source file (which is read when first assembled).
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> FileId {
        self.sources.add_file(path)
    }
    /// The registered sources.
    pub fn sources(&self) -> &SourceManager {
        &self.sources
    }

    /// Assembles the given root source into memory.
    ///
    /// Any `.include`s in the root are read as part of the root.
    /// On failure, no [`Assembly`] is produced, but memory may have been partially written.
    pub fn assemble(&mut self, root: FileId, mem: &mut Memory) -> Result<Assembly, AsmErr> {
        self.sources.set_include_dirs(self.flags.include_dirs.clone());
        let mut state = AsmState::new(&self.flags);

        let result = [Pass::First, Pass::Second].into_iter()
            .try_for_each(|pass| state.run_pass(pass, root, &mut self.sources, mem));
        self.sources.reset();

        match result {
            Ok(()) => Ok(state.finish()),
            Err(e) => {
                tracing::debug!(error = %e, "assembly failed");
                Err(e)
            }
        }
    }
}

/// An assembler pass.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Pass {
    First,
    Second
}

/// The working state of one call to [`Assembler::assemble`].
struct AsmState<'f> {
    flags: &'f AsmFlags,
    pass: Pass,
    pc: u16,
    /// The scope of the line being assembled.
    scope: Option<String>,

    symbols: SymbolTable,
    /// The value each symbol was first defined with in the first pass.
    first_values: HashMap<String, i32>,
    /// The symbols defined so far in the current pass.
    defined: HashSet<String>,
    scopes: Scopes,

    line_map: LineMap,
    breakpoints: BTreeSet<u16>,
    warnings: Vec<AsmWarning>,
    entry_point: Option<u16>,
}
impl<'f> AsmState<'f> {
    fn new(flags: &'f AsmFlags) -> Self {
        let mut symbols = SymbolTable::new();
        for &trap in Trap::ALL {
            symbols.define(trap.symbol(), Symbol {
                value: i32::from(trap.addr()),
                kind: SymbolKind::Builtin,
                location: None
            });
        }

        Self {
            flags,
            pass: Pass::First,
            pc: flags.default_org,
            scope: None,
            symbols,
            first_values: HashMap::new(),
            defined: HashSet::new(),
            scopes: Scopes::default(),
            line_map: LineMap::default(),
            breakpoints: BTreeSet::new(),
            warnings: vec![],
            entry_point: None,
        }
    }

    fn run_pass(&mut self, pass: Pass, root: FileId, sources: &mut SourceManager, mem: &mut Memory) -> Result<(), AsmErr> {
        tracing::debug!(?pass, "starting assembler pass");
        self.pass = pass;
        self.pc = self.flags.default_org;
        self.defined.clear();
        self.line_map = LineMap::default();
        self.breakpoints.clear();
        self.warnings.clear();
        self.entry_point = None;

        sources.begin(root).map_err(|e| AsmErr::new(e.into(), None))?;
        while let Some((loc, text)) = sources.next_line() {
            self.line(&loc, &text, sources, mem)
                .map_err(|kind| AsmErr::new(kind, Some(loc)))?;
        }

        Ok(())
    }

    fn finish(self) -> Assembly {
        debug_assert!(self.line_map.is_strictly_increasing(), "line map should be ordered by address");
        tracing::debug!(
            symbols = self.symbols.len(),
            instructions = self.line_map.len(),
            warnings = self.warnings.len(),
            "assembly complete"
        );

        Assembly {
            symbols: self.symbols,
            scopes: self.scopes,
            line_map: self.line_map,
            breakpoints: self.breakpoints,
            warnings: self.warnings,
            entry_point: self.entry_point,
            case_sensitive: self.flags.case_sensitive_labels,
        }
    }

    fn warn(&mut self, kind: AsmWarningKind, loc: &SourceLocation) {
        // Both passes visit every line, so only the second pass reports.
        if self.pass != Pass::Second { return };

        tracing::warn!(location = %loc, "{kind}");
        self.warnings.push(AsmWarning { kind, location: loc.clone() });
    }

    fn normalize<'a>(&self, name: &'a str) -> Cow<'a, str> {
        match self.flags.case_sensitive_labels {
            true  => Cow::Borrowed(name),
            false => Cow::Owned(name.to_ascii_lowercase()),
        }
    }

    /// The fully-scoped name of a symbol reference in the current scope.
    fn qualify(&self, name: &str) -> String {
        let name = self.normalize(name);
        match (name.starts_with('.'), &self.scope) {
            (true, Some(scope)) => format!("{scope}{name}"),
            _ => name.into_owned(),
        }
    }

    fn advance(&mut self, n: u16) {
        self.pc = self.pc.wrapping_add(n);
    }

    fn emit(&mut self, bytes: &[u8], mem: &mut Memory) {
        if self.pass == Pass::Second {
            mem.load(self.pc, bytes);
        }
        // Data is never more than a line long.
        self.advance(bytes.len() as u16);
    }

    /// Assembles a single line.
    fn line(&mut self, loc: &SourceLocation, text: &str, sources: &mut SourceManager, mem: &mut Memory) -> Result<(), AsmErrKind> {
        self.scope = self.scopes.scope_at(loc.file, loc.line).map(String::from);

        let mut lx = LineLexer::new(text);
        let Some(first) = lx.next_token()? else { return Ok(()) };
        let Token::Word(word) = first else {
            return Err(AsmErrKind::SyntaxError(format!("unexpected '{first}' at start of line")));
        };

        match lx.peek()? {
            Some(Token::Punct(':')) => {
                lx.next_token()?;
                self.define_label(word, loc)?;
                self.statement(&mut lx, loc, sources, mem)
            },
            Some(Token::Punct('=')) => {
                lx.next_token()?;
                self.assign(word, &mut lx, loc)
            },
            _ if Op::from_mnemonic(word).is_some() || Directive::parse(word).is_some() => {
                self.statement(&mut LineLexer::new(text), loc, sources, mem)
            },
            next => {
                // A label without a colon must be followed by a statement (or nothing).
                let starts_statement = match next {
                    None => true,
                    Some(Token::Word(w)) => Op::from_mnemonic(w).is_some() || Directive::parse(w).is_some(),
                    _ => false,
                };
                match (starts_statement, word.starts_with('.')) {
                    (false, true)  => return Err(AsmErrKind::UnknownDirective(word.to_string())),
                    (false, false) => return Err(AsmErrKind::UnknownMnemonic(word.to_string())),
                    (true, _) if self.flags.require_colon => return Err(AsmErrKind::MissingColon(word.to_string())),
                    (true, _) => {},
                }

                self.define_label(word, loc)?;
                self.statement(&mut lx, loc, sources, mem)
            },
        }
    }

    /// Assembles the instruction or directive that makes up the rest of the line (if there is one).
    fn statement(&mut self, lx: &mut LineLexer, loc: &SourceLocation, sources: &mut SourceManager, mem: &mut Memory) -> Result<(), AsmErrKind> {
        let Some(token) = lx.next_token()? else { return Ok(()) };
        let Token::Word(word) = token else {
            return Err(AsmErrKind::SyntaxError(format!("expected instruction or directive, found '{token}'")));
        };

        if let Some(op) = Op::from_mnemonic(word) {
            self.instruction(op, lx, loc, mem)?;
        } else if let Some(directive) = Directive::parse(word) {
            self.directive(directive, lx, loc, sources, mem)?;
        } else if word.starts_with('.') {
            return Err(AsmErrKind::UnknownDirective(word.to_string()));
        } else {
            return Err(AsmErrKind::UnknownMnemonic(word.to_string()));
        }

        expect_end(lx)
    }

    fn define_label(&mut self, name: &str, loc: &SourceLocation) -> Result<(), AsmErrKind> {
        if !is_label_name(name) {
            return Err(AsmErrKind::InvalidLabel(name.to_string()));
        }

        let key = match name.starts_with('.') {
            true => {
                if self.scope.is_none() {
                    self.warn(AsmWarningKind::LocalOutsideScope(name.to_string()), loc);
                }
                self.qualify(name)
            },
            false => {
                let key = self.normalize(name).into_owned();
                self.scopes.open(loc.file, loc.line, &key);
                self.scope = Some(key.clone());
                key
            }
        };

        self.define(key, i32::from(self.pc), SymbolKind::Label, loc);
        Ok(())
    }

    fn assign(&mut self, name: &str, lx: &mut LineLexer, loc: &SourceLocation) -> Result<(), AsmErrKind> {
        if !is_label_name(name) {
            return Err(AsmErrKind::InvalidLabel(name.to_string()));
        }

        let value = expr::eval(lx, self)?;
        expect_end(lx)?;

        // A value defined in terms of a forward reference is itself undefined until the next pass.
        if let Value::Known(v) = value {
            let key = self.qualify(name);
            self.define(key, v, SymbolKind::Value, loc);
        }
        Ok(())
    }

    fn define(&mut self, key: String, value: i32, kind: SymbolKind, loc: &SourceLocation) {
        let first_this_pass = self.defined.insert(key.clone());

        if self.pass == Pass::First && first_this_pass {
            self.first_values.insert(key.clone(), value);
        }
        if self.pass == Pass::Second && first_this_pass {
            if let Some(&first) = self.first_values.get(&key) {
                if first != value && kind == SymbolKind::Label {
                    self.warn(AsmWarningKind::PhaseDrift { name: key.clone(), first, second: value }, loc);
                }
            }
        }

        let def = self.symbols.define(&key, Symbol { value, kind, location: Some(loc.clone()) });
        if let (Definition::Changed { old }, false) = (def, first_this_pass) {
            self.warn(AsmWarningKind::LabelRedefined { name: key, old, new: value }, loc);
        }
    }

    fn instruction(&mut self, op: Op, lx: &mut LineLexer, loc: &SourceLocation, mem: &mut Memory) -> Result<(), AsmErrKind> {
        let addr = self.pc;
        let (mode, value) = self.operand(op, lx, loc)?;
        let entry = *table().lookup(op, mode).ok_or(AsmErrKind::UnsupportedMode { op, mode })?;

        if self.pass == Pass::Second {
            if let Some(prev) = self.line_map.insert(addr, loc.clone()) {
                tracing::trace!(previous = %prev, "instruction overwritten");
                self.warn(AsmWarningKind::OverlappingCode(addr), loc);
            }
            self.entry_point.get_or_insert(addr);
        }

        let [lo, hi] = (value as u16).to_le_bytes();
        let bytes = [entry.opcode, lo, hi];
        self.emit(&bytes[..usize::from(entry.size)], mem);
        Ok(())
    }

    /// Parses an instruction's operand, returning its addressing mode and the value to encode.
    fn operand(&mut self, op: Op, lx: &mut LineLexer, loc: &SourceLocation) -> Result<(AddrMode, i32), AsmErrKind> {
        let modes = table().modes(op);

        match lx.peek()? {
            None => {
                let mode = match !modes.contains(AddrMode::Implied) && modes.contains(AddrMode::Accumulator) {
                    true  => AddrMode::Accumulator,
                    false => AddrMode::Implied,
                };
                return Ok((mode, 0));
            },
            Some(Token::Punct('#')) => {
                lx.next_token()?;
                let value = expr::eval(lx, self)?.known().unwrap_or(0);
                if !(-128..=255).contains(&value) {
                    self.warn(AsmWarningKind::ImmediateOutOfRange(value), loc);
                }
                return Ok((AddrMode::Immediate, value));
            },
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("a") => {
                let mut rest = lx.clone();
                rest.next_token()?;
                if rest.at_end() {
                    *lx = rest;
                    return Ok((AddrMode::Accumulator, 0));
                }
            },
            Some(_) => {}
        }

        let operand = expr::eval_operand(lx, self, modes.has_indirect())?;
        let value = operand.value.known();

        if op.is_branch() {
            let offset = match value {
                Some(target) => target - (i32::from(self.pc) + 2),
                None => 0,
            };
            if self.pass == Pass::Second && !(-128..=127).contains(&offset) {
                return Err(AsmErrKind::BranchOutOfRange { offset });
            }
            return Ok((AddrMode::Relative, offset));
        }

        let mode = match (operand.opened_paren, operand.closed_paren) {
            // (expr) or (expr),Y
            (true, true) => match next_index(lx)? {
                None => AddrMode::Indirect,
                Some('Y') => AddrMode::IndirectIndexedY,
                Some(r) => return Err(AsmErrKind::SyntaxError(format!("cannot index an indirect operand by {r}"))),
            },
            // (expr,X)
            (true, false) => match next_index(lx)? {
                Some('X') => match lx.next_token()? {
                    Some(Token::Punct(')')) => AddrMode::IndexedIndirectX,
                    _ => return Err(AsmErrKind::SyntaxError("expected ')' after ',X'".to_string())),
                },
                _ => return Err(AsmErrKind::SyntaxError("expected ',X)' in indexed indirect operand".to_string())),
            },
            (false, _) => match next_index(lx)? {
                None => AddrMode::Absolute,
                Some('X') => AddrMode::AbsoluteX,
                Some(_) => AddrMode::AbsoluteY,
            },
        };

        let Some(value) = value else {
            // Undefined in the first pass, so assume the largest form.
            return Ok((mode, 0));
        };

        if matches!(mode, AddrMode::IndexedIndirectX | AddrMode::IndirectIndexedY) {
            if !(0..=0xFF).contains(&value) && self.pass == Pass::Second {
                return Err(AsmErrKind::ZeroPageRequired(value));
            }
            return Ok((mode, value));
        }

        if !(-0x8000..=0xFFFF).contains(&value) {
            self.warn(AsmWarningKind::ValueOutOfRange(value), loc);
        }
        let downgraded = mode.zero_page_form()
            .filter(|&zp| (0..=0xFF).contains(&value) && modes.contains(zp));
        Ok((downgraded.unwrap_or(mode), value))
    }

    fn directive(&mut self, directive: Directive, lx: &mut LineLexer, loc: &SourceLocation, sources: &mut SourceManager, mem: &mut Memory) -> Result<(), AsmErrKind> {
        match directive {
            Directive::Byte => loop {
                match lx.peek()? {
                    Some(Token::Str(s)) => {
                        lx.next_token()?;
                        self.emit(s.as_bytes(), mem);
                    },
                    _ => {
                        let value = expr::eval(lx, self)?.known().unwrap_or(0);
                        if !(-128..=255).contains(&value) {
                            self.warn(AsmWarningKind::ValueOutOfRange(value), loc);
                        }
                        self.emit(&[value as u8], mem);
                    }
                }
                if !next_comma(lx)? { break };
            },
            Directive::Word => loop {
                let value = expr::eval(lx, self)?.known().unwrap_or(0);
                if !(-0x8000..=0xFFFF).contains(&value) {
                    self.warn(AsmWarningKind::ValueOutOfRange(value), loc);
                }
                self.emit(&(value as u16).to_le_bytes(), mem);
                if !next_comma(lx)? { break };
            },
            Directive::Org => {
                let value = expr::eval(lx, self)?.known().ok_or(AsmErrKind::UndeterminedOrg)?;
                if !(0..=0xFFFF).contains(&value) {
                    self.warn(AsmWarningKind::OrgOutOfRange(value), loc);
                }
                self.pc = value as u16;
            },
            Directive::Include => {
                let Some(Token::Str(name)) = lx.next_token()? else {
                    return Err(AsmErrKind::ExpectedString);
                };
                // The included file starts after this line, so the rest of the line is checked first.
                expect_end(lx)?;
                sources.include(name)?;
            },
            Directive::Break => {
                if self.pass == Pass::Second {
                    self.breakpoints.insert(self.pc);
                }
            },
        }

        Ok(())
    }
}
impl SymbolLookup for AsmState<'_> {
    fn current_address(&self) -> u16 {
        self.pc
    }

    fn resolve(&mut self, name: &str) -> Option<i32> {
        let key = self.qualify(name);
        self.symbols.lookup(&key)
    }

    fn allow_undefined(&self) -> bool {
        self.pass == Pass::First
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Directive {
    Byte,
    Word,
    Org,
    Include,
    Break
}
impl Directive {
    fn parse(word: &str) -> Option<Self> {
        let name = word.strip_prefix('.')?;
        match &*name.to_ascii_lowercase() {
            "byte"    => Some(Directive::Byte),
            "word"    => Some(Directive::Word),
            "org"     => Some(Directive::Org),
            "include" => Some(Directive::Include),
            "break"   => Some(Directive::Break),
            _ => None
        }
    }
}

fn expect_end(lx: &mut LineLexer) -> Result<(), AsmErrKind> {
    match lx.next_token()? {
        None => Ok(()),
        Some(t) => Err(AsmErrKind::SyntaxError(format!("unexpected '{t}'"))),
    }
}

/// Consumes a `,` if it is next.
fn next_comma(lx: &mut LineLexer) -> Result<bool, AsmErrKind> {
    match lx.peek()? {
        Some(Token::Punct(',')) => {
            lx.next_token()?;
            Ok(true)
        },
        _ => Ok(false)
    }
}

/// Consumes a `,X` or `,Y` if it is next, returning the (uppercase) register.
fn next_index(lx: &mut LineLexer) -> Result<Option<char>, AsmErrKind> {
    if !next_comma(lx)? { return Ok(None) };

    match lx.next_token()? {
        Some(Token::Word(r)) if r.eq_ignore_ascii_case("x") => Ok(Some('X')),
        Some(Token::Word(r)) if r.eq_ignore_ascii_case("y") => Ok(Some('Y')),
        _ => Err(AsmErrKind::SyntaxError("expected X or Y after ','".to_string())),
    }
}

/// The result of assembling a program.
///
/// The instructions themselves were written into memory by the assembler.
/// This holds everything else a debugger front-end needs:
/// - the symbol table (for label lookup and completion)
/// - the line map (for source line ↔ address lookup)
/// - breakpoints declared with `.break`
/// - any warnings raised
#[derive(Debug, Clone)]
pub struct Assembly {
    symbols: SymbolTable,
    scopes: Scopes,
    line_map: LineMap,
    breakpoints: BTreeSet<u16>,
    warnings: Vec<AsmWarning>,
    entry_point: Option<u16>,
    case_sensitive: bool,
}
impl Assembly {
    fn key<'a>(&self, name: &'a str) -> Cow<'a, str> {
        match self.case_sensitive {
            true  => Cow::Borrowed(name),
            false => Cow::Owned(name.to_ascii_lowercase()),
        }
    }

    /// Gets the value of a label or value symbol (by its fully-scoped name, e.g. `main.loop`).
    pub fn lookup_label(&self, name: &str) -> Option<u16> {
        self.symbols.lookup(&self.key(name)).map(|v| v as u16)
    }

    /// The symbol table.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// The mapping between instruction addresses and source lines.
    pub fn line_map(&self) -> &LineMap {
        &self.line_map
    }

    /// The source line of the instruction at the given address.
    pub fn line_of_address(&self, addr: u16) -> Option<&SourceLocation> {
        self.line_map.get(addr)
    }

    /// The address of the instruction at the given source line.
    ///
    /// If `exact` is false and the line has no instruction,
    /// this is the address of the next instruction in that file.
    pub fn address_of_line(&self, file: FileId, line: usize, exact: bool) -> Option<u16> {
        self.line_map.find(file, line, exact)
    }

    /// Breakpoints declared with `.break`.
    pub fn breakpoints(&self) -> &BTreeSet<u16> {
        &self.breakpoints
    }

    /// Warnings raised while assembling.
    pub fn warnings(&self) -> &[AsmWarning] {
        &self.warnings
    }

    /// The address of the first instruction assembled.
    pub fn entry_point(&self) -> Option<u16> {
        self.entry_point
    }

    /// The scope (non-local label) that a line is in.
    pub fn scope_at(&self, file: FileId, line: usize) -> Option<&str> {
        self.scopes.scope_at(file, line)
    }

    /// Completes a partially typed identifier at the given line
    /// to the longest prefix shared by all matching symbols.
    ///
    /// Partial local labels (starting with `.`) are completed within the line's scope.
    ///
    /// ```
    /// use m6502_ensemble::asm::{Assembler, AsmFlags};
    /// use m6502_ensemble::sim::mem::Memory;
    ///
    /// let mut asm = Assembler::new(AsmFlags::default());
    /// let root = asm.add_text("main.asm", "
    /// print_char: RTS
    /// print_str:  RTS
    /// ");
    /// let assembly = asm.assemble(root, &mut Memory::new(&mut 0u8)).unwrap();
    /// assert_eq!(assembly.complete(root, 0, "pri").as_deref(), Some("print_"));
    /// ```
    pub fn complete(&self, file: FileId, line: usize, partial: &str) -> Option<String> {
        let scope = self.scopes.scope_at(file, line);
        self.symbols.complete(scope, &self.key(partial))
    }
}

#[cfg(test)]
mod tests {
    use crate::asm::source::tests::TempDir;

    use super::*;

    fn assemble_with(flags: AsmFlags, src: &str) -> Result<(Assembly, Memory), AsmErr> {
        let mut asm = Assembler::new(flags);
        let root = asm.add_text("test.asm", src);
        let mut mem = Memory::new(&mut 0u8);
        asm.assemble(root, &mut mem).map(|a| (a, mem))
    }
    fn assemble_src(src: &str) -> (Assembly, Memory) {
        assemble_with(AsmFlags::default(), src)
            .unwrap_or_else(|e| panic!("assembly failed: {e}"))
    }

    fn assert_bytes(src: &str, expected: &[u8]) {
        let (_, mem) = assemble_src(src);
        let actual = &mem.as_slice()[0x0200..0x0200 + expected.len()];
        assert_eq!(actual, expected, "bytes of {src:?}");
        assert_eq!(mem.get(0x0200 + expected.len() as u16), 0, "extra bytes after {src:?}");
    }

    fn assert_asm_fail(src: &str, kind: AsmErrKind) {
        match assemble_with(AsmFlags::default(), src) {
            Ok(_) => panic!("expected {src:?} to fail with {kind:?}"),
            Err(e) => assert_eq!(e.kind, kind, "error of {src:?}"),
        }
    }

    #[test]
    fn test_lda_encodings() {
        assert_bytes("LDA #$01", &[0xA9, 0x01]);
        assert_bytes("LDA $0010", &[0xA5, 0x10]);
        assert_bytes("LDA $1234", &[0xAD, 0x34, 0x12]);
        assert_bytes("lda #'A'", &[0xA9, 0x41]);
        assert_bytes("LDA #-1", &[0xA9, 0xFF]);
    }

    #[test]
    fn test_addressing_modes() {
        assert_bytes("NOP", &[0xEA]);
        assert_bytes("ASL", &[0x0A]);
        assert_bytes("ASL A", &[0x0A]);
        assert_bytes("LSR $10", &[0x46, 0x10]);
        assert_bytes("LDA $10,X", &[0xB5, 0x10]);
        assert_bytes("LDA $1234,Y", &[0xB9, 0x34, 0x12]);
        assert_bytes("LDA $10,Y", &[0xB9, 0x10, 0x00]); // no zero page,Y form for LDA
        assert_bytes("LDX $10,Y", &[0xB6, 0x10]);
        assert_bytes("LDA ($10),Y", &[0xB1, 0x10]);
        assert_bytes("LDA ($10,X)", &[0xA1, 0x10]);
        assert_bytes("JMP ($1234)", &[0x6C, 0x34, 0x12]);
        assert_bytes("JMP ($10)", &[0x6C, 0x10, 0x00]);
        assert_bytes("LDA (1+2)*2", &[0xA5, 0x06]);
        assert_bytes("LDA (1+2)*2,x", &[0xB5, 0x06]);
        assert_bytes("JSR $FFE2", &[0x20, 0xE2, 0xFF]);
    }

    #[test]
    fn test_addressing_mode_errors() {
        assert_asm_fail("STA #1", AsmErrKind::UnsupportedMode { op: Op::STA, mode: AddrMode::Immediate });
        assert_asm_fail("LDA", AsmErrKind::UnsupportedMode { op: Op::LDA, mode: AddrMode::Implied });
        assert_asm_fail("JMP ($10),Y", AsmErrKind::UnsupportedMode { op: Op::JMP, mode: AddrMode::IndirectIndexedY });
        assert_asm_fail("LDA ($1234),Y", AsmErrKind::ZeroPageRequired(0x1234));
        assert!(matches!(
            assemble_with(AsmFlags::default(), "LDA ($10),X").map_err(|e| e.kind),
            Err(AsmErrKind::SyntaxError(_))
        ));
        assert!(matches!(
            assemble_with(AsmFlags::default(), "LDA ($10,X").map_err(|e| e.kind),
            Err(AsmErrKind::SyntaxError(_))
        ));
        assert!(matches!(
            assemble_with(AsmFlags::default(), "LDA $10,Z").map_err(|e| e.kind),
            Err(AsmErrKind::SyntaxError(_))
        ));
    }

    #[test]
    fn test_forward_reference() {
        let forward = "
                JMP target
                NOP
        target: RTS
        ";
        let backward = "
        target = $0204
                JMP target
                NOP
                RTS
        ";
        assert_bytes(forward, &[0x4C, 0x04, 0x02, 0xEA, 0x60]);
        assert_bytes(backward, &[0x4C, 0x04, 0x02, 0xEA, 0x60]);

        let (asm, _) = assemble_src(forward);
        assert_eq!(asm.lookup_label("target"), Some(0x0204));
        assert_eq!(asm.entry_point(), Some(0x0200));
    }

    #[test]
    fn test_line_map() {
        let src = "
        start:  LDX #0
        .loop:  INX
                ; comment
                BNE .loop
                RTS
        ";
        let mut asm = Assembler::new(AsmFlags::default());
        let root = asm.add_text("test.asm", src);
        let assembly = asm.assemble(root, &mut Memory::new(&mut 0u8)).unwrap();

        let addrs: Vec<_> = assembly.line_map().iter().map(|(addr, loc)| (addr, loc.line)).collect();
        assert_eq!(addrs, [(0x0200, 1), (0x0202, 2), (0x0203, 4), (0x0205, 5)]);
        assert!(addrs.windows(2).all(|w| w[0].0 < w[1].0));

        assert_eq!(assembly.line_of_address(0x0203).map(|l| l.line), Some(4));
        assert_eq!(assembly.address_of_line(root, 3, true), None);
        assert_eq!(assembly.address_of_line(root, 3, false), Some(0x0203));
        assert_eq!(assembly.address_of_line(root, 0, false), Some(0x0200));
    }

    #[test]
    fn test_branches() {
        assert_bytes("BEQ skip\nNOP\nskip: RTS", &[0xF0, 0x01, 0xEA, 0x60]);
        assert_bytes("back: NOP\nBNE back", &[0xEA, 0xD0, 0xFD]);
        assert_bytes("BNE *", &[0xD0, 0xFE]);

        // The first pass sees an undefined target, so the range error is from the second pass.
        let src = "
                BEQ far
                .org $0300
        far:    RTS
        ";
        let err = assemble_with(AsmFlags::default(), src).unwrap_err();
        assert_eq!(err.kind, AsmErrKind::BranchOutOfRange { offset: 0x0300 - 0x0202 });
        assert_eq!(err.location.map(|l| l.line), Some(1));

        // 127 forward is allowed
        assert!(assemble_with(AsmFlags::default(), "BEQ far\n.org $0281\nfar: RTS").is_ok());
        assert!(assemble_with(AsmFlags::default(), "BEQ far\n.org $0282\nfar: RTS").is_err());
    }

    #[test]
    fn test_directives() {
        assert_bytes(".byte 1, 2, \"ab\", 'c'", &[1, 2, b'a', b'b', b'c']);
        assert_bytes(".word $1234, end\nend:", &[0x34, 0x12, 0x04, 0x02]);
        assert_bytes(".byte <$1234, >$1234", &[0x34, 0x12]);

        let (asm, mem) = assemble_src("
            .org $0300
        here: .byte 7
            .org $0210
            .break
            NOP
        ");
        assert_eq!(asm.lookup_label("here"), Some(0x0300));
        assert_eq!(mem.get(0x0300), 7);
        assert_eq!(mem.get(0x0210), 0xEA);
        assert_eq!(asm.breakpoints().iter().copied().collect::<Vec<_>>(), [0x0210]);

        assert_asm_fail(".org later\nlater:", AsmErrKind::UndeterminedOrg);
        assert_asm_fail(".include later", AsmErrKind::ExpectedString);
        assert_asm_fail(".foo 1", AsmErrKind::UnknownDirective(".foo".to_string()));
        assert_asm_fail("label: .bar", AsmErrKind::UnknownDirective(".bar".to_string()));
    }

    #[test]
    fn test_labels_and_scopes() {
        let src = "
        main:
        .loop:  DEX
                BNE .loop
        other:
        .loop:  DEY
                BNE .loop
                JMP main.loop
        ";
        let mut asm = Assembler::new(AsmFlags::default());
        let root = asm.add_text("test.asm", src);
        let mut mem = Memory::new(&mut 0u8);
        let assembly = asm.assemble(root, &mut mem).unwrap();

        assert_eq!(assembly.lookup_label("main"), Some(0x0200));
        assert_eq!(assembly.lookup_label("main.loop"), Some(0x0200));
        assert_eq!(assembly.lookup_label("other.loop"), Some(0x0203));
        assert_eq!(assembly.lookup_label(".loop"), None);
        assert_eq!(&mem.as_slice()[0x0200..0x0209], [0xCA, 0xD0, 0xFD, 0x88, 0xD0, 0xFD, 0x4C, 0x00, 0x02]);

        assert_eq!(assembly.scope_at(root, 0), None);
        assert_eq!(assembly.scope_at(root, 3), Some("main"));
        assert_eq!(assembly.scope_at(root, 6), Some("other"));
        assert_eq!(assembly.complete(root, 3, ".l").as_deref(), Some(".loop"));
        assert_eq!(assembly.complete(root, 3, "ot").as_deref(), Some("other"));
        assert!(assembly.warnings().is_empty());
    }

    #[test]
    fn test_label_syntax() {
        // colon is optional by default
        let (asm, _) = assemble_src("start NOP\nend");
        assert_eq!(asm.lookup_label("start"), Some(0x0200));
        assert_eq!(asm.lookup_label("end"), Some(0x0201));

        let flags = AsmFlags { require_colon: true, ..Default::default() };
        let err = assemble_with(flags.clone(), "start NOP").unwrap_err();
        assert_eq!(err.kind, AsmErrKind::MissingColon("start".to_string()));
        assert!(assemble_with(flags, "start: NOP").is_ok());

        assert_asm_fail("LDZ #1", AsmErrKind::UnknownMnemonic("LDZ".to_string()));
        assert_asm_fail("main.loop: NOP", AsmErrKind::InvalidLabel("main.loop".to_string()));
        assert_asm_fail("label: foo", AsmErrKind::UnknownMnemonic("foo".to_string()));
    }

    #[test]
    fn test_case_insensitive_labels() {
        let flags = AsmFlags { case_sensitive_labels: false, ..Default::default() };
        let (asm, mem) = assemble_with(flags, "Start: JMP START").unwrap();
        assert_eq!(asm.lookup_label("start"), Some(0x0200));
        assert_eq!(asm.lookup_label("START"), Some(0x0200));
        assert_eq!(&mem.as_slice()[0x0200..0x0203], [0x4C, 0x00, 0x02]);

        assert_asm_fail("Start: JMP START", AsmErrKind::Expr(ExprErr::UndefinedSymbol("START".to_string())));
    }

    #[test]
    fn test_value_symbols() {
        assert_bytes("CHROUT = __outch\nJSR CHROUT", &[0x20, 0xE2, 0xFF]);
        assert_bytes("zp = $80\nptr = zp + 2\nLDA (ptr),Y", &[0xB1, 0x82]);
        assert_bytes("LDA #fwd\nfwd = 3", &[0xA9, 0x03]);
    }

    #[test]
    fn test_warnings() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let (asm, _) = assemble_src("
            x = 5
            x = 5
            x = 6
            LDA #300
            .byte 256
            .loc: NOP
        ");
        let kinds: Vec<_> = asm.warnings().iter().map(|w| w.kind.clone()).collect();
        assert_eq!(kinds, [
            AsmWarningKind::LabelRedefined { name: "x".to_string(), old: 5, new: 6 },
            AsmWarningKind::ImmediateOutOfRange(300),
            AsmWarningKind::ValueOutOfRange(256),
            AsmWarningKind::LocalOutsideScope(".loc".to_string()),
        ]);
        assert_eq!(asm.warnings()[0].location.line, 3);
        assert_eq!(asm.warnings()[0].to_string(), r#""test.asm", line #4: 'x' redefined from 5 to 6"#);

        let (asm, _) = assemble_src("NOP\n.org $0200\nBRK");
        assert_eq!(asm.warnings().iter().map(|w| w.kind.clone()).collect::<Vec<_>>(), [AsmWarningKind::OverlappingCode(0x0200)]);

        // out of range origins are truncated to 16 bits
        let (asm, mem) = assemble_src(".org $10300\nNOP");
        assert_eq!(asm.warnings().iter().map(|w| w.kind.clone()).collect::<Vec<_>>(), [AsmWarningKind::OrgOutOfRange(0x10300)]);
        assert_eq!(asm.warnings()[0].location.line, 0);
        assert_eq!(mem.get(0x0300), 0xEA);
        assert_eq!(asm.entry_point(), Some(0x0300));
    }

    #[test]
    fn test_phase_drift() {
        // `zp` is unknown when `LDA zp` is first seen, so the first pass sizes it as absolute.
        let (asm, mem) = assemble_src("
                LDA zp
        after:  RTS
        zp = $10
        ");
        assert_eq!(asm.lookup_label("after"), Some(0x0202));
        assert_eq!(&mem.as_slice()[0x0200..0x0203], [0xA5, 0x10, 0x60]);

        let drift: Vec<_> = asm.warnings().iter().map(|w| w.kind.clone()).collect();
        assert_eq!(drift, [AsmWarningKind::PhaseDrift { name: "after".to_string(), first: 0x0203, second: 0x0202 }]);
    }

    #[test]
    fn test_errors() {
        assert_asm_fail("JMP nowhere", AsmErrKind::Expr(ExprErr::UndefinedSymbol("nowhere".to_string())));
        assert_asm_fail(".byte 1/0", AsmErrKind::Expr(ExprErr::DivisionByZero));
        assert_asm_fail("LDA #", AsmErrKind::Expr(ExprErr::MissingOperand));
        assert_asm_fail("LDA #1 2", AsmErrKind::SyntaxError("unexpected '2'".to_string()));
        assert_asm_fail("LDA #$G", AsmErrKind::Lex(LexErr::InvalidHex));

        let err = assemble_with(AsmFlags::default(), "NOP\n  LDZ #1").unwrap_err();
        assert_eq!(err.to_string(), r#""test.asm", line #2: unknown mnemonic 'LDZ'"#);
    }

    #[test]
    fn test_include_once() {
        let dir = TempDir::new("asm-include");
        let main = dir.write("main.asm", "
            .include \"lib.asm\"
            .include \"lib.asm\"
            JMP putc
        ");
        dir.write("lib.asm", "putc: RTS\n.include \"main.asm\"\n");

        let mut asm = Assembler::new(AsmFlags::default());
        let root = asm.add_file(&main);
        let mut mem = Memory::new(&mut 0u8);
        let assembly = asm.assemble(root, &mut mem).unwrap();

        assert_eq!(assembly.lookup_label("putc"), Some(0x0200));
        assert!(assembly.warnings().is_empty());
        assert_eq!(&mem.as_slice()[0x0200..0x0205], [0x60, 0x4C, 0x00, 0x02, 0x00]);

        // assembling again gives the same result
        let again = asm.assemble(root, &mut mem).unwrap();
        assert_eq!(again.lookup_label("putc"), Some(0x0200));
    }

    #[test]
    fn test_include_dirs() {
        let dir = TempDir::new("asm-include-dirs");
        let lib = TempDir::new("asm-include-dirs-lib");
        lib.write("defs.asm", "OUT = __outch\n");
        let main = dir.write("main.asm", ".include \"defs.asm\"\nJSR OUT\n");

        let mut asm = Assembler::new(AsmFlags { include_dirs: vec![lib.0.clone()], ..Default::default() });
        let root = asm.add_file(&main);
        let mut mem = Memory::new(&mut 0u8);
        asm.assemble(root, &mut mem).unwrap();
        assert_eq!(&mem.as_slice()[0x0200..0x0203], [0x20, 0xE2, 0xFF]);

        let root = asm.add_text("bad.asm", ".include \"does-not-exist.asm\"");
        let err = asm.assemble(root, &mut mem).unwrap_err();
        assert!(matches!(err.kind, AsmErrKind::Open { .. }));
        assert_eq!(err.location.map(|l| l.line), Some(0));

        // directories added after creation are searched on the next assembly
        let mut asm = Assembler::new(AsmFlags::default());
        let root = asm.add_file(&main);
        assert!(asm.assemble(root, &mut mem).is_err());
        asm.flags_mut().include_dirs.push(lib.0.clone());
        let assembly = asm.assemble(root, &mut mem).unwrap();
        assert_eq!(assembly.lookup_label("OUT"), Some(0xFFE2));
    }
}
