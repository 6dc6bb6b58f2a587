//! The 6502 instruction set.
//!
//! This module holds the operations ([`Op`]) and addressing modes ([`AddrMode`])
//! which make up an instruction, as well as the opcode table ([`table`]) which binds
//! each legal (operation, addressing mode) pair to its opcode byte.

pub mod table;

macro_rules! op_enum {
    ($($op:ident: $desc:literal),+ $(,)?) => {
        /// An operation (mnemonic) of the documented 6502 instruction set.
        ///
        /// Mnemonics are case-insensitive when parsed with [`Op::from_mnemonic`].
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
        pub enum Op {
            $(
                #[doc = $desc]
                $op
            ),+
        }

        impl Op {
            /// Every operation, in mnemonic order.
            pub const ALL: &'static [Op] = &[$(Op::$op),+];

            /// Parses a mnemonic (case-insensitive) into its operation.
            pub fn from_mnemonic(s: &str) -> Option<Self> {
                // mnemonics are all three letters, skip the allocation otherwise
                if s.len() != 3 { return None };
                match &*s.to_ascii_uppercase() {
                    $(stringify!($op) => Some(Op::$op)),+,
                    _ => None
                }
            }

            /// The (uppercase) mnemonic of this operation.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Op::$op => stringify!($op)),+
                }
            }
        }
    };
}
op_enum! {
    ADC: "Add with carry", AND: "Bitwise AND with accumulator", ASL: "Arithmetic shift left",
    BCC: "Branch if carry clear", BCS: "Branch if carry set", BEQ: "Branch if equal",
    BIT: "Test bits", BMI: "Branch if minus", BNE: "Branch if not equal", BPL: "Branch if plus",
    BRK: "Software interrupt", BVC: "Branch if overflow clear", BVS: "Branch if overflow set",
    CLC: "Clear carry", CLD: "Clear decimal mode", CLI: "Clear interrupt disable", CLV: "Clear overflow",
    CMP: "Compare with accumulator", CPX: "Compare with X", CPY: "Compare with Y",
    DEC: "Decrement memory", DEX: "Decrement X", DEY: "Decrement Y",
    EOR: "Bitwise XOR with accumulator",
    INC: "Increment memory", INX: "Increment X", INY: "Increment Y",
    JMP: "Jump", JSR: "Jump to subroutine",
    LDA: "Load accumulator", LDX: "Load X", LDY: "Load Y",
    LSR: "Logical shift right", NOP: "No operation", ORA: "Bitwise OR with accumulator",
    PHA: "Push accumulator", PHP: "Push processor status", PLA: "Pull accumulator", PLP: "Pull processor status",
    ROL: "Rotate left", ROR: "Rotate right", RTI: "Return from interrupt", RTS: "Return from subroutine",
    SBC: "Subtract with carry", SEC: "Set carry", SED: "Set decimal mode", SEI: "Set interrupt disable",
    STA: "Store accumulator", STX: "Store X", STY: "Store Y",
    TAX: "Transfer A to X", TAY: "Transfer A to Y", TSX: "Transfer SP to X",
    TXA: "Transfer X to A", TXS: "Transfer X to SP", TYA: "Transfer Y to A",
}

impl Op {
    /// Whether this operation is a relative branch.
    pub fn is_branch(self) -> bool {
        matches!(self, Op::BCC | Op::BCS | Op::BEQ | Op::BMI | Op::BNE | Op::BPL | Op::BVC | Op::BVS)
    }
}
impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// The shape of an instruction's operand.
///
/// The addressing mode determines the encoded size of an instruction
/// and how the simulator computes its effective address.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum AddrMode {
    /// No operand (e.g., `CLC`).
    Implied,
    /// Operates on the accumulator (e.g., `ASL A`).
    Accumulator,
    /// A constant byte (e.g., `LDA #$01`).
    Immediate,
    /// An address in page zero (e.g., `LDA $10`).
    ZeroPage,
    /// An address in page zero, indexed by X (wrapping within the page).
    ZeroPageX,
    /// An address in page zero, indexed by Y (wrapping within the page).
    ZeroPageY,
    /// A signed offset relative to the next instruction (branches only).
    Relative,
    /// A full 16-bit address (e.g., `LDA $1234`).
    Absolute,
    /// A full 16-bit address, indexed by X.
    AbsoluteX,
    /// A full 16-bit address, indexed by Y.
    AbsoluteY,
    /// A jump through a 16-bit pointer (e.g., `JMP ($1234)`).
    Indirect,
    /// A zero-page pointer indexed by X before dereferencing (e.g., `LDA ($10,X)`).
    IndexedIndirectX,
    /// A zero-page pointer dereferenced and then indexed by Y (e.g., `LDA ($10),Y`).
    IndirectIndexedY,
}
impl AddrMode {
    /// Every addressing mode.
    pub const ALL: [AddrMode; 13] = [
        AddrMode::Implied, AddrMode::Accumulator, AddrMode::Immediate,
        AddrMode::ZeroPage, AddrMode::ZeroPageX, AddrMode::ZeroPageY,
        AddrMode::Relative, AddrMode::Absolute, AddrMode::AbsoluteX, AddrMode::AbsoluteY,
        AddrMode::Indirect, AddrMode::IndexedIndirectX, AddrMode::IndirectIndexedY,
    ];

    /// The encoded size of an instruction with this addressing mode
    /// (including its opcode byte).
    pub fn size(self) -> u8 {
        match self {
            AddrMode::Implied | AddrMode::Accumulator => 1,
            AddrMode::Immediate
            | AddrMode::ZeroPage | AddrMode::ZeroPageX | AddrMode::ZeroPageY
            | AddrMode::Relative
            | AddrMode::IndexedIndirectX | AddrMode::IndirectIndexedY => 2,
            AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY
            | AddrMode::Indirect => 3,
        }
    }

    /// The zero-page counterpart of an absolute addressing mode, if it has one.
    pub fn zero_page_form(self) -> Option<AddrMode> {
        match self {
            AddrMode::Absolute  => Some(AddrMode::ZeroPage),
            AddrMode::AbsoluteX => Some(AddrMode::ZeroPageX),
            AddrMode::AbsoluteY => Some(AddrMode::ZeroPageY),
            _ => None
        }
    }

    /// Whether this mode reads its operand through a pointer.
    pub fn is_indirect(self) -> bool {
        matches!(self, AddrMode::Indirect | AddrMode::IndexedIndirectX | AddrMode::IndirectIndexedY)
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}
impl std::fmt::Display for AddrMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddrMode::Implied          => f.write_str("implied"),
            AddrMode::Accumulator      => f.write_str("accumulator"),
            AddrMode::Immediate        => f.write_str("immediate"),
            AddrMode::ZeroPage         => f.write_str("zero page"),
            AddrMode::ZeroPageX        => f.write_str("zero page,X"),
            AddrMode::ZeroPageY        => f.write_str("zero page,Y"),
            AddrMode::Relative         => f.write_str("relative"),
            AddrMode::Absolute         => f.write_str("absolute"),
            AddrMode::AbsoluteX        => f.write_str("absolute,X"),
            AddrMode::AbsoluteY        => f.write_str("absolute,Y"),
            AddrMode::Indirect         => f.write_str("indirect"),
            AddrMode::IndexedIndirectX => f.write_str("(zero page,X)"),
            AddrMode::IndirectIndexedY => f.write_str("(zero page),Y"),
        }
    }
}

/// A set of addressing modes.
///
/// ## Example
///
/// ```
/// use m6502_ensemble::isa::{AddrMode, ModeSet};
///
/// let modes = ModeSet::EMPTY.with(AddrMode::Immediate).with(AddrMode::ZeroPage);
/// assert!(modes.contains(AddrMode::ZeroPage));
/// assert!(!modes.contains(AddrMode::Absolute));
/// assert_eq!(modes.iter().count(), 2);
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeSet(u16);
impl ModeSet {
    /// The set with no modes.
    pub const EMPTY: Self = Self(0);

    /// Creates a copy of this set which also contains the given mode.
    pub fn with(self, mode: AddrMode) -> Self {
        Self(self.0 | mode.bit())
    }
    /// Adds a mode to this set.
    pub fn insert(&mut self, mode: AddrMode) {
        *self = self.with(mode);
    }
    /// Checks whether the mode is in this set.
    pub fn contains(&self, mode: AddrMode) -> bool {
        self.0 & mode.bit() != 0
    }
    /// Checks whether this set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
    /// Whether any mode in this set reads through a pointer.
    pub fn has_indirect(&self) -> bool {
        self.iter().any(AddrMode::is_indirect)
    }
    /// Iterates over the modes of this set.
    pub fn iter(&self) -> impl Iterator<Item=AddrMode> + '_ {
        AddrMode::ALL.into_iter().filter(|&m| self.contains(m))
    }
}
impl std::fmt::Debug for ModeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{AddrMode, Op};

    #[test]
    fn test_mnemonic_case() {
        for s in ["lda", "LDA", "Lda", "lDa"] {
            assert_eq!(Op::from_mnemonic(s), Some(Op::LDA), "{s} should be LDA");
        }
        assert_eq!(Op::from_mnemonic("LDAX"), None);
        assert_eq!(Op::from_mnemonic("LD"), None);
        assert_eq!(Op::from_mnemonic("foo"), None);
        assert_eq!(Op::ALL.len(), 56);
    }

    #[test]
    fn test_mode_sizes() {
        assert_eq!(AddrMode::Implied.size(), 1);
        assert_eq!(AddrMode::Relative.size(), 2);
        assert_eq!(AddrMode::IndirectIndexedY.size(), 2);
        assert_eq!(AddrMode::Indirect.size(), 3);
        assert_eq!(AddrMode::AbsoluteY.zero_page_form(), Some(AddrMode::ZeroPageY));
        assert_eq!(AddrMode::Indirect.zero_page_form(), None);
    }
}
