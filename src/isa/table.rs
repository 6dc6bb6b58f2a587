//! The static opcode table.
//!
//! The table binds every documented (operation, addressing mode) pair
//! to an [`OpcodeEntry`] (opcode byte, encoded size, and base cycle count).
//! It is built once (on first use of [`table`]) and is read-only afterwards.
//!
//! The assembler looks up entries by (operation, mode) with [`OpcodeTable::lookup`],
//! and the simulator decodes raw bytes with [`OpcodeTable::decode`].
//!
//! ```
//! use m6502_ensemble::isa::{AddrMode, Op};
//! use m6502_ensemble::isa::table::table;
//!
//! let entry = table().lookup(Op::LDA, AddrMode::Immediate).unwrap();
//! assert_eq!(entry.opcode, 0xA9);
//! assert_eq!(entry.size, 2);
//!
//! let entry = table().decode(0x60).unwrap();
//! assert_eq!((entry.op, entry.mode), (Op::RTS, AddrMode::Implied));
//! assert!(table().decode(0x02).is_none());
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use super::{AddrMode, ModeSet, Op};
use AddrMode::*;

/// A single legal instruction encoding.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct OpcodeEntry {
    /// The opcode byte.
    pub opcode: u8,
    /// The encoded size (opcode and operand) in bytes.
    pub size: u8,
    /// The base cycle cost.
    pub cycles: u8,
    /// The operation.
    pub op: Op,
    /// The addressing mode.
    pub mode: AddrMode,
}

/// Errors raised while validating an opcode list.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum TableErr {
    /// The declared size of an entry doesn't match the operand shape of its addressing mode.
    #[error("opcode ${opcode:02X} declares size {size}, but {mode} instructions are {} bytes", .mode.size())]
    SizeMismatch {
        /// The opcode byte of the entry.
        opcode: u8,
        /// The declared size.
        size: u8,
        /// The addressing mode of the entry.
        mode: AddrMode
    },
    /// An opcode byte was assigned twice.
    #[error("opcode ${0:02X} is assigned more than once")]
    DuplicateOpcode(u8),
    /// An (operation, mode) pair was assigned two opcode bytes.
    #[error("{0} {1} is assigned more than one opcode")]
    DuplicatePair(Op, AddrMode),
    /// An operation has no addressing modes.
    #[error("{0} has no supported addressing modes")]
    MissingOp(Op),
}
impl crate::err::Error for TableErr {}

/// The opcode table.
///
/// See the [module-level documentation](self) for more details.
#[derive(Debug)]
pub struct OpcodeTable {
    by_opcode: [Option<OpcodeEntry>; 256],
    by_pair: HashMap<(Op, AddrMode), u8>,
    modes: HashMap<Op, ModeSet>,
}
impl OpcodeTable {
    /// Builds an opcode table from a list of entries, validating them.
    ///
    /// This fails if:
    /// - an entry's size doesn't match its addressing mode,
    /// - an opcode byte or an (operation, mode) pair is assigned twice,
    /// - an operation ends up with no supported addressing modes.
    pub fn build(entries: &[OpcodeEntry]) -> Result<Self, TableErr> {
        let mut by_opcode = [None; 256];
        let mut by_pair = HashMap::with_capacity(entries.len());
        let mut modes: HashMap<Op, ModeSet> = HashMap::new();

        for &entry in entries {
            let OpcodeEntry { opcode, size, op, mode, .. } = entry;
            if size != mode.size() {
                return Err(TableErr::SizeMismatch { opcode, size, mode });
            }
            let slot = &mut by_opcode[usize::from(opcode)];
            if slot.is_some() {
                return Err(TableErr::DuplicateOpcode(opcode));
            }
            *slot = Some(entry);

            if by_pair.insert((op, mode), opcode).is_some() {
                return Err(TableErr::DuplicatePair(op, mode));
            }
            modes.entry(op).or_default().insert(mode);
        }

        if let Some(&op) = Op::ALL.iter().find(|&&op| modes.get(&op).map_or(true, ModeSet::is_empty)) {
            return Err(TableErr::MissingOp(op));
        }

        Ok(Self { by_opcode, by_pair, modes })
    }

    /// Finds the entry for an (operation, mode) pair, if the pair is legal.
    pub fn lookup(&self, op: Op, mode: AddrMode) -> Option<&OpcodeEntry> {
        let &opcode = self.by_pair.get(&(op, mode))?;
        self.decode(opcode)
    }

    /// Decodes an opcode byte, returning `None` if it isn't a legal opcode.
    pub fn decode(&self, opcode: u8) -> Option<&OpcodeEntry> {
        self.by_opcode[usize::from(opcode)].as_ref()
    }

    /// The addressing modes an operation supports.
    pub fn modes(&self, op: Op) -> ModeSet {
        self.modes.get(&op).copied().unwrap_or_default()
    }

    /// Iterates over every legal entry, in opcode order.
    pub fn iter(&self) -> impl Iterator<Item=&OpcodeEntry> + '_ {
        self.by_opcode.iter().flatten()
    }
}

/// The 6502 opcode table.
///
/// This is built from the documented instruction set the first time it is accessed.
pub fn table() -> &'static OpcodeTable {
    static TABLE: OnceLock<OpcodeTable> = OnceLock::new();

    TABLE.get_or_init(|| {
        match OpcodeTable::build(&entries()) {
            Ok(t) => t,
            Err(e) => unreachable!("6502 opcode list should be valid: {e}"),
        }
    })
}

macro_rules! opcodes {
    ($($opcode:literal $op:ident $mode:ident $size:literal $cycles:literal);+ $(;)?) => {
        fn entries() -> Vec<OpcodeEntry> {
            vec![$(
                OpcodeEntry { opcode: $opcode, size: $size, cycles: $cycles, op: Op::$op, mode: $mode }
            ),+]
        }
    };
}

opcodes! {
    0x69 ADC Immediate 2 2;        0x65 ADC ZeroPage 2 3;         0x75 ADC ZeroPageX 2 4;
    0x6D ADC Absolute 3 4;         0x7D ADC AbsoluteX 3 4;        0x79 ADC AbsoluteY 3 4;
    0x61 ADC IndexedIndirectX 2 6; 0x71 ADC IndirectIndexedY 2 5;

    0x29 AND Immediate 2 2;        0x25 AND ZeroPage 2 3;         0x35 AND ZeroPageX 2 4;
    0x2D AND Absolute 3 4;         0x3D AND AbsoluteX 3 4;        0x39 AND AbsoluteY 3 4;
    0x21 AND IndexedIndirectX 2 6; 0x31 AND IndirectIndexedY 2 5;

    0x0A ASL Accumulator 1 2;      0x06 ASL ZeroPage 2 5;         0x16 ASL ZeroPageX 2 6;
    0x0E ASL Absolute 3 6;         0x1E ASL AbsoluteX 3 7;

    0x90 BCC Relative 2 2;         0xB0 BCS Relative 2 2;         0xF0 BEQ Relative 2 2;
    0x30 BMI Relative 2 2;         0xD0 BNE Relative 2 2;         0x10 BPL Relative 2 2;
    0x50 BVC Relative 2 2;         0x70 BVS Relative 2 2;

    0x24 BIT ZeroPage 2 3;         0x2C BIT Absolute 3 4;

    0x00 BRK Implied 1 7;

    0x18 CLC Implied 1 2;          0xD8 CLD Implied 1 2;          0x58 CLI Implied 1 2;
    0xB8 CLV Implied 1 2;

    0xC9 CMP Immediate 2 2;        0xC5 CMP ZeroPage 2 3;         0xD5 CMP ZeroPageX 2 4;
    0xCD CMP Absolute 3 4;         0xDD CMP AbsoluteX 3 4;        0xD9 CMP AbsoluteY 3 4;
    0xC1 CMP IndexedIndirectX 2 6; 0xD1 CMP IndirectIndexedY 2 5;

    0xE0 CPX Immediate 2 2;        0xE4 CPX ZeroPage 2 3;         0xEC CPX Absolute 3 4;
    0xC0 CPY Immediate 2 2;        0xC4 CPY ZeroPage 2 3;         0xCC CPY Absolute 3 4;

    0xC6 DEC ZeroPage 2 5;         0xD6 DEC ZeroPageX 2 6;        0xCE DEC Absolute 3 6;
    0xDE DEC AbsoluteX 3 7;
    0xCA DEX Implied 1 2;          0x88 DEY Implied 1 2;

    0x49 EOR Immediate 2 2;        0x45 EOR ZeroPage 2 3;         0x55 EOR ZeroPageX 2 4;
    0x4D EOR Absolute 3 4;         0x5D EOR AbsoluteX 3 4;        0x59 EOR AbsoluteY 3 4;
    0x41 EOR IndexedIndirectX 2 6; 0x51 EOR IndirectIndexedY 2 5;

    0xE6 INC ZeroPage 2 5;         0xF6 INC ZeroPageX 2 6;        0xEE INC Absolute 3 6;
    0xFE INC AbsoluteX 3 7;
    0xE8 INX Implied 1 2;          0xC8 INY Implied 1 2;

    0x4C JMP Absolute 3 3;         0x6C JMP Indirect 3 5;
    0x20 JSR Absolute 3 6;

    0xA9 LDA Immediate 2 2;        0xA5 LDA ZeroPage 2 3;         0xB5 LDA ZeroPageX 2 4;
    0xAD LDA Absolute 3 4;         0xBD LDA AbsoluteX 3 4;        0xB9 LDA AbsoluteY 3 4;
    0xA1 LDA IndexedIndirectX 2 6; 0xB1 LDA IndirectIndexedY 2 5;

    0xA2 LDX Immediate 2 2;        0xA6 LDX ZeroPage 2 3;         0xB6 LDX ZeroPageY 2 4;
    0xAE LDX Absolute 3 4;         0xBE LDX AbsoluteY 3 4;

    0xA0 LDY Immediate 2 2;        0xA4 LDY ZeroPage 2 3;         0xB4 LDY ZeroPageX 2 4;
    0xAC LDY Absolute 3 4;         0xBC LDY AbsoluteX 3 4;

    0x4A LSR Accumulator 1 2;      0x46 LSR ZeroPage 2 5;         0x56 LSR ZeroPageX 2 6;
    0x4E LSR Absolute 3 6;         0x5E LSR AbsoluteX 3 7;

    0xEA NOP Implied 1 2;

    0x09 ORA Immediate 2 2;        0x05 ORA ZeroPage 2 3;         0x15 ORA ZeroPageX 2 4;
    0x0D ORA Absolute 3 4;         0x1D ORA AbsoluteX 3 4;        0x19 ORA AbsoluteY 3 4;
    0x01 ORA IndexedIndirectX 2 6; 0x11 ORA IndirectIndexedY 2 5;

    0x48 PHA Implied 1 3;          0x08 PHP Implied 1 3;
    0x68 PLA Implied 1 4;          0x28 PLP Implied 1 4;

    0x2A ROL Accumulator 1 2;      0x26 ROL ZeroPage 2 5;         0x36 ROL ZeroPageX 2 6;
    0x2E ROL Absolute 3 6;         0x3E ROL AbsoluteX 3 7;

    0x6A ROR Accumulator 1 2;      0x66 ROR ZeroPage 2 5;         0x76 ROR ZeroPageX 2 6;
    0x6E ROR Absolute 3 6;         0x7E ROR AbsoluteX 3 7;

    0x40 RTI Implied 1 6;          0x60 RTS Implied 1 6;

    0xE9 SBC Immediate 2 2;        0xE5 SBC ZeroPage 2 3;         0xF5 SBC ZeroPageX 2 4;
    0xED SBC Absolute 3 4;         0xFD SBC AbsoluteX 3 4;        0xF9 SBC AbsoluteY 3 4;
    0xE1 SBC IndexedIndirectX 2 6; 0xF1 SBC IndirectIndexedY 2 5;

    0x38 SEC Implied 1 2;          0xF8 SED Implied 1 2;          0x78 SEI Implied 1 2;

    0x85 STA ZeroPage 2 3;         0x95 STA ZeroPageX 2 4;        0x8D STA Absolute 3 4;
    0x9D STA AbsoluteX 3 5;        0x99 STA AbsoluteY 3 5;        0x81 STA IndexedIndirectX 2 6;
    0x91 STA IndirectIndexedY 2 6;

    0x86 STX ZeroPage 2 3;         0x96 STX ZeroPageY 2 4;        0x8E STX Absolute 3 4;
    0x84 STY ZeroPage 2 3;         0x94 STY ZeroPageX 2 4;        0x8C STY Absolute 3 4;

    0xAA TAX Implied 1 2;          0xA8 TAY Implied 1 2;          0xBA TSX Implied 1 2;
    0x8A TXA Implied 1 2;          0x9A TXS Implied 1 2;          0x98 TYA Implied 1 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builds() {
        let t = table();
        assert_eq!(t.iter().count(), 151);

        for &op in Op::ALL {
            assert!(!t.modes(op).is_empty(), "{op} should have at least one mode");
        }
        for entry in t.iter() {
            assert_eq!(t.lookup(entry.op, entry.mode), Some(entry));
            assert_eq!(entry.size, entry.mode.size());
        }
    }

    #[test]
    fn test_table_modes() {
        let t = table();

        let lda = t.modes(Op::LDA);
        assert!(lda.contains(AddrMode::ZeroPage));
        assert!(lda.contains(AddrMode::IndirectIndexedY));
        assert!(!lda.contains(AddrMode::ZeroPageY));
        assert!(!lda.contains(AddrMode::Indirect));

        assert!(t.modes(Op::LDX).contains(AddrMode::ZeroPageY));
        assert!(t.modes(Op::BEQ).contains(AddrMode::Relative));
        assert!(t.modes(Op::JMP).has_indirect());
        assert!(!t.modes(Op::JSR).has_indirect());

        assert_eq!(t.lookup(Op::STA, AddrMode::Immediate), None);
        assert_eq!(t.lookup(Op::JMP, AddrMode::Indirect).map(|e| e.opcode), Some(0x6C));
    }

    #[test]
    fn test_table_validation() {
        let entry = |opcode, size, op, mode| OpcodeEntry { opcode, size, cycles: 2, op, mode };
        let mut all = entries();

        // bad size
        all[0] = entry(0x69, 3, Op::ADC, Immediate);
        assert_eq!(
            OpcodeTable::build(&all).unwrap_err(),
            TableErr::SizeMismatch { opcode: 0x69, size: 3, mode: Immediate }
        );

        // opcode reuse
        let mut all = entries();
        all.push(entry(0xA9, 1, Op::NOP, Implied));
        assert_eq!(OpcodeTable::build(&all).unwrap_err(), TableErr::DuplicateOpcode(0xA9));

        // pair reuse
        let mut all = entries();
        all.push(entry(0x1A, 1, Op::NOP, Implied));
        assert_eq!(OpcodeTable::build(&all).unwrap_err(), TableErr::DuplicatePair(Op::NOP, Implied));

        // op has no modes
        let all: Vec<_> = entries().into_iter()
            .filter(|e| e.op != Op::TYA)
            .collect();
        assert_eq!(OpcodeTable::build(&all).unwrap_err(), TableErr::MissingOp(Op::TYA));
    }
}
