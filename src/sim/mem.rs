//! Memory handling for the 6502 simulator.
//!
//! This module consists of:
//! - [`Memory`]: The 64KB memory image.
//! - [`Registers`] and [`Status`]: The register file.
//! - [`MachineInitStrategy`]: How memory is filled before a program is loaded.

use rand::rngs::StdRng;
use rand::Rng;

const N: usize = 1 << 16;

/// The start of the stack page.
pub const STACK_BASE: u16 = 0x0100;

/// Trait that describes types that can be used to create the data for an uninitialized [`Memory`].
///
/// This is used with [`Memory::new`] to fill the image before anything is assembled into it.
pub trait ByteFiller {
    /// Generate the data.
    fn generate(&mut self) -> u8;
}
impl ByteFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u8 {
        rand::random()
    }
}
impl ByteFiller for u8 {
    /// Sets each byte to the given value.
    fn generate(&mut self) -> u8 {
        *self
    }
}
impl ByteFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u8 {
        self.gen()
    }
}

/// Strategy used to initialize the memory of the [`Simulator`].
///
/// Memory that is never written by the assembler keeps these values,
/// so programs reading uninitialized memory behave differently under each strategy.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each byte to zero.
    #[default]
    Zeroed,

    /// Initializes each byte randomly and non-deterministically.
    Unseeded,

    /// Initializes each byte randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each byte to a known value.
    Known {
        /// The value to initialize each byte to.
        value: u8
    }
}

impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl ByteFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Zeroed => MIGenerator::Known(0),
            MachineInitStrategy::Unseeded => MIGenerator::Unseeded,
            MachineInitStrategy::Seeded { seed } => MIGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => MIGenerator::Known(*value),
        }
    }
}

enum MIGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u8)
}
impl ByteFiller for MIGenerator {
    fn generate(&mut self) -> u8 {
        match self {
            MIGenerator::Unseeded  => ().generate(),
            MIGenerator::Seeded(r) => r.generate(),
            MIGenerator::Known(k)  => k.generate(),
        }
    }
}

/// The 64KB memory image.
///
/// This is both the assembler's output and the simulator's execution substrate:
/// the assembler writes instructions directly into it, and the simulator executes out of it.
///
/// This can be addressed with any `u16` (16-bit address).
/// All multi-byte accesses are little-endian.
///
/// ```
/// use m6502_ensemble::sim::mem::Memory;
///
/// let mut mem = Memory::new(&mut 0u8);
/// mem.set(0x0200, 0x34);
/// mem.set(0x0201, 0x12);
/// assert_eq!(mem.get(0x0200), 0x34);
/// assert_eq!(mem.get_word(0x0200), 0x1234);
/// ```
#[derive(Clone)]
pub struct Memory {
    data: Box<[u8; N]>,
}
impl Memory {
    /// Creates a new memory, filled with data from the given filler.
    pub fn new(filler: &mut impl ByteFiller) -> Self {
        let mut mem = Self { data: Box::new([0; N]) };
        mem.fill(filler);
        mem
    }

    /// Overwrites every byte of memory with data from the given filler.
    pub fn fill(&mut self, filler: &mut impl ByteFiller) {
        self.data.iter_mut().for_each(|b| *b = filler.generate());
    }

    /// Reads the byte at the given address.
    pub fn get(&self, addr: u16) -> u8 {
        self.data[usize::from(addr)]
    }

    /// Writes a byte to the given address.
    pub fn set(&mut self, addr: u16, data: u8) {
        self.data[usize::from(addr)] = data;
    }

    /// Reads the little-endian word at the given address.
    ///
    /// The high byte is read from `addr + 1`, wrapping around the end of memory.
    pub fn get_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.get(addr), self.get(addr.wrapping_add(1))])
    }

    /// Writes a little-endian word to the given address.
    pub fn set_word(&mut self, addr: u16, data: u16) {
        let [lo, hi] = data.to_le_bytes();
        self.set(addr, lo);
        self.set(addr.wrapping_add(1), hi);
    }

    /// Reads a little-endian pointer out of zero page.
    ///
    /// The high byte wraps within zero page (a pointer at `$FF` has its high byte at `$00`).
    pub fn get_zp_word(&self, zp: u8) -> u16 {
        u16::from_le_bytes([self.get(u16::from(zp)), self.get(u16::from(zp.wrapping_add(1)))])
    }

    /// Reads a little-endian word where the high byte wraps within the page of `addr`.
    ///
    /// This is how `JMP (addr)` reads its target on an NMOS 6502.
    pub fn get_word_in_page(&self, addr: u16) -> u16 {
        let hi_addr = (addr & 0xFF00) | u16::from((addr as u8).wrapping_add(1));
        u16::from_le_bytes([self.get(addr), self.get(hi_addr)])
    }

    /// Copies a block of bytes into memory starting at `start` (wrapping around the end of memory).
    pub fn load(&mut self, start: u16, bytes: &[u8]) {
        let mut addr = start;
        for &b in bytes {
            self.set(addr, b);
            addr = addr.wrapping_add(1);
        }
    }

    /// Reads a NUL-terminated string starting at `addr`.
    ///
    /// Reading stops at the NUL byte or after one full wrap of memory, whichever comes first.
    pub fn read_cstr(&self, addr: u16) -> Vec<u8> {
        (0..=u16::MAX)
            .map(|i| self.get(addr.wrapping_add(i)))
            .take_while(|&b| b != 0)
            .collect()
    }

    /// The whole memory image as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &*self.data
    }
}
impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").finish_non_exhaustive()
    }
}

/// The processor status register (`P`).
///
/// Each flag is a single bit:
///
/// ```text
/// 7 6 5 4 3 2 1 0
/// N V - B D I Z C
/// ```
///
/// Bit 5 is unused and always reads as 1 when pushed.
/// The B flag only exists on the copy of `P` pushed by `BRK` and `PHP`.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Status(pub u8);
impl Status {
    /// Carry.
    pub const C: u8 = 1 << 0;
    /// Zero.
    pub const Z: u8 = 1 << 1;
    /// Interrupt disable.
    pub const I: u8 = 1 << 2;
    /// Decimal mode.
    pub const D: u8 = 1 << 3;
    /// Break.
    pub const B: u8 = 1 << 4;
    /// Unused (reads as 1).
    pub const U: u8 = 1 << 5;
    /// Overflow.
    pub const V: u8 = 1 << 6;
    /// Negative.
    pub const N: u8 = 1 << 7;

    /// The status register after a reset (`I` and the unused bit set).
    pub const RESET: Status = Status(Self::U | Self::I);

    /// Tests a flag.
    pub fn get(self, flag: u8) -> bool {
        self.0 & flag != 0
    }
    /// Sets or clears a flag.
    pub fn set(&mut self, flag: u8, on: bool) {
        match on {
            true  => self.0 |= flag,
            false => self.0 &= !flag,
        }
    }
    /// Sets the N and Z flags from a result byte.
    pub fn set_nz(&mut self, value: u8) {
        self.set(Self::Z, value == 0);
        self.set(Self::N, value & 0x80 != 0);
    }

    /// Carry flag.
    pub fn carry(self) -> bool { self.get(Self::C) }
    /// Zero flag.
    pub fn zero(self) -> bool { self.get(Self::Z) }
    /// Interrupt disable flag.
    pub fn interrupt_disable(self) -> bool { self.get(Self::I) }
    /// Decimal mode flag.
    pub fn decimal(self) -> bool { self.get(Self::D) }
    /// Overflow flag.
    pub fn overflow(self) -> bool { self.get(Self::V) }
    /// Negative flag.
    pub fn negative(self) -> bool { self.get(Self::N) }
}
impl Default for Status {
    fn default() -> Self {
        Self::RESET
    }
}
impl std::fmt::Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags: String = "NV-BDIZC".chars()
            .zip((0..8).rev())
            .map(|(c, i)| match self.0 & (1 << i) != 0 {
                true  => c,
                false => c.to_ascii_lowercase(),
            })
            .collect();

        f.debug_tuple("Status")
            .field(&format_args!("{flags}"))
            .finish()
    }
}

/// The register file.
///
/// ```
/// use m6502_ensemble::sim::mem::{Registers, Status};
///
/// let regs = Registers::default();
/// assert_eq!(regs.sp, 0xFF);
/// assert_eq!(regs.status, Status::RESET);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Registers {
    /// Accumulator.
    pub a: u8,
    /// X index register.
    pub x: u8,
    /// Y index register.
    pub y: u8,
    /// Stack pointer (offset into page 1).
    pub sp: u8,
    /// Program counter.
    pub pc: u16,
    /// Processor status.
    pub status: Status,
}
impl Default for Registers {
    fn default() -> Self {
        Self { a: 0, x: 0, y: 0, sp: 0xFF, pc: 0, status: Status::RESET }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words() {
        let mut mem = Memory::new(&mut 0u8);
        mem.set_word(0xFFFF, 0xBEEF);
        assert_eq!(mem.get(0xFFFF), 0xEF);
        assert_eq!(mem.get(0x0000), 0xBE);
        assert_eq!(mem.get_word(0xFFFF), 0xBEEF);

        // zero page pointer wraps within zero page
        mem.set(0x00FF, 0x34);
        mem.set(0x0000, 0x12);
        mem.set(0x0100, 0x99);
        assert_eq!(mem.get_zp_word(0xFF), 0x1234);

        // JMP indirect wraps within page
        mem.load(0x02FF, &[0x00]);
        mem.set(0x0200, 0x40);
        mem.set(0x0300, 0x50);
        assert_eq!(mem.get_word_in_page(0x02FF), 0x4000);
        assert_eq!(mem.get_word(0x02FF), 0x5000);
    }

    #[test]
    fn test_cstr() {
        let mut mem = Memory::new(&mut 0u8);
        mem.load(0x1000, b"hello\0world");
        assert_eq!(mem.read_cstr(0x1000), b"hello");
        assert_eq!(mem.read_cstr(0x1006), b"world");
    }

    #[test]
    fn test_init_strategies() {
        let mem = Memory::new(&mut MachineInitStrategy::Known { value: 0xEA }.generator());
        assert!(mem.as_slice().iter().all(|&b| b == 0xEA));

        let mem = Memory::new(&mut MachineInitStrategy::default().generator());
        assert!(mem.as_slice().iter().all(|&b| b == 0));

        let seeded = |seed| Memory::new(&mut MachineInitStrategy::Seeded { seed }.generator());
        assert_eq!(seeded(7).as_slice(), seeded(7).as_slice());
        assert_ne!(seeded(7).as_slice(), seeded(8).as_slice());
    }

    #[test]
    fn test_status() {
        let mut p = Status::RESET;
        assert!(p.interrupt_disable());
        assert!(!p.carry());

        p.set_nz(0x80);
        assert!(p.negative() && !p.zero());
        p.set_nz(0);
        assert!(!p.negative() && p.zero());
        p.set(Status::C, true);
        assert_eq!(format!("{p:?}"), "Status(nv-bdIZC)");
    }
}
