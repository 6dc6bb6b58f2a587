//! Simulating and execution for 6502 assembly.
//!
//! This module is focused on executing assembled code (i.e., a [`Memory`] image written by the
//! assembler, along with the [`Assembly`] that describes it).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates assembled code.
//! - [`mem`]: The module handling memory and the register file.
//! - [`trap`]: The module holding the trap ABI (the reserved addresses bound to host services).
//! - [`io`]: The module handling host IO for the traps.
//! - [`debug`]: The module handling breakpoints for the simulator.
//! - [`observer`]: The module handling change notifications for the host.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator, assemble into its memory,
//! and load the resulting assembly:
//!
//! ```
//! use m6502_ensemble::asm::{Assembler, AsmFlags};
//! use m6502_ensemble::sim::{Simulator, StopReason};
//!
//! let mut asm = Assembler::new(AsmFlags::default());
//! let root = asm.add_text("main.asm", "
//!         LDX #0
//!         INX
//!         INX
//!         INX
//!         RTS
//! ");
//!
//! let mut sim = Simulator::new(Default::default());
//! let assembly = asm.assemble(root, &mut sim.mem).unwrap();
//! sim.load_assembly(&assembly);
//!
//! // Running step by step:
//! sim.step_in().unwrap();
//! assert_eq!(sim.regs.x, 0);
//! sim.step_in().unwrap();
//! assert_eq!(sim.regs.x, 1);
//! sim.step_in().unwrap();
//! assert_eq!(sim.regs.x, 2);
//!
//! // Running to the end:
//! assert_eq!(sim.run().unwrap(), StopReason::Terminated);
//! assert_eq!(sim.regs.x, 3);
//! ```
//!
//! A run that begins while the simulator is not running resets the registers,
//! sets the PC to the entry point, and pushes the address of the `__terminate` trap
//! (minus one) onto the stack, so that an `RTS` at the top level ends the run.
//!
//! ## Flags
//!
//! Here, we define `sim` to have the default flags.
//! We could also configure the simulator by editing the flags. For example,
//! if we wish to ignore the decimal flag, we can edit the flags like so:
//!
//! ```
//! # use m6502_ensemble::sim::{Simulator, SimFlags};
//! let mut sim = Simulator::new(SimFlags { decimal_mode: false, ..Default::default() });
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! All execution goes through [`Simulator::execute`] with a [`RunMode`]:
//! - [`Simulator::run`]: runs until the program ends or hits a breakpoint
//! - [`Simulator::turbo_run`]: runs until the program ends, ignoring breakpoints and change tracking
//! - [`Simulator::step_in`], [`Simulator::step_over`], [`Simulator::step_out`]: manual step-by-step simulation
//!
//! Each of these returns the [`StopReason`] the run stopped for.
//!
//! ## Debugging with breakpoints
//!
//! Breakpoints are accessible through the `breakpoints` field on [`Simulator`].
//! They can be placed by source line with the help of the [`Assembly`]:
//!
//! ```
//! use m6502_ensemble::asm::{Assembler, AsmFlags};
//! use m6502_ensemble::sim::{Simulator, StopReason};
//!
//! let mut asm = Assembler::new(AsmFlags::default());
//! let root = asm.add_text("main.asm", "LDA #1\nLDA #2\nLDA #3\nRTS");
//!
//! let mut sim = Simulator::new(Default::default());
//! let assembly = asm.assemble(root, &mut sim.mem).unwrap();
//! sim.load_assembly(&assembly);
//!
//! let addr = assembly.address_of_line(root, 2, true).unwrap();
//! sim.toggle_breakpoint(addr);
//! assert_eq!(sim.run().unwrap(), StopReason::Breakpoint(addr));
//! assert_eq!(sim.regs.a, 2);
//!
//! // Continue to the end:
//! assert_eq!(sim.run().unwrap(), StopReason::Terminated);
//! assert_eq!(sim.regs.a, 3);
//! ```
//!
//! ## IO
//!
//! Programs perform IO by calling traps (e.g., `JSR __outch`).
//! The simulator forwards these to its [`HostIo`] device, which can be set with [`Simulator::set_io`].
//!
//! The best IO for programmatic uses is [`io::BufferedIo`],
//! which exposes the IO to memory buffers that can be modified.
//!
//! ```
//! use m6502_ensemble::asm::{Assembler, AsmFlags};
//! use m6502_ensemble::sim::Simulator;
//! use m6502_ensemble::sim::io::BufferedIo;
//!
//! let mut asm = Assembler::new(AsmFlags::default());
//! let root = asm.add_text("echo.asm", "
//!     loop:   JSR __getch
//!             JSR __outch
//!             CMP #0
//!             BNE loop
//!             RTS
//! ");
//!
//! let mut sim = Simulator::new(Default::default());
//! let assembly = asm.assemble(root, &mut sim.mem).unwrap();
//! sim.load_assembly(&assembly);
//!
//! let io = BufferedIo::new();
//! sim.set_io(io.clone());
//!
//! io.get_input().write().unwrap().extend(b"Hello, World!\0");
//! sim.run().unwrap();
//!
//! assert!(io.get_input().read().unwrap().is_empty());
//! assert_eq!(&*io.get_output().read().unwrap(), b"Hello, World!\0");
//! ```
//!
//! A run can also be cancelled from another thread with a [`StopHandle`] (see [`Simulator::stop_handle`]).
//!
//! [`Memory`]: self::mem::Memory
//! [`Assembly`]: crate::asm::Assembly
pub mod mem;
pub mod trap;
pub mod io;
pub mod debug;
pub mod observer;

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::asm::Assembly;
use crate::isa::table::{table, OpcodeEntry};
use crate::isa::{AddrMode, Op};
use debug::BreakpointSet;
use io::{EmptyIo, HostIo, InputEvent, StopSignal};
use mem::{MachineInitStrategy, Memory, Registers, Status, STACK_BASE};
use observer::ChangeObserver;
use trap::Trap;

pub use io::StopHandle;

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum SimErr {
    /// The byte at the PC is not a documented opcode.
    #[error("illegal opcode ${opcode:02X} at ${addr:04X}")]
    IllegalOpcode {
        /// The byte that was decoded.
        opcode: u8,
        /// The address it was decoded from.
        addr: u16
    },
    /// The operation was decoded with an addressing mode it cannot execute with.
    #[error("{op} cannot execute with {mode} addressing")]
    UnimplementedMode {
        /// The operation.
        op: Op,
        /// The addressing mode.
        mode: AddrMode
    },
    /// The name passed to `__fopen` is not a valid filename.
    #[error("bad filename {0:?}")]
    BadFilename(String),
    /// `__fopen` was called while a file was already open.
    #[error("a file is already open")]
    FileAlreadyOpen,
    /// A file trap was called while no file was open.
    #[error("no file is open")]
    FileNotOpen,
    /// Reading or rewinding the open file failed.
    #[error("file error: {0}")]
    FileIo(String),
}
impl crate::err::Error for SimErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            SimErr::IllegalOpcode { .. } => Some("the program may have run into data, check for a missing RTS or JMP".into()),
            SimErr::UnimplementedMode { .. } => None,
            SimErr::BadFilename(_) => Some("__fopen expects a pointer to a NUL-terminated UTF-8 filename in A (low) and X (high)".into()),
            SimErr::FileAlreadyOpen => Some("call __fclose before opening another file".into()),
            SimErr::FileNotOpen => Some("call __fopen first and check that carry is clear".into()),
            SimErr::FileIo(_) => None,
        }
    }
}

/// Anything that can cause a step to abruptly fail to finish.
enum StepBreak {
    /// The run must stop.
    Stop(StopReason),
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Reason for why execution stopped if it wasn't due to an error.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum StopReason {
    /// The program reached the `__terminate` trap.
    Terminated,
    /// The program executed a `BRK` that reached the break handler.
    Break {
        /// The address of the `BRK` instruction.
        addr: u16,
        /// The message the `BRK` pointed to.
        message: String
    },
    /// The PC reached a breakpoint.
    Breakpoint(u16),
    /// A step finished.
    Step,
    /// A stop was requested through a [`StopHandle`].
    Cancelled,
    /// An input trap read a Ctrl-C (`$03`).
    Interrupted,
    /// An input trap was called after the input closed.
    InputClosed,
}
impl StopReason {
    /// Whether this stop ends the run (as opposed to pausing it).
    pub fn ends_run(&self) -> bool {
        !matches!(self, StopReason::Breakpoint(_) | StopReason::Step)
    }
}

/// How a run proceeds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RunMode {
    /// Runs until the program ends or a breakpoint is hit.
    Run,
    /// Runs until the program ends, without checking breakpoints or tracking changes.
    TurboRun,
    /// Executes exactly one instruction.
    StepInto,
    /// Executes one instruction, running through an entire subroutine if the instruction is a `JSR`.
    StepOver,
    /// Runs until the current subroutine returns.
    StepOut,
}

/// The execution state of the simulator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum RunState {
    /// No run has started (or the last run ended).
    ///
    /// The next run resets the registers.
    #[default]
    NotRunning,
    /// A run stopped at a breakpoint or after a step.
    ///
    /// The next run continues from the current state.
    Paused,
    /// A run is in progress.
    Running(RunMode),
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`]
/// and their effects should still apply.
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// The creation strategy for memory.
    ///
    /// This is used to initialize the `mem` field,
    /// so it only goes into effect with [`Simulator::new`].
    ///
    /// By default, this flag is [`MachineInitStrategy::default`].
    pub machine_init: MachineInitStrategy,

    /// The number of instructions between each yield to the host
    /// (a call to [`HostIo::process_events`]).
    ///
    /// By default, this flag is `10_000`.
    pub yield_interval: u32,

    /// Whether `ADC` and `SBC` honor the decimal flag.
    ///
    /// By default, this flag is `true`.
    pub decimal_mode: bool,

    /// Whether an extra cycle is charged when indexing or branching crosses a page boundary.
    ///
    /// The indexed penalty applies to every operation using absolute X/Y or `(zp),Y` addressing.
    /// On hardware, stores and read-modify-write operations always take the extra cycle,
    /// and the opcode table already counts it for them, so they are charged one more
    /// than hardware when they cross a page.
    ///
    /// By default, this flag is `true`.
    pub page_cross_penalty: bool,
}
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            machine_init: Default::default(),
            yield_interval: 10_000,
            decimal_mode: true,
            page_cross_penalty: true
        }
    }
}

/// The entry point used when an assembly has no instructions.
const DEFAULT_ENTRY: u16 = 0x0200;
const BRK_VECTOR: u16 = 0xFFFE;
const CTRL_C: u8 = 0x03;

/// The operand of an instruction, after applying its addressing mode.
#[derive(Clone, Copy)]
enum Operand {
    None,
    Accumulator,
    Immediate(u8),
    Address(u16),
}

/// Executes assembled code.
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------

    /// The simulator's memory.
    ///
    /// Note that this is held in the heap, as it is too large for the stack.
    pub mem: Memory,

    /// The register file.
    pub regs: Registers,

    /// The number of cycles run since the last run started (or the last `__clear_cycles`).
    pub cycles: u64,

    /// The number of instructions successfully run since the last run started.
    pub instructions_run: u64,

    /// When the last run started.
    run_started: Instant,

    /// The execution state.
    state: RunState,

    /// Tracks changes in simulator state.
    pub observer: ChangeObserver,

    /// The file opened by `__fopen`.
    file: Option<BufReader<File>>,

    // ------------------ CONFIG/DEBUG STATE ------------------

    /// Configuration settings for the simulator.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: BreakpointSet,

    /// Breakpoints added by the `.break` directives of the loaded assembly.
    directive_breakpoints: BTreeSet<u16>,

    /// Where runs begin.
    entry_point: u16,

    /// The host IO device.
    io: Box<dyn HostIo>,

    stop: StopSignal,
    stop_handle: StopHandle,
}
impl Simulator where Simulator: Send {}

impl Simulator {
    /// Creates a new simulator with the provided flags,
    /// with memory filled according to [`SimFlags::machine_init`].
    pub fn new(flags: SimFlags) -> Self {
        let mut filler = flags.machine_init.generator();
        let (stop_handle, stop) = io::stop_pair();

        Self {
            mem: Memory::new(&mut filler),
            regs: Registers::default(),
            cycles: 0,
            instructions_run: 0,
            run_started: Instant::now(),
            state: RunState::NotRunning,
            observer: Default::default(),
            file: None,

            flags,
            breakpoints: Default::default(),
            directive_breakpoints: Default::default(),
            entry_point: DEFAULT_ENTRY,
            io: Box::new(EmptyIo),
            stop,
            stop_handle
        }
    }

    /// Prepares the simulator to run an assembly
    /// which has already been assembled into [`Simulator::mem`].
    ///
    /// This sets the entry point to the first instruction of the assembly,
    /// replaces the `.break` breakpoints of any previously loaded assembly with its own,
    /// and ends any run in progress. Breakpoints toggled by the host are kept.
    pub fn load_assembly(&mut self, assembly: &Assembly) {
        self.entry_point = assembly.entry_point().unwrap_or(DEFAULT_ENTRY);
        for &addr in &self.directive_breakpoints {
            self.breakpoints.remove(addr);
        }
        self.directive_breakpoints = assembly.breakpoints().clone();
        self.breakpoints.extend(self.directive_breakpoints.iter().copied());
        self.reset();
    }

    /// Ends any run in progress, so the next run starts over from the entry point.
    ///
    /// This resets the registers and closes any open file, but does not change memory.
    pub fn reset(&mut self) {
        self.state = RunState::NotRunning;
        self.regs = Registers::default();
        self.file = None;
        self.observer.clear();
    }

    /// Sets the address runs begin at.
    pub fn set_entry_point(&mut self, addr: u16) {
        self.entry_point = addr;
    }
    /// The address runs begin at.
    pub fn entry_point(&self) -> u16 {
        self.entry_point
    }

    /// Sets the host IO device, closing the previous one.
    pub fn set_io(&mut self, io: impl HostIo + 'static) {
        self.io.close();
        self.io = Box::new(io);
    }

    /// Creates a handle which can stop a run of this simulator from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// The current execution state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// A snapshot of the register file.
    pub fn registers(&self) -> Registers {
        self.regs
    }

    /// Toggles a breakpoint at the given address, returning whether it is now set.
    pub fn toggle_breakpoint(&mut self, addr: u16) -> bool {
        self.breakpoints.toggle(addr)
    }

    /// The breakpoints of this simulator.
    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    /// Time since the last run started.
    pub fn elapsed(&self) -> Duration {
        self.run_started.elapsed()
    }

    fn tracking(&self) -> bool {
        self.state != RunState::Running(RunMode::TurboRun)
    }

    fn write(&mut self, addr: u16, data: u8) {
        self.mem.set(addr, data);
        if self.tracking() {
            self.observer.record_write(addr);
        }
    }

    fn push(&mut self, data: u8) {
        self.write(STACK_BASE | u16::from(self.regs.sp), data);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }
    fn push_word(&mut self, data: u16) {
        let [lo, hi] = data.to_le_bytes();
        self.push(hi);
        self.push(lo);
    }
    fn pull(&mut self) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        self.mem.get(STACK_BASE | u16::from(self.regs.sp))
    }
    fn pull_word(&mut self) -> u16 {
        let lo = self.pull();
        let hi = self.pull();
        u16::from_le_bytes([lo, hi])
    }
    /// Reads the word `offset` bytes above the top of the stack, without pulling.
    fn peek_word(&self, offset: u8) -> u16 {
        let lo = self.mem.get(STACK_BASE | u16::from(self.regs.sp.wrapping_add(offset)));
        let hi = self.mem.get(STACK_BASE | u16::from(self.regs.sp.wrapping_add(offset).wrapping_add(1)));
        u16::from_le_bytes([lo, hi])
    }

    /// A 16-bit pointer from A (low) and X (high).
    fn ax(&self) -> u16 {
        u16::from_le_bytes([self.regs.a, self.regs.x])
    }
    /// Writes the low 24 bits of a value into A, X, Y (low to high).
    fn set_axy(&mut self, value: u64) {
        let [a, x, y, ..] = value.to_le_bytes();
        self.regs.a = a;
        self.regs.x = x;
        self.regs.y = y;
    }

    /// Resets the CPU for a new run.
    fn begin_run(&mut self) {
        self.regs = Registers { pc: self.entry_point, ..Default::default() };
        self.push_word(Trap::Terminate.addr().wrapping_sub(1));

        self.cycles = 0;
        self.instructions_run = 0;
        self.run_started = Instant::now();
        self.file = None;
    }

    /// Runs the simulator in the given mode until it stops.
    ///
    /// If the simulator is not running, this first resets the CPU (see the [module-level documentation](self)).
    /// If it is paused, this continues from the current state.
    ///
    /// Any stop requested before this call is discarded.
    ///
    /// If an error occurs, the run ends and the simulator returns to [`RunState::NotRunning`].
    pub fn execute(&mut self, mode: RunMode) -> Result<StopReason, SimErr> {
        if self.state == RunState::NotRunning {
            self.begin_run();
        }
        self.stop.clear();
        self.observer.clear();
        self.state = RunState::Running(mode);
        tracing::debug!(?mode, pc = self.regs.pc, "run started");

        let target = match mode {
            RunMode::StepOver => self.call_return_address(),
            // The caller's return address is on top of the stack.
            RunMode::StepOut => Some(self.peek_word(1).wrapping_add(1)),
            _ => None
        };
        let single = mode == RunMode::StepInto || (mode == RunMode::StepOver && target.is_none());
        let result = self.run_until(mode, single, target);

        self.state = match &result {
            Ok(reason) if !reason.ends_run() => RunState::Paused,
            _ => RunState::NotRunning,
        };
        if mode == RunMode::TurboRun {
            self.observer.invalidate();
        }
        match &result {
            Ok(reason) => {
                tracing::debug!(?reason, pc = self.regs.pc, instructions = self.instructions_run, "run stopped");
                self.observer.set_last_stop(reason.clone());
            },
            Err(e) => tracing::debug!(%e, pc = self.regs.pc, "run failed"),
        }
        result
    }

    fn run_until(&mut self, mode: RunMode, single: bool, target: Option<u16>) -> Result<StopReason, SimErr> {
        let yield_interval = self.flags.yield_interval.max(1);
        let mut since_yield = 0;

        // event loop
        // run until:
        // 1. a stop is requested
        // 2. a step stops the run (termination, input, errors)
        // 3. the step target is reached
        // 4. any of the breakpoints are hit
        loop {
            if self.stop.requested() {
                break Ok(StopReason::Cancelled);
            }

            match self.step() {
                Ok(()) => {},
                Err(StepBreak::Stop(reason)) => break Ok(reason),
                Err(StepBreak::Err(e)) => break Err(e),
            }

            since_yield += 1;
            if since_yield >= yield_interval {
                since_yield = 0;
                self.io.process_events();
            }

            if single || target == Some(self.regs.pc) {
                break Ok(StopReason::Step);
            }
            if mode != RunMode::TurboRun && self.breakpoints.contains(self.regs.pc) {
                tracing::info!(pc = self.regs.pc, "breakpoint hit");
                break Ok(StopReason::Breakpoint(self.regs.pc));
            }
        }
    }

    /// Execute the program.
    ///
    /// This blocks until the program ends or a breakpoint is hit.
    pub fn run(&mut self) -> Result<StopReason, SimErr> {
        self.execute(RunMode::Run)
    }

    /// Execute the program as fast as possible.
    ///
    /// This ignores breakpoints and does not track changes
    /// (the observer is invalidated instead).
    pub fn turbo_run(&mut self) -> Result<StopReason, SimErr> {
        self.execute(RunMode::TurboRun)
    }

    /// Simulate one step, executing one instruction.
    pub fn step_in(&mut self) -> Result<StopReason, SimErr> {
        self.execute(RunMode::StepInto)
    }

    /// Simulate one step, executing one instruction and running through entire subroutines as a single step.
    pub fn step_over(&mut self) -> Result<StopReason, SimErr> {
        self.execute(RunMode::StepOver)
    }

    /// Run through the simulator's execution until the subroutine is exited.
    pub fn step_out(&mut self) -> Result<StopReason, SimErr> {
        self.execute(RunMode::StepOut)
    }

    /// The address a `JSR` at the PC would return to, if the PC is at a `JSR`.
    fn call_return_address(&self) -> Option<u16> {
        let pc = self.regs.pc;
        if Trap::from_addr(pc).is_some() { return None };

        table().decode(self.mem.get(pc))
            .filter(|e| e.op == Op::JSR)
            .map(|e| pc.wrapping_add(u16::from(e.size)))
    }

    /// Simulate one step, tracking register changes.
    fn step(&mut self) -> Result<(), StepBreak> {
        let before = self.regs;
        let result = self.step_inner();
        if self.tracking() && self.regs != before {
            self.observer.record_regs();
        }
        result
    }

    /// Simulate one step.
    ///
    /// If the PC is at a trap, this dispatches the trap.
    /// Otherwise, this executes one instruction
    /// (and the trap it jumps to, if it jumps to one).
    fn step_inner(&mut self) -> Result<(), StepBreak> {
        if let Some(trap) = Trap::from_addr(self.regs.pc) {
            return self.call_trap(trap);
        }

        let pc = self.regs.pc;
        let opcode = self.mem.get(pc);
        let entry = table().decode(opcode)
            .ok_or(SimErr::IllegalOpcode { opcode, addr: pc })?;

        tracing::trace!(
            pc, opcode, op = %entry.op,
            a = self.regs.a, x = self.regs.x, y = self.regs.y, sp = self.regs.sp, p = self.regs.status.0,
            "step"
        );

        let cycles = self.exec_instr(entry, pc)?;
        self.cycles = self.cycles.wrapping_add(cycles);
        self.instructions_run = self.instructions_run.wrapping_add(1);

        match Trap::from_addr(self.regs.pc) {
            Some(trap) => self.call_trap(trap),
            None => Ok(())
        }
    }

    fn resolve(&self, entry: &OpcodeEntry, at: u16) -> (Operand, bool) {
        let b = self.mem.get(at.wrapping_add(1));
        let w = self.mem.get_word(at.wrapping_add(1));
        let Registers { x, y, .. } = self.regs;
        let crossed = |base: u16, ea: u16| base & 0xFF00 != ea & 0xFF00;

        match entry.mode {
            AddrMode::Implied     => (Operand::None, false),
            AddrMode::Accumulator => (Operand::Accumulator, false),
            AddrMode::Immediate   => (Operand::Immediate(b), false),
            AddrMode::ZeroPage    => (Operand::Address(u16::from(b)), false),
            AddrMode::ZeroPageX   => (Operand::Address(u16::from(b.wrapping_add(x))), false),
            AddrMode::ZeroPageY   => (Operand::Address(u16::from(b.wrapping_add(y))), false),
            // the PC has already advanced past the instruction
            AddrMode::Relative    => (Operand::Address(self.regs.pc.wrapping_add_signed(i16::from(b as i8))), false),
            AddrMode::Absolute    => (Operand::Address(w), false),
            AddrMode::AbsoluteX   => {
                let ea = w.wrapping_add(u16::from(x));
                (Operand::Address(ea), crossed(w, ea))
            },
            AddrMode::AbsoluteY   => {
                let ea = w.wrapping_add(u16::from(y));
                (Operand::Address(ea), crossed(w, ea))
            },
            AddrMode::Indirect    => (Operand::Address(self.mem.get_word_in_page(w)), false),
            AddrMode::IndexedIndirectX => (Operand::Address(self.mem.get_zp_word(b.wrapping_add(x))), false),
            AddrMode::IndirectIndexedY => {
                let base = self.mem.get_zp_word(b);
                let ea = base.wrapping_add(u16::from(y));
                (Operand::Address(ea), crossed(base, ea))
            },
        }
    }

    fn read(&self, entry: &OpcodeEntry, operand: Operand) -> Result<u8, SimErr> {
        match operand {
            Operand::Immediate(v) => Ok(v),
            Operand::Accumulator  => Ok(self.regs.a),
            Operand::Address(a)   => Ok(self.mem.get(a)),
            Operand::None => Err(SimErr::UnimplementedMode { op: entry.op, mode: entry.mode }),
        }
    }
    fn write_back(&mut self, entry: &OpcodeEntry, operand: Operand, data: u8) -> Result<(), SimErr> {
        match operand {
            Operand::Accumulator => self.regs.a = data,
            Operand::Address(a)  => self.write(a, data),
            Operand::None | Operand::Immediate(_) => return Err(SimErr::UnimplementedMode { op: entry.op, mode: entry.mode }),
        }
        Ok(())
    }
    fn address(entry: &OpcodeEntry, operand: Operand) -> Result<u16, SimErr> {
        match operand {
            Operand::Address(a) => Ok(a),
            _ => Err(SimErr::UnimplementedMode { op: entry.op, mode: entry.mode }),
        }
    }

    fn adc(&mut self, m: u8) {
        let a = self.regs.a;
        let c = u16::from(self.regs.status.carry());
        let sum = u16::from(a) + u16::from(m) + c;
        let bin = sum as u8;
        let decimal = self.flags.decimal_mode && self.regs.status.decimal();

        let p = &mut self.regs.status;
        p.set_nz(bin);
        p.set(Status::V, !(a ^ m) & (a ^ bin) & 0x80 != 0);

        if decimal {
            let mut lo = u16::from(a & 0x0F) + u16::from(m & 0x0F) + c;
            let mut hi = u16::from(a >> 4) + u16::from(m >> 4);
            if lo > 0x09 { lo += 0x06; }
            if lo > 0x0F { hi += 1; }
            if hi > 0x09 { hi += 0x06; }
            p.set(Status::C, hi > 0x0F);
            self.regs.a = ((hi << 4) | (lo & 0x0F)) as u8;
        } else {
            p.set(Status::C, sum > 0xFF);
            self.regs.a = bin;
        }
    }

    fn sbc(&mut self, m: u8) {
        let a = self.regs.a;
        let borrow = i16::from(!self.regs.status.carry());
        let diff = i16::from(a) - i16::from(m) - borrow;
        let bin = diff as u8;
        let decimal = self.flags.decimal_mode && self.regs.status.decimal();

        let p = &mut self.regs.status;
        p.set_nz(bin);
        p.set(Status::V, (a ^ m) & (a ^ bin) & 0x80 != 0);
        p.set(Status::C, diff >= 0);

        if decimal {
            let mut lo = i16::from(a & 0x0F) - i16::from(m & 0x0F) - borrow;
            let mut hi = i16::from(a >> 4) - i16::from(m >> 4);
            if lo < 0 {
                lo -= 0x06;
                hi -= 1;
            }
            if hi < 0 { hi -= 0x06; }
            self.regs.a = ((hi << 4) | (lo & 0x0F)) as u8;
        } else {
            self.regs.a = bin;
        }
    }

    fn compare(&mut self, reg: u8, m: u8) {
        let p = &mut self.regs.status;
        p.set(Status::C, reg >= m);
        p.set_nz(reg.wrapping_sub(m));
    }

    /// Executes a decoded instruction, returning the cycles it took.
    fn exec_instr(&mut self, entry: &OpcodeEntry, at: u16) -> Result<u64, StepBreak> {
        self.regs.pc = at.wrapping_add(u16::from(entry.size));
        let (operand, crossed) = self.resolve(entry, at);

        let mut cycles = u64::from(entry.cycles);
        if crossed && self.flags.page_cross_penalty {
            cycles += 1;
        }

        match entry.op {
            Op::LDA => {
                let v = self.read(entry, operand)?;
                self.regs.a = v;
                self.regs.status.set_nz(v);
            },
            Op::LDX => {
                let v = self.read(entry, operand)?;
                self.regs.x = v;
                self.regs.status.set_nz(v);
            },
            Op::LDY => {
                let v = self.read(entry, operand)?;
                self.regs.y = v;
                self.regs.status.set_nz(v);
            },
            Op::STA => self.write(Self::address(entry, operand)?, self.regs.a),
            Op::STX => self.write(Self::address(entry, operand)?, self.regs.x),
            Op::STY => self.write(Self::address(entry, operand)?, self.regs.y),

            Op::ADC => {
                let v = self.read(entry, operand)?;
                self.adc(v);
            },
            Op::SBC => {
                let v = self.read(entry, operand)?;
                self.sbc(v);
            },
            Op::AND | Op::ORA | Op::EOR => {
                let v = self.read(entry, operand)?;
                self.regs.a = match entry.op {
                    Op::AND => self.regs.a & v,
                    Op::ORA => self.regs.a | v,
                    _       => self.regs.a ^ v,
                };
                self.regs.status.set_nz(self.regs.a);
            },
            Op::BIT => {
                let v = self.read(entry, operand)?;
                let p = &mut self.regs.status;
                p.set(Status::Z, self.regs.a & v == 0);
                p.set(Status::N, v & 0x80 != 0);
                p.set(Status::V, v & 0x40 != 0);
            },
            Op::CMP => {
                let v = self.read(entry, operand)?;
                self.compare(self.regs.a, v);
            },
            Op::CPX => {
                let v = self.read(entry, operand)?;
                self.compare(self.regs.x, v);
            },
            Op::CPY => {
                let v = self.read(entry, operand)?;
                self.compare(self.regs.y, v);
            },

            Op::ASL | Op::LSR | Op::ROL | Op::ROR => {
                let v = self.read(entry, operand)?;
                let carry_in = u8::from(self.regs.status.carry());
                let (result, carry_out) = match entry.op {
                    Op::ASL => (v << 1, v & 0x80 != 0),
                    Op::LSR => (v >> 1, v & 0x01 != 0),
                    Op::ROL => ((v << 1) | carry_in, v & 0x80 != 0),
                    _       => ((v >> 1) | (carry_in << 7), v & 0x01 != 0),
                };
                self.write_back(entry, operand, result)?;
                self.regs.status.set(Status::C, carry_out);
                self.regs.status.set_nz(result);
            },
            Op::INC | Op::DEC => {
                let v = self.read(entry, operand)?;
                let result = match entry.op {
                    Op::INC => v.wrapping_add(1),
                    _       => v.wrapping_sub(1),
                };
                self.write_back(entry, operand, result)?;
                self.regs.status.set_nz(result);
            },
            Op::INX => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.regs.status.set_nz(self.regs.x);
            },
            Op::INY => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.regs.status.set_nz(self.regs.y);
            },
            Op::DEX => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.regs.status.set_nz(self.regs.x);
            },
            Op::DEY => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.regs.status.set_nz(self.regs.y);
            },

            Op::BCC | Op::BCS | Op::BEQ | Op::BMI | Op::BNE | Op::BPL | Op::BVC | Op::BVS => {
                let p = self.regs.status;
                let taken = match entry.op {
                    Op::BCC => !p.carry(),
                    Op::BCS => p.carry(),
                    Op::BEQ => p.zero(),
                    Op::BNE => !p.zero(),
                    Op::BMI => p.negative(),
                    Op::BPL => !p.negative(),
                    Op::BVS => p.overflow(),
                    _       => !p.overflow(),
                };
                if taken {
                    let target = Self::address(entry, operand)?;
                    cycles += 1;
                    if self.flags.page_cross_penalty && target & 0xFF00 != self.regs.pc & 0xFF00 {
                        cycles += 1;
                    }
                    self.regs.pc = target;
                }
            },
            Op::JMP => self.regs.pc = Self::address(entry, operand)?,
            Op::JSR => {
                let target = Self::address(entry, operand)?;
                // The pushed return address is the last byte of the JSR.
                self.push_word(self.regs.pc.wrapping_sub(1));
                self.regs.pc = target;
            },
            Op::RTS => self.regs.pc = self.pull_word().wrapping_add(1),
            Op::RTI => {
                let p = self.pull();
                self.regs.status = Status((p & !Status::B) | Status::U);
                self.regs.pc = self.pull_word();
            },
            Op::BRK => {
                self.push_word(at.wrapping_add(2));
                self.push(self.regs.status.0 | Status::B | Status::U);
                self.regs.status.set(Status::I, true);
                self.regs.pc = match self.mem.get_word(BRK_VECTOR) {
                    0 => Trap::BrkHandler.addr(),
                    vector => vector
                };
            },

            Op::PHA => self.push(self.regs.a),
            Op::PHP => self.push(self.regs.status.0 | Status::B | Status::U),
            Op::PLA => {
                self.regs.a = self.pull();
                self.regs.status.set_nz(self.regs.a);
            },
            Op::PLP => {
                let p = self.pull();
                self.regs.status = Status((p & !Status::B) | Status::U);
            },

            Op::CLC => self.regs.status.set(Status::C, false),
            Op::CLD => self.regs.status.set(Status::D, false),
            Op::CLI => self.regs.status.set(Status::I, false),
            Op::CLV => self.regs.status.set(Status::V, false),
            Op::SEC => self.regs.status.set(Status::C, true),
            Op::SED => self.regs.status.set(Status::D, true),
            Op::SEI => self.regs.status.set(Status::I, true),

            Op::TAX => {
                self.regs.x = self.regs.a;
                self.regs.status.set_nz(self.regs.x);
            },
            Op::TAY => {
                self.regs.y = self.regs.a;
                self.regs.status.set_nz(self.regs.y);
            },
            Op::TSX => {
                self.regs.x = self.regs.sp;
                self.regs.status.set_nz(self.regs.x);
            },
            Op::TXA => {
                self.regs.a = self.regs.x;
                self.regs.status.set_nz(self.regs.a);
            },
            Op::TYA => {
                self.regs.a = self.regs.y;
                self.regs.status.set_nz(self.regs.a);
            },
            Op::TXS => self.regs.sp = self.regs.x,
            Op::NOP => {},
        }

        Ok(cycles)
    }

    /// Performs a trap's host service.
    ///
    /// Every trap except the terminal ones returns to its caller as though it ended in `RTS`.
    fn call_trap(&mut self, trap: Trap) -> Result<(), StepBreak> {
        tracing::trace!(%trap, a = self.regs.a, x = self.regs.x, y = self.regs.y, "trap");
        // let the host catch up before waiting on it
        if trap.is_blocking() {
            self.io.process_events();
        }

        match trap {
            Trap::Terminate => return Err(StepBreak::Stop(StopReason::Terminated)),
            Trap::BrkHandler => {
                // BRK pushed P, then its return address (BRK + 2).
                // The word after the BRK opcode points to the message.
                let ret = self.peek_word(2);
                let message = self.mem.read_cstr(self.mem.get_word(ret.wrapping_sub(1)));
                self.io.write_bytes(&message);

                return Err(StepBreak::Stop(StopReason::Break {
                    addr: ret.wrapping_sub(2),
                    message: String::from_utf8_lossy(&message).into_owned()
                }));
            },
            Trap::OutCh => self.io.write_byte(self.regs.a),
            Trap::OutStr => {
                let s = self.mem.read_cstr(self.ax());
                self.io.write_bytes(&s);
            },
            Trap::GetCh => {
                match self.io.read_byte(None, &self.stop) {
                    InputEvent::Byte(b) => self.accept_input(b)?,
                    InputEvent::Cancelled => return Err(StepBreak::Stop(StopReason::Cancelled)),
                    InputEvent::Timeout | InputEvent::Closed => return Err(StepBreak::Stop(StopReason::InputClosed)),
                }
            },
            Trap::GetChTimeout => {
                let timeout = Duration::from_millis(u64::from(self.ax()));
                match self.io.read_byte(Some(timeout), &self.stop) {
                    InputEvent::Byte(b) => {
                        self.accept_input(b)?;
                        self.regs.status.set(Status::C, false);
                    },
                    InputEvent::Timeout => self.regs.status.set(Status::C, true),
                    InputEvent::Cancelled => return Err(StepBreak::Stop(StopReason::Cancelled)),
                    InputEvent::Closed => return Err(StepBreak::Stop(StopReason::InputClosed)),
                }
            },
            Trap::ElapsedMs => {
                let ms = self.run_started.elapsed().as_millis();
                self.set_axy(ms as u64);
            },
            Trap::WallClock => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_secs())
                    % 86_400;
                self.regs.a = (secs / 3600) as u8;
                self.regs.x = (secs / 60 % 60) as u8;
                self.regs.y = (secs % 60) as u8;
            },
            Trap::Cycles => self.set_axy(self.cycles),
            Trap::ClearCycles => self.cycles = 0,
            Trap::ProcessEvents => self.io.process_events(),
            Trap::FOpen => self.fopen()?,
            Trap::FClose => {
                self.file.take().ok_or(SimErr::FileNotOpen)?;
            },
            Trap::FRewind => {
                let file = self.file.as_mut().ok_or(SimErr::FileNotOpen)?;
                file.rewind().map_err(|e| SimErr::FileIo(e.to_string()))?;
            },
            Trap::FRead => {
                let file = self.file.as_mut().ok_or(SimErr::FileNotOpen)?;
                let mut buf = [0];
                match file.read(&mut buf).map_err(|e| SimErr::FileIo(e.to_string()))? {
                    0 => self.regs.status.set(Status::C, true),
                    _ => {
                        self.regs.a = buf[0];
                        self.regs.status.set(Status::C, false);
                    }
                }
            },
        }

        // implicit RTS
        self.regs.pc = self.pull_word().wrapping_add(1);
        let rts_cycles = table().lookup(Op::RTS, AddrMode::Implied).map_or(6, |e| e.cycles);
        self.cycles = self.cycles.wrapping_add(u64::from(rts_cycles));
        Ok(())
    }

    /// Stores a byte read by an input trap in A, or interrupts the run on Ctrl-C.
    fn accept_input(&mut self, byte: u8) -> Result<(), StepBreak> {
        match byte {
            CTRL_C => Err(StepBreak::Stop(StopReason::Interrupted)),
            b => {
                self.regs.a = b;
                Ok(())
            }
        }
    }

    fn fopen(&mut self) -> Result<(), SimErr> {
        if self.file.is_some() {
            return Err(SimErr::FileAlreadyOpen);
        }

        let raw = self.mem.read_cstr(self.ax());
        let name = String::from_utf8(raw)
            .map_err(|e| SimErr::BadFilename(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
        if name.is_empty() {
            return Err(SimErr::BadFilename(name));
        }

        match File::open(&name) {
            Ok(f) => {
                self.file = Some(BufReader::new(f));
                self.regs.status.set(Status::C, false);
            },
            Err(e) => {
                tracing::debug!(%name, %e, "could not open file");
                self.regs.status.set(Status::C, true);
            }
        }
        Ok(())
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}
impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("regs", &self.regs)
            .field("cycles", &self.cycles)
            .field("instructions_run", &self.instructions_run)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("breakpoints", &self.breakpoints)
            .field("entry_point", &self.entry_point)
            .field("file_open", &self.file.is_some())
            .finish_non_exhaustive()
    }
}
