//! A 6502 assembler and simulator.
//! 
//! This is meant to be a general suite to write, assemble, and step through 6502 assembly,
//! usable as the backend of an editor/debugger front-end.
//!
//! # Usage
//! 
//! Source text is registered with an [`asm::Assembler`], which performs both assembler passes
//! and writes the resulting bytes straight into a simulator's memory image:
//! ```
//! use m6502_ensemble::asm::{Assembler, AsmFlags};
//! use m6502_ensemble::sim::Simulator;
//! 
//! let mut asm = Assembler::new(AsmFlags::default());
//! let root = asm.add_text("hello.asm", "
//!     start:  LDA #'H'
//!             JSR __outch
//!             LDA #'i'
//!             JSR __outch
//!             RTS
//! ");
//! 
//! let mut sim = Simulator::new(Default::default());
//! let assembly = asm.assemble(root, &mut sim.mem).unwrap();
//! assert_eq!(assembly.lookup_label("start"), Some(0x0200));
//! # sim.load_assembly(&assembly);
//! ```
//! 
//! Once assembled, the program can be executed with the simulator:
//! ```
//! # use m6502_ensemble::asm::{Assembler, AsmFlags};
//! # let mut asm = Assembler::new(AsmFlags::default());
//! # let root = asm.add_text("hello.asm", "LDA #'H'\nJSR __outch\nLDA #'i'\nJSR __outch\nRTS");
//! use m6502_ensemble::sim::{Simulator, StopReason};
//! use m6502_ensemble::sim::io::BufferedIo;
//! 
//! let mut sim = Simulator::new(Default::default());
//! let assembly = asm.assemble(root, &mut sim.mem).unwrap();
//! sim.load_assembly(&assembly);
//! 
//! let io = BufferedIo::new();
//! sim.set_io(io.clone());
//! assert_eq!(sim.run().unwrap(), StopReason::Terminated); // <-- Result can be handled accordingly
//! assert_eq!(&*io.get_output().read().unwrap(), b"Hi");
//! ```
//! 
//! If more granularity is needed for simulation, there are also step-in, step-over, and step-out functions. 
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod parse;
pub mod isa;
pub mod asm;
pub mod sim;
pub mod err;
