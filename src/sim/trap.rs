//! The trap ABI.
//!
//! A trap is a reserved address which, when jumped or called to, does not execute
//! the bytes of the memory image. Instead, the simulator performs a host service
//! (e.g., printing a character) and then returns to the caller as though the
//! service were a subroutine ending in `RTS`.
//!
//! The table in this module is the single source of truth for these addresses.
//! The assembler predefines each trap's [`Trap::symbol`] with its [`Trap::addr`],
//! and the simulator dispatches on the same addresses.
//!
//! | address | symbol             | service |
//! |---------|--------------------|---------|
//! | `$FFE0` | `__terminate`      | end the run |
//! | `$FFE1` | `__brk_handler`    | print the message of a `BRK`, end the run |
//! | `$FFE2` | `__outch`          | write the byte in A |
//! | `$FFE3` | `__outstr`         | write the NUL-terminated string at A (low), X (high) |
//! | `$FFE4` | `__getch`          | blocking read of a byte into A |
//! | `$FFE5` | `__getch_timeout`  | read with timeout (ms in A (low), X (high)); C=1 on timeout |
//! | `$FFE6` | `__elapsed_ms`     | ms since the run started in A, X, Y (low to high) |
//! | `$FFE7` | `__wallclock`      | UTC time of day: A=hours, X=minutes, Y=seconds |
//! | `$FFE8` | `__cycles`         | cycle count in A, X, Y (low to high) |
//! | `$FFE9` | `__clear_cycles`   | reset the cycle count |
//! | `$FFEA` | `__process_events` | yield to the host |
//! | `$FFEB` | `__fopen`          | open the host file named at A (low), X (high); C=1 on failure |
//! | `$FFEC` | `__fclose`         | close the open file |
//! | `$FFED` | `__frewind`        | rewind the open file |
//! | `$FFEE` | `__fread`          | read a byte of the open file into A; C=1 at end of file |

/// The version of the trap table.
///
/// This is bumped whenever an address is added, removed, or rebound.
pub const TRAP_ABI_VERSION: u32 = 1;

macro_rules! traps {
    ($($(#[$m:meta])* $name:ident = $addr:literal => $sym:literal),+ $(,)?) => {
        /// A host service bound to a reserved address.
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
        pub enum Trap {
            $($(#[$m])* $name),+
        }

        impl Trap {
            /// Every trap, in address order.
            pub const ALL: &'static [Trap] = &[$(Trap::$name),+];

            /// The reserved address of this trap.
            pub fn addr(self) -> u16 {
                match self {
                    $(Trap::$name => $addr),+
                }
            }

            /// The name the assembler predefines for this trap's address.
            pub fn symbol(self) -> &'static str {
                match self {
                    $(Trap::$name => $sym),+
                }
            }

            /// Finds the trap bound to an address, if there is one.
            pub fn from_addr(addr: u16) -> Option<Trap> {
                match addr {
                    $($addr => Some(Trap::$name),)+
                    _ => None
                }
            }
        }
    }
}

traps! {
    /// Ends the run.
    Terminate     = 0xFFE0 => "__terminate",
    /// Prints the message of a `BRK` and ends the run.
    BrkHandler    = 0xFFE1 => "__brk_handler",
    /// Writes the byte in A.
    OutCh         = 0xFFE2 => "__outch",
    /// Writes a NUL-terminated string.
    OutStr        = 0xFFE3 => "__outstr",
    /// Reads a byte, blocking until one is available.
    GetCh         = 0xFFE4 => "__getch",
    /// Reads a byte, with a timeout.
    GetChTimeout  = 0xFFE5 => "__getch_timeout",
    /// Milliseconds since the start of the run.
    ElapsedMs     = 0xFFE6 => "__elapsed_ms",
    /// The time of day.
    WallClock     = 0xFFE7 => "__wallclock",
    /// Cycles since the start of the run (or the last clear).
    Cycles        = 0xFFE8 => "__cycles",
    /// Resets the cycle count.
    ClearCycles   = 0xFFE9 => "__clear_cycles",
    /// Yields to the host.
    ProcessEvents = 0xFFEA => "__process_events",
    /// Opens a host file for reading.
    FOpen         = 0xFFEB => "__fopen",
    /// Closes the open file.
    FClose        = 0xFFEC => "__fclose",
    /// Rewinds the open file.
    FRewind       = 0xFFED => "__frewind",
    /// Reads a byte from the open file.
    FRead         = 0xFFEE => "__fread",
}

impl Trap {
    /// Whether this trap ends the run instead of returning to its caller.
    pub fn is_terminal(self) -> bool {
        matches!(self, Trap::Terminate | Trap::BrkHandler)
    }

    /// Whether this trap may block waiting on the host.
    pub fn is_blocking(self) -> bool {
        matches!(self, Trap::GetCh | Trap::GetChTimeout)
    }
}
impl std::fmt::Display for Trap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_table_is_consistent() {
        let addrs: HashSet<_> = Trap::ALL.iter().map(|t| t.addr()).collect();
        let syms: HashSet<_> = Trap::ALL.iter().map(|t| t.symbol()).collect();
        assert_eq!(addrs.len(), Trap::ALL.len());
        assert_eq!(syms.len(), Trap::ALL.len());

        for &trap in Trap::ALL {
            assert_eq!(Trap::from_addr(trap.addr()), Some(trap));
            assert!(trap.symbol().starts_with("__"));
        }
        assert_eq!(Trap::from_addr(0xFFDF), None);
        assert_eq!(Trap::from_addr(0xFFEF), None);
    }

    #[test]
    fn test_known_bindings() {
        assert_eq!(Trap::Terminate.addr(), 0xFFE0);
        assert_eq!(Trap::OutCh.symbol(), "__outch");
        assert_eq!(Trap::from_addr(0xFFEE), Some(Trap::FRead));
        assert!(Trap::Terminate.is_terminal());
        assert!(!Trap::OutCh.is_terminal());
    }
}
