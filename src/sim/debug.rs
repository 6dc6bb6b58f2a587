//! Utilities to debug simulation.
//!
//! The key type here is [`BreakpointSet`], held in the [`Simulator`]'s `breakpoints` field.
//! A run stops after executing an instruction if the PC lands on one of its addresses
//! (except during [`RunMode::TurboRun`]).
//!
//! Breakpoints come from two places:
//! - `.break` directives in source, merged in by [`Simulator::load_assembly`]
//! - the host, usually by mapping a source line to an address with
//!   [`Assembly::address_of_line`] and calling [`Simulator::toggle_breakpoint`]
//!
//! [`Simulator`]: super::Simulator
//! [`Simulator::load_assembly`]: super::Simulator::load_assembly
//! [`Simulator::toggle_breakpoint`]: super::Simulator::toggle_breakpoint
//! [`RunMode::TurboRun`]: super::RunMode::TurboRun
//! [`Assembly::address_of_line`]: crate::asm::Assembly::address_of_line

use std::collections::BTreeSet;

/// A set of PC breakpoints.
///
/// ## Example
///
/// ```
/// use m6502_ensemble::sim::debug::BreakpointSet;
///
/// let mut bps = BreakpointSet::new();
/// assert!(bps.toggle(0x0204));
/// assert!(bps.contains(0x0204));
/// assert!(!bps.toggle(0x0204));
/// assert!(bps.is_empty());
/// ```
#[derive(Default, Clone, PartialEq, Eq)]
pub struct BreakpointSet(BTreeSet<u16>);

impl BreakpointSet where BreakpointSet: Send + Sync { /* assert BreakpointSet is send/sync */ }

impl BreakpointSet {
    /// Creates an empty breakpoint set.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a breakpoint, returning whether it was newly added.
    pub fn insert(&mut self, addr: u16) -> bool {
        self.0.insert(addr)
    }

    /// Removes a breakpoint, returning whether it was present.
    pub fn remove(&mut self, addr: u16) -> bool {
        self.0.remove(&addr)
    }

    /// Toggles a breakpoint, returning whether it is now set.
    pub fn toggle(&mut self, addr: u16) -> bool {
        match self.0.remove(&addr) {
            true  => false,
            false => self.0.insert(addr),
        }
    }

    /// Checks whether there is a breakpoint at this address.
    pub fn contains(&self, addr: u16) -> bool {
        self.0.contains(&addr)
    }

    /// Iterates over the breakpoints in address order.
    pub fn iter(&self) -> impl Iterator<Item=u16> + '_ {
        self.0.iter().copied()
    }

    /// Removes every breakpoint.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// The number of breakpoints.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no breakpoints.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl Extend<u16> for BreakpointSet {
    fn extend<T: IntoIterator<Item = u16>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}
impl FromIterator<u16> for BreakpointSet {
    fn from_iter<T: IntoIterator<Item = u16>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
impl std::fmt::Debug for BreakpointSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct Addr(u16);
        impl std::fmt::Debug for Addr {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "${:04X}", self.0)
            }
        }

        f.write_str("Breakpoints")?;
        f.debug_set()
            .entries(self.iter().map(Addr))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::BreakpointSet;

    #[test]
    fn test_breakpoint_set() {
        let mut bps: BreakpointSet = [0x0300, 0x0200].into_iter().collect();
        assert_eq!(bps.len(), 2);
        assert_eq!(bps.iter().collect::<Vec<_>>(), [0x0200, 0x0300]);

        assert!(!bps.insert(0x0200));
        assert!(bps.remove(0x0300));
        assert!(!bps.remove(0x0300));
        assert!(bps.toggle(0x0210));
        assert_eq!(format!("{bps:?}"), "Breakpoints{$0200, $0210}");

        bps.clear();
        assert!(bps.is_empty());
    }
}
