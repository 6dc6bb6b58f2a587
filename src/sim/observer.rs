//! Module handles change observers,
//! which record what the simulator changed during a run.
//!
//! You would typically access an observer via the [`Simulator::observer`] field.
//! A host polls it after a run (or step) returns to refresh only what changed:
//! - [`ChangeObserver::take_mem_changes`]: the addresses written
//! - [`ChangeObserver::take_regs_changed`]: whether any register changed
//! - [`ChangeObserver::take_invalidated`]: whether changes were not tracked at all
//!   (e.g., during [`RunMode::TurboRun`]), in which case everything should be refreshed
//! - [`ChangeObserver::last_stop`]: why the last run stopped
//!
//! [`Simulator::observer`]: crate::sim::Simulator::observer
//! [`RunMode::TurboRun`]: crate::sim::RunMode::TurboRun

use std::collections::BTreeSet;

use super::StopReason;

/// A struct that tracks changes in simulator state.
///
/// ## Example
///
/// ```
/// use m6502_ensemble::sim::observer::ChangeObserver;
///
/// let mut obs = ChangeObserver::new();
/// obs.record_write(0x0300);
/// obs.record_write(0x0010);
/// obs.record_write(0x0300);
/// assert_eq!(obs.take_mem_changes().collect::<Vec<_>>(), [0x0010, 0x0300]);
/// assert_eq!(obs.take_mem_changes().count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ChangeObserver {
    mem: BTreeSet<u16>,
    regs_changed: bool,
    invalidated: bool,
    last_stop: Option<StopReason>
}
impl ChangeObserver {
    /// Creates a new change observer.
    pub fn new() -> Self {
        Default::default()
    }

    /// Clears all recorded changes (but not the last stop reason).
    pub fn clear(&mut self) {
        self.mem.clear();
        self.regs_changed = false;
        self.invalidated = false;
    }

    /// Records a write to the given memory location.
    pub fn record_write(&mut self, addr: u16) {
        self.mem.insert(addr);
    }

    /// Records that a register changed.
    pub fn record_regs(&mut self) {
        self.regs_changed = true;
    }

    /// Records that changes were not tracked, so all state should be considered changed.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub(super) fn set_last_stop(&mut self, reason: StopReason) {
        self.last_stop = Some(reason);
    }

    /// Takes all memory changes which have occurred since the last clear,
    /// as well as clearing memory changes.
    ///
    /// This iterator is sorted in address order.
    pub fn take_mem_changes(&mut self) -> impl Iterator<Item=u16> {
        std::mem::take(&mut self.mem).into_iter()
    }

    /// Takes whether any register changed since the last clear, resetting the flag.
    pub fn take_regs_changed(&mut self) -> bool {
        std::mem::take(&mut self.regs_changed)
    }

    /// Takes whether changes went untracked since the last clear, resetting the flag.
    pub fn take_invalidated(&mut self) -> bool {
        std::mem::take(&mut self.invalidated)
    }

    /// The reason the last run stopped (if it stopped without error).
    pub fn last_stop(&self) -> Option<&StopReason> {
        self.last_stop.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_flags() {
        let mut obs = ChangeObserver::new();
        assert!(!obs.take_regs_changed());

        obs.record_regs();
        obs.invalidate();
        obs.set_last_stop(StopReason::Step);
        assert!(obs.take_regs_changed());
        assert!(!obs.take_regs_changed());
        assert!(obs.take_invalidated());

        obs.record_write(1);
        obs.clear();
        assert_eq!(obs.take_mem_changes().count(), 0);
        assert_eq!(obs.last_stop(), Some(&StopReason::Step));
    }
}
