//! IO handling for the 6502 simulator.
//!
//! Programs reach the host through traps (see [`super::trap`]), and the simulator
//! forwards character IO to a [`HostIo`] device.
//!
//! Besides that trait, this module also includes:
//! - [`EmptyIo`]: A `HostIo` holding the implementation for a lack of IO support.
//! - [`BufferedIo`]: A `HostIo` holding a buffered implementation for IO.
//! - [`ChannelIo`]: A `HostIo` holding a threaded/channel implementation for IO.
//! - [`StopHandle`]: A handle which can stop a running simulator (and wake any blocked input).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as cbc;

/// The outcome of waiting for a byte of input.
///
/// A blocking read is a race between input arriving, a stop being requested, and (optionally)
/// a timeout expiring. Exactly one of these wins.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InputEvent {
    /// A byte arrived.
    Byte(u8),
    /// The timeout expired before a byte arrived.
    Timeout,
    /// A stop was requested while waiting.
    Cancelled,
    /// No more input will ever arrive.
    Closed,
}

/// An IO device that programs can read from and write to.
pub trait HostIo: Send {
    /// Writes a byte of output.
    fn write_byte(&mut self, byte: u8);

    /// Writes several bytes of output.
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Waits for a byte of input.
    ///
    /// If `timeout` is `None`, this waits until input arrives, the input closes, or a stop is requested.
    /// Implementations must return [`InputEvent::Cancelled`] promptly once `stop` is signalled.
    fn read_byte(&mut self, timeout: Option<Duration>, stop: &StopSignal) -> InputEvent;

    /// Gives the host a chance to handle its events.
    ///
    /// This is called periodically during long runs and by the `__process_events` trap.
    fn process_events(&mut self) {}

    /// Shuts down this IO device, flushing pending output if it can.
    ///
    /// The device must not be used afterwards.
    fn close(&mut self) {}
}
impl dyn HostIo {} // assert HostIo is dyn safe

/// Creates a connected stop handle and stop signal.
pub(super) fn stop_pair() -> (StopHandle, StopSignal) {
    let flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = cbc::bounded(1);
    (
        StopHandle { flag: Arc::clone(&flag), wake: tx },
        StopSignal { flag, wake: rx },
    )
}

/// A handle that requests a running simulator to stop.
///
/// This can be cloned and sent to other threads.
/// Stopping is observed between instructions and immediately by any blocked input.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    wake: cbc::Sender<()>,
}
impl StopHandle {
    /// Requests the simulator to stop.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
        // A full channel already has a pending wake-up.
        let _ = self.wake.try_send(());
    }

    /// Whether a stop has been requested (and not yet handled).
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// The receiving end of a [`StopHandle`].
#[derive(Debug)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    wake: cbc::Receiver<()>,
}
impl StopSignal {
    /// Whether a stop has been requested.
    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// A channel which receives a message when a stop is requested.
    ///
    /// This can be used with [`crossbeam_channel::select`] to race a stop request against input.
    pub fn receiver(&self) -> &cbc::Receiver<()> {
        &self.wake
    }

    /// Waits until a stop is requested or the timeout expires, returning whether a stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.requested() { return true };
        self.wake.recv_timeout(timeout).is_ok() || self.requested()
    }

    /// Clears any pending stop request.
    pub(super) fn clear(&self) {
        self.flag.store(false, Ordering::Relaxed);
        while self.wake.try_recv().is_ok() {}
    }
}

/// No IO. Output is discarded and input is closed.
///
/// Reads with a timeout still wait for the timeout (or a stop).
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyIo;
impl HostIo for EmptyIo {
    fn write_byte(&mut self, _byte: u8) {}

    fn read_byte(&mut self, timeout: Option<Duration>, stop: &StopSignal) -> InputEvent {
        match timeout {
            _ if stop.requested() => InputEvent::Cancelled,
            Some(t) if stop.wait(t) => InputEvent::Cancelled,
            Some(_) => InputEvent::Timeout,
            None => InputEvent::Closed,
        }
    }
}

/// How often a timed [`BufferedIo`] read checks the input queue.
const INPUT_POLL: Duration = Duration::from_millis(1);

/// Host IO backed by two shared buffers: a byte queue for input and a byte vector for output.
///
/// Clones share the same buffers, which are reachable through [`BufferedIo::get_input`]
/// and [`BufferedIo::get_output`].
///
/// A blocking read (no timeout) of an empty queue resolves as [`InputEvent::Closed`],
/// since nothing can refill the queue while the simulator blocks the thread that owns it.
///
/// While a caller holds a guard on either buffer, the simulator cannot reach that buffer.
/// Input reads skip a locked queue, and output writes wait for the lock.
///
/// ```
/// use m6502_ensemble::sim::io::{BufferedIo, HostIo};
///
/// let mut io = BufferedIo::new();
/// io.write_bytes(b"hi");
/// assert_eq!(&*io.get_output().read().unwrap(), b"hi");
/// ```
#[derive(Debug, Clone)]
pub struct BufferedIo {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>
}
impl BufferedIo {
    /// Creates a new BufferedIo.
    pub fn new() -> Self {
        Self { input: Default::default(), output: Default::default() }
    }
    /// Creates a new BufferedIo from already defined buffers.
    pub fn with_bufs(input: Arc<RwLock<VecDeque<u8>>>, output: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { input, output }
    }

    fn try_input(&self) -> Option<RwLockWriteGuard<'_, VecDeque<u8>>> {
        match self.input.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
    fn output_lock(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.output.write().unwrap_or_else(|e| e.into_inner())
    }
    fn pop_input(&self) -> Option<u8> {
        self.try_input()?.pop_front()
    }

    /// The shared input queue.
    pub fn get_input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }
    /// The shared output buffer.
    pub fn get_output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }
}
impl Default for BufferedIo {
    fn default() -> Self {
        Self::new()
    }
}
impl HostIo for BufferedIo {
    fn write_byte(&mut self, byte: u8) {
        self.output_lock().push(byte);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.output_lock().extend_from_slice(bytes);
    }

    fn read_byte(&mut self, timeout: Option<Duration>, stop: &StopSignal) -> InputEvent {
        if stop.requested() { return InputEvent::Cancelled };
        if let Some(b) = self.pop_input() {
            return InputEvent::Byte(b);
        }

        let Some(t) = timeout else { return InputEvent::Closed };

        // Writers to the shared queue don't signal, so poll it until the deadline.
        let deadline = Instant::now() + t;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if stop.wait(remaining.min(INPUT_POLL)) { return InputEvent::Cancelled };
            if let Some(b) = self.pop_input() {
                return InputEvent::Byte(b);
            }
            if remaining <= INPUT_POLL { return InputEvent::Timeout };
        }
    }
}

/// Returned by the reader or writer of a [`ChannelIo`] to end its pump thread.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Stop;

/// Host IO pumped through crossbeam channels by a reader thread and a writer thread.
///
/// Because input arrives over a channel, a blocking read can race it
/// against a stop request or a timeout with [`crossbeam_channel::select`].
pub struct ChannelIo {
    read_data: cbc::Receiver<u8>,
    #[allow(unused)]
    read_handler: JoinHandle<()>,

    write_data: Option<cbc::Sender<u8>>,
    write_handler: Option<JoinHandle<()>>
}
impl ChannelIo {
    /// Spawns the pump threads for a reader and a writer.
    ///
    /// `reader` is called in a loop on its own thread. It blocks until a byte is available
    /// and returns [`Stop`] once input is exhausted. At most one byte waits in the channel,
    /// so the reader keeps polling between runs but never runs far ahead of the program.
    ///
    /// `writer` is called on its own thread for each output byte, in order.
    pub fn new(
        mut reader: impl FnMut() -> Result<u8, Stop> + Send + 'static,
        mut writer: impl FnMut(u8) -> Result<(), Stop> + Send + 'static
    ) -> Self {
        let (read_tx, read_rx) = cbc::bounded(1);
        let (write_tx, write_rx) = cbc::unbounded();

        let read_handler = std::thread::spawn(move || loop {
            let Ok(byte) = reader() else { return };
            let Ok(()) = read_tx.send(byte) else { return };
        });

        let write_handler = std::thread::spawn(move || {
            for byte in write_rx {
                let Ok(()) = writer(byte) else { return };
            }
        });

        Self {
            read_data: read_rx,
            read_handler,
            write_data: Some(write_tx),
            write_handler: Some(write_handler)
        }
    }

    /// Channel IO over the process's stdin and stdout.
    ///
    /// A terminal in line mode only delivers stdin after a newline.
    /// Stdout is flushed after every byte.
    pub fn stdio() -> Self {
        use std::io::{self, BufRead, Write};

        Self::new(
            || {
                let mut stdin = io::stdin().lock();
                let &[byte, ..] = stdin.fill_buf().map_err(|_| Stop)? else {
                    // end of input
                    return Err(Stop);
                };

                stdin.consume(1);
                Ok(byte)
            },
            |byte| {
                let mut stdout = io::stdout().lock();
                stdout.write_all(&[byte]).map_err(|_| Stop)?;
                stdout.flush().map_err(|_| Stop)
            }
        )
    }
}
impl std::fmt::Debug for ChannelIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelIo")
            .field("pending_input", &self.read_data.len())
            .field("closed", &self.write_data.is_none())
            .finish_non_exhaustive()
    }
}
impl HostIo for ChannelIo {
    fn write_byte(&mut self, byte: u8) {
        if let Some(tx) = &self.write_data {
            // A disconnected writer has nowhere to send output.
            let _ = tx.send(byte);
        }
    }

    fn read_byte(&mut self, timeout: Option<Duration>, stop: &StopSignal) -> InputEvent {
        if stop.requested() { return InputEvent::Cancelled };

        let on_recv = |r: Result<u8, cbc::RecvError>| match r {
            Ok(b) => InputEvent::Byte(b),
            Err(_) => InputEvent::Closed,
        };

        match timeout {
            Some(t) => cbc::select! {
                recv(self.read_data) -> r => on_recv(r),
                recv(stop.receiver()) -> _ => InputEvent::Cancelled,
                default(t) => InputEvent::Timeout,
            },
            None => cbc::select! {
                recv(self.read_data) -> r => on_recv(r),
                recv(stop.receiver()) -> _ => InputEvent::Cancelled,
            },
        }
    }

    fn close(&mut self) {
        // The writer thread drains the remaining output once its sender is dropped.
        std::mem::drop(self.write_data.take());

        // The reader thread is left detached, as it may be blocked in the reader.
        if let Some(handle) = self.write_handler.take() {
            let _ = handle.join();
        }
    }
}
impl Drop for ChannelIo {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_io() {
        let (_handle, stop) = stop_pair();
        let mut io = BufferedIo::new();
        io.get_input().write().unwrap().extend(b"ab");

        assert_eq!(io.read_byte(None, &stop), InputEvent::Byte(b'a'));
        assert_eq!(io.read_byte(Some(Duration::from_millis(1)), &stop), InputEvent::Byte(b'b'));
        assert_eq!(io.read_byte(Some(Duration::from_millis(1)), &stop), InputEvent::Timeout);
        assert_eq!(io.read_byte(None, &stop), InputEvent::Closed);

        io.write_byte(b'x');
        io.clone().write_bytes(b"yz");
        assert_eq!(&*io.get_output().read().unwrap(), b"xyz");

        // input pushed during a timed read is returned without waiting out the timeout
        let input = Arc::clone(io.get_input());
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            input.write().unwrap().push_back(b'c');
        });
        let start = Instant::now();
        assert_eq!(io.read_byte(Some(Duration::from_secs(10)), &stop), InputEvent::Byte(b'c'));
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().unwrap();
    }

    #[test]
    fn test_stop_wakes_reads() {
        let (handle, stop) = stop_pair();
        let mut io = EmptyIo;

        handle.stop();
        assert!(handle.is_stop_requested());
        assert_eq!(io.read_byte(Some(Duration::from_secs(10)), &stop), InputEvent::Cancelled);

        stop.clear();
        assert!(!stop.requested());
        assert_eq!(io.read_byte(Some(Duration::from_millis(1)), &stop), InputEvent::Timeout);
        assert_eq!(io.read_byte(None, &stop), InputEvent::Closed);
    }

    #[test]
    fn test_channel_io() {
        let (handle, stop) = stop_pair();
        let (out_tx, out_rx) = cbc::unbounded();

        let mut input = b"hi".to_vec().into_iter();
        let mut io = ChannelIo::new(
            move || input.next().ok_or(Stop),
            move |b| out_tx.send(b).map_err(|_| Stop),
        );

        assert_eq!(io.read_byte(None, &stop), InputEvent::Byte(b'h'));
        assert_eq!(io.read_byte(None, &stop), InputEvent::Byte(b'i'));
        // the reader thread has exited, so input is closed
        assert_eq!(io.read_byte(None, &stop), InputEvent::Closed);

        io.write_bytes(b"ok");
        io.close();
        assert_eq!(out_rx.try_iter().collect::<Vec<_>>(), b"ok");

        // a blocked read is woken by a stop from another thread
        let mut io = ChannelIo::new(|| {
            std::thread::sleep(Duration::from_secs(60));
            Err(Stop)
        }, |_| Ok(()));
        let start = Instant::now();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.stop();
        });
        assert_eq!(io.read_byte(None, &stop), InputEvent::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(30));
        t.join().unwrap();
    }
}
