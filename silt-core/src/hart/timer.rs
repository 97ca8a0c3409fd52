//! The machine timer: a shared monotonic clock plus a per-hart compare register.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Rate at which `mtime` advances: 10 MHz, i.e. one tick per 100 ns of wall-clock time.
pub const TIMER_FREQ_HZ: u64 = 10_000_000;

/// Monotonic 10 MHz counter shared by all harts of a machine.
///
/// All harts of a machine read the same clock, so their `time` CSR views stay synchronized.
/// The default clock follows host time; [`manual`](Self::manual) yields one that only moves
/// when the host [`advance`](Self::advance)s it, for hosts that need full control over guest
/// time.
#[derive(Debug)]
pub struct Clock {
    source: ClockSource,
}

#[derive(Debug)]
enum ClockSource {
    /// Ticks derived from the host's monotonic clock.
    Monotonic(Instant),
    /// Ticks advanced explicitly by the host, starting at zero.
    Manual(AtomicU64),
}

impl Clock {
    /// A clock that follows host wall-clock time at [`TIMER_FREQ_HZ`].
    pub fn new() -> Self {
        Self {
            source: ClockSource::Monotonic(Instant::now()),
        }
    }

    /// A clock that starts at zero and only moves when [`advance`](Self::advance) is called.
    pub fn manual() -> Self {
        Self {
            source: ClockSource::Manual(AtomicU64::new(0)),
        }
    }

    /// The current `mtime` value: ticks elapsed since the machine was created.
    pub fn now(&self) -> u64 {
        match &self.source {
            ClockSource::Monotonic(start) => {
                let nanos = start.elapsed().as_nanos();
                (nanos / (1_000_000_000 / TIMER_FREQ_HZ as u128)) as u64
            }
            ClockSource::Manual(ticks) => ticks.load(Ordering::Acquire),
        }
    }

    /// Advance a [`manual`](Self::manual) clock by `ticks`. A monotonic clock is driven by
    /// host time alone; advancing it has no effect.
    pub fn advance(&self, ticks: u64) {
        if let ClockSource::Manual(current) = &self.source {
            current.fetch_add(ticks, Ordering::AcqRel);
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// One hart's timer: the shared clock plus its `mtimecmp` register.
///
/// `mtimecmp` is written from the owning hart's thread (through the CLINT region) and read from
/// the IRQ thread, hence the atomic. It resets to all-ones so no timer interrupt fires before
/// the guest programs a deadline.
#[derive(Debug)]
pub struct Timer {
    clock: Arc<Clock>,
    mtimecmp: AtomicU64,
}

impl Timer {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            mtimecmp: AtomicU64::new(u64::MAX),
        }
    }

    /// The current value of the memory-mapped `mtime` register.
    pub fn mtime(&self) -> u64 {
        self.clock.now()
    }

    pub fn mtimecmp(&self) -> u64 {
        self.mtimecmp.load(Ordering::Acquire)
    }

    pub fn set_mtimecmp(&self, value: u64) {
        self.mtimecmp.store(value, Ordering::Release);
    }

    /// Replace only the low half of `mtimecmp` (32-bit guests write the halves separately).
    pub fn set_mtimecmp_low(&self, value: u32) {
        let old = self.mtimecmp.load(Ordering::Acquire);
        self.set_mtimecmp(old & 0xFFFF_FFFF_0000_0000 | u64::from(value));
    }

    /// Replace only the high half of `mtimecmp`.
    pub fn set_mtimecmp_high(&self, value: u32) {
        let old = self.mtimecmp.load(Ordering::Acquire);
        self.set_mtimecmp(old & 0xFFFF_FFFF | u64::from(value) << 32);
    }

    /// The timer-interrupt pending predicate: `mtime >= mtimecmp`.
    pub fn is_pending(&self) -> bool {
        self.mtime() >= self.mtimecmp()
    }
}
