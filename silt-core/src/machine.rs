//! The machine: shared bus, hart registry, CLINT regions, and the IRQ/timer thread.

use crate::hart::timer::{Clock, Timer};
use crate::hart::trap::Interrupt;
use crate::hart::{Config as HartConfig, Hart, HartSignals};
use crate::memory::{PhysMemory, PhysMemoryError};
use crate::registers::Specifier;
use crate::system_bus::{AccessOp, BusError, Device, SystemBus};
use crate::AddressRange;
use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on the number of harts a machine can carry.
pub const MAX_HARTS: usize = 256;

/// Period of the IRQ/timer thread.
const IRQ_THREAD_PERIOD: Duration = Duration::from_millis(10);

// Offsets of the CLINT registers within one hart's CLINT region.
const CLINT_MSIP: u32 = 0x0;
const CLINT_MTIMECMP: u32 = 0x4000;
const CLINT_MTIME: u32 = 0xBFF8;

#[derive(Debug, Clone)]
pub struct Config {
    /// Guest physical base of RAM. The default (`0x8000_0000`) matches the common RISC-V
    /// memory layout.
    pub ram_base: u32,
    /// RAM size in bytes.
    pub ram_size: usize,
    /// Number of harts; hart IDs are assigned contiguously from zero.
    pub hart_count: usize,
    /// Address all harts start executing at. Defaults to the RAM base.
    pub reset_vector: u32,
    /// Guest physical base of the per-hart CLINT regions: hart `i`'s region starts at
    /// `clint_base + i * clint_len`.
    pub clint_base: u32,
    /// Size of one hart's CLINT region.
    pub clint_len: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ram_base: 0x8000_0000,
            ram_size: 64 << 20,
            hart_count: 1,
            reset_vector: 0x8000_0000,
            clint_base: 0x0200_0000,
            clint_len: 0x1_0000,
        }
    }
}

/// One hart's entry in the machine registry: everything the IRQ thread needs to reach it.
#[derive(Debug, Clone)]
struct RegistryEntry {
    signals: Arc<HartSignals>,
    timer: Arc<Timer>,
}

/// Fixed-size hart registry, indexed by hart ID.
///
/// One mutex guards registration, deregistration, and IRQ-thread iteration; the hot paths of
/// running harts never touch it.
#[derive(Debug)]
struct Registry {
    slots: Mutex<Vec<Option<RegistryEntry>>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None; MAX_HARTS]),
        }
    }

    fn register(&self, hart_id: usize, entry: RegistryEntry) -> Result<(), MachineError> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .get_mut(hart_id)
            .ok_or(MachineError::TooManyHarts(hart_id + 1))?;
        if slot.is_some() {
            return Err(MachineError::DuplicateHartId(hart_id));
        }
        *slot = Some(entry);
        Ok(())
    }

    fn deregister(&self, hart_id: usize) {
        if let Some(slot) = self.slots.lock().unwrap().get_mut(hart_id) {
            *slot = None;
        }
    }

    /// Run `f` for every registered hart, under the registry lock.
    fn for_each(&self, mut f: impl FnMut(&RegistryEntry)) {
        for entry in self.slots.lock().unwrap().iter().flatten() {
            f(entry);
        }
    }

    fn wake_all(&self) {
        self.for_each(|entry| entry.signals.wake());
    }
}

/// One hart's core-local interruptor: the msip, mtimecmp, and mtime registers.
///
/// msip drives the hart's software-interrupt line; mtimecmp programs the hart's timer. mtime
/// reads the shared clock and ignores writes (the clock is free-running).
#[derive(Debug)]
struct Clint {
    timer: Arc<Timer>,
    signals: Arc<HartSignals>,
    msip_line: Arc<AtomicBool>,
}

impl Device for Clint {
    fn access(&self, offset: u32, buf: &mut [u8], op: AccessOp) -> bool {
        match op {
            AccessOp::Read => self.read(offset, buf),
            AccessOp::Write => self.write(offset, buf),
        }
    }
}

impl Clint {
    fn read(&self, offset: u32, buf: &mut [u8]) -> bool {
        let value: u64 = match offset {
            CLINT_MSIP => self.msip_line.load(Ordering::Acquire) as u64,
            CLINT_MTIMECMP => self.timer.mtimecmp(),
            o if o == CLINT_MTIMECMP + 4 => self.timer.mtimecmp() >> 32,
            CLINT_MTIME => self.timer.mtime(),
            o if o == CLINT_MTIME + 4 => self.timer.mtime() >> 32,
            _ => return false,
        };
        match buf.len() {
            4 => buf.copy_from_slice(&(value as u32).to_le_bytes()),
            8 => buf.copy_from_slice(&value.to_le_bytes()),
            _ => return false,
        }
        true
    }

    fn write(&self, offset: u32, buf: &mut [u8]) -> bool {
        let value = match buf.len() {
            4 => u64::from(u32::from_le_bytes(buf[..4].try_into().unwrap())),
            8 => u64::from_le_bytes(buf[..8].try_into().unwrap()),
            _ => return false,
        };
        match (offset, buf.len()) {
            (CLINT_MSIP, 4) => {
                trace!("msip <- {value:#x}");
                self.msip_line.store(value & 1 != 0, Ordering::Release);
            }
            (CLINT_MTIMECMP, 4) => self.timer.set_mtimecmp_low(value as u32),
            (o, 4) if o == CLINT_MTIMECMP + 4 => self.timer.set_mtimecmp_high(value as u32),
            (CLINT_MTIMECMP, 8) => self.timer.set_mtimecmp(value),
            // mtime is backed by the free-running clock; writes are accepted and dropped.
            (CLINT_MTIME, 4 | 8) => debug!("Ignoring write to mtime"),
            (o, 4) if o == CLINT_MTIME + 4 => debug!("Ignoring write to mtime"),
            _ => return false,
        }
        // The write may have raised or cleared an interrupt condition; have the hart take a
        // fresh look at its lines.
        self.signals.wake();
        true
    }
}

/// A complete virtual machine: RAM and devices on a shared bus, plus one or more harts.
///
/// The machine owns the hart registry (there is deliberately no process-global state); hart
/// threads and the IRQ thread borrow it through an `Arc` for the machine's lifetime.
#[derive(Debug)]
pub struct Machine {
    config: Config,
    bus: Arc<SystemBus>,
    clock: Arc<Clock>,
    registry: Arc<Registry>,
    harts: Vec<Hart>,
}

impl Machine {
    /// Build a machine: allocate RAM, create the harts, and install their CLINT regions.
    ///
    /// The machine timer follows host time; use [`with_clock`](Self::with_clock) to run guest
    /// time off a [`Clock::manual`] instead.
    pub fn new(config: Config) -> Result<Self, MachineError> {
        Self::with_clock(config, Arc::new(Clock::new()))
    }

    /// Build a machine whose hart timers read the given clock.
    pub fn with_clock(config: Config, clock: Arc<Clock>) -> Result<Self, MachineError> {
        if config.hart_count == 0 || config.hart_count > MAX_HARTS {
            return Err(MachineError::TooManyHarts(config.hart_count));
        }
        let ram = PhysMemory::new(config.ram_base, config.ram_size)?;
        let bus = Arc::new(SystemBus::new(ram));
        let registry = Arc::new(Registry::new());
        let mut harts = Vec::with_capacity(config.hart_count);
        for hart_id in 0..config.hart_count {
            let timer = Arc::new(Timer::new(Arc::clone(&clock)));
            let hart = Hart::new(
                HartConfig {
                    hart_id: hart_id as u32,
                    reset_vector: config.reset_vector,
                },
                Arc::clone(&bus),
                Arc::clone(&timer),
            );
            registry.register(
                hart_id,
                RegistryEntry {
                    signals: hart.signals(),
                    timer: Arc::clone(&timer),
                },
            )?;
            let clint_start = (hart_id as u32)
                .checked_mul(config.clint_len)
                .and_then(|offset| config.clint_base.checked_add(offset))
                .ok_or(MachineError::InvalidClintLayout)?;
            let clint_end = config
                .clint_len
                .checked_sub(1)
                .and_then(|delta| clint_start.checked_add(delta))
                .ok_or(MachineError::InvalidClintLayout)?;
            let clint_range = AddressRange::new(clint_start, clint_end)
                .map_err(|_| MachineError::InvalidClintLayout)?;
            bus.add_device(
                clint_range,
                Arc::new(Clint {
                    timer,
                    signals: hart.signals(),
                    msip_line: hart.msip_line(),
                }),
            )?;
            harts.push(hart);
        }
        Ok(Self {
            config,
            bus,
            clock,
            registry,
            harts,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<SystemBus> {
        &self.bus
    }

    /// The shared 10 MHz clock all hart timers read.
    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    /// Access to the harts while the machine is not running, e.g. to seed boot registers or to
    /// single-step in tests.
    pub fn harts_mut(&mut self) -> &mut [Hart] {
        &mut self.harts
    }

    /// Copy a pre-built boot image into RAM at `address`.
    pub fn load_image(&self, address: u32, image: &[u8]) -> Result<(), MachineError> {
        match self.bus.ram().write(address, image) {
            true => Ok(()),
            false => Err(MachineError::ImageOutOfRange {
                address,
                size: image.len(),
            }),
        }
    }

    /// Seed the boot register convention: `a0` holds the hart ID, `a1` the device-tree address.
    pub fn set_boot_args(&mut self, dtb_address: u32) {
        let a0 = Specifier::new(10u8).unwrap();
        let a1 = Specifier::new(11u8).unwrap();
        for hart in &mut self.harts {
            let hart_id = hart.hart_id();
            let registers = hart.registers_mut();
            registers.set_x(a0, hart_id);
            registers.set_x(a1, dtb_address);
        }
    }

    /// Start executing: one thread per hart plus the IRQ/timer thread.
    ///
    /// `tick_callback`, when given, is pumped from the IRQ thread every period; hosts hang
    /// their UI/framebuffer refresh off it.
    pub fn start(self, tick_callback: Option<Box<dyn FnMut() + Send>>) -> MachineHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let hart_threads: Vec<JoinHandle<Hart>> = self
            .harts
            .into_iter()
            .map(|mut hart| {
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name(format!("hart{}", hart.hart_id()))
                    .spawn(move || {
                        hart.run(&stop);
                        hart
                    })
                    .expect("failed to spawn hart thread")
            })
            .collect();
        let irq_thread = {
            let stop = Arc::clone(&stop);
            let registry = Arc::clone(&self.registry);
            let mut tick_callback = tick_callback;
            thread::Builder::new()
                .name("irq".into())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        registry.for_each(|entry| {
                            // Post the timer interrupt only when the timer really is pending;
                            // the hart reconciles MTIP against the same predicate.
                            if entry.timer.is_pending() {
                                entry.signals.raise(Interrupt::MachineTimer.mask());
                            }
                        });
                        if let Some(callback) = tick_callback.as_mut() {
                            callback();
                        }
                        thread::sleep(IRQ_THREAD_PERIOD);
                    }
                })
                .expect("failed to spawn irq thread")
        };
        MachineHandle {
            config: self.config,
            bus: self.bus,
            clock: self.clock,
            registry: self.registry,
            stop,
            hart_threads,
            irq_thread,
        }
    }
}

/// Handle to a running machine.
pub struct MachineHandle {
    config: Config,
    bus: Arc<SystemBus>,
    clock: Arc<Clock>,
    registry: Arc<Registry>,
    stop: Arc<AtomicBool>,
    hart_threads: Vec<JoinHandle<Hart>>,
    irq_thread: JoinHandle<()>,
}

impl MachineHandle {
    pub fn bus(&self) -> &Arc<SystemBus> {
        &self.bus
    }

    /// Stop all harts and the IRQ thread, deregister the harts, and hand back the stopped
    /// machine with its final hart state.
    pub fn stop(self) -> Machine {
        self.stop.store(true, Ordering::Release);
        self.registry.wake_all();
        let harts: Vec<Hart> = self
            .hart_threads
            .into_iter()
            .map(|handle| handle.join().expect("hart thread panicked"))
            .collect();
        self.irq_thread.join().expect("irq thread panicked");
        for hart in &harts {
            self.registry.deregister(hart.hart_id() as usize);
        }
        Machine {
            config: self.config,
            bus: self.bus,
            clock: self.clock,
            registry: self.registry,
            harts,
        }
    }
}

#[derive(Error, Debug)]
pub enum MachineError {
    #[error(transparent)]
    Memory(#[from] PhysMemoryError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("hart count {0} is outside the supported range 1..={MAX_HARTS}")]
    TooManyHarts(usize),
    #[error("hart id {0} is already registered")]
    DuplicateHartId(usize),
    #[error("CLINT regions do not fit in the 32-bit physical address space")]
    InvalidClintLayout,
    #[error("boot image ({size:#x} bytes at {address:#010x}) does not fit in RAM")]
    ImageOutOfRange { address: u32, size: usize },
}
