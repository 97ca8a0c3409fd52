//! A single RISC-V hart: registers, CSRs, TLB, timer, and the execution loop.

pub mod csr;
pub mod counters;
mod execute;
pub mod interrupts;
pub mod mmu;
pub mod status;
pub mod timer;
pub mod trap;

use crate::instruction::{self, Instruction};
use crate::registers::Registers;
use crate::system_bus::SystemBus;
use crate::{PrivilegeLevel, RawPrivilegeLevel};
use counters::{CounterEnable, Counters, COUNTER_CY, COUNTER_IR, COUNTER_TM};
use execute::Executor;
use interrupts::Interrupts;
use log::{debug, trace};
use mmu::{MemoryError, Satp, Tlb};
use status::Status;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;
use timer::Timer;
use trap::{Exception, TrapCause};

pub use csr::CsrSpecifier;

/// Result of executing a single instruction. [`Ok`] if execution went normal, [`Err`] if an
/// exception occurred.
pub type ExecutionResult<T = ()> = Result<T, Exception>;

/// Number of instructions a hart executes before it re-checks its external signals.
const EXECUTION_BATCH: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// > The mhartid CSR is an MXLEN-bit read-only register containing the integer ID of the
    /// > hardware thread running the code. [...] Hart IDs must be unique within the execution
    /// > environment.
    pub hart_id: u32,
    /// Address to which the hart's PC register is reset.
    pub reset_vector: u32,
}

/// Cross-thread mailbox of one hart.
///
/// All communication *towards* a running hart goes through this: external agents OR interrupt
/// bits into `pending` and wake the hart; the owning hart is the only one that drains the mask.
/// A lost race on `pending` delays an interrupt by at most one execution batch, it can never
/// corrupt state.
#[derive(Debug)]
pub struct HartSignals {
    /// `true` while the hart is happy to keep executing; cleared (release) by anyone who needs
    /// the hart to look at its mailbox. The hart reads it with acquire ordering so writes to
    /// `pending` made before the clear are visible after it.
    wait: AtomicBool,
    /// OR-accumulated interrupt bits in `mip` layout, drained only by the owning hart.
    pending: AtomicU32,
    park: Mutex<()>,
    cond: Condvar,
}

impl HartSignals {
    pub fn new() -> Self {
        Self {
            wait: AtomicBool::new(false),
            pending: AtomicU32::new(0),
            park: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Post interrupt bits (in `mip` layout) to the hart and wake it.
    pub fn raise(&self, bits: u32) {
        self.pending.fetch_or(bits, Ordering::Release);
        self.wake();
    }

    /// Wake the hart without posting an interrupt (used for stop requests).
    pub fn wake(&self) {
        self.wait.store(false, Ordering::Release);
        let _guard = self.park.lock().unwrap();
        self.cond.notify_all();
    }

    fn drain(&self) -> u32 {
        self.pending.swap(0, Ordering::Acquire)
    }

    fn publish_executing(&self) {
        self.wait.store(true, Ordering::Release);
    }

    fn was_woken(&self) -> bool {
        !self.wait.load(Ordering::Acquire)
    }

    /// Block until woken or until `timeout` elapses. The hart re-checks its interrupt state on
    /// every return, so a spurious wakeup only costs a poll.
    fn park(&self, timeout: Duration) {
        let guard = self.park.lock().unwrap();
        if self.was_woken() {
            return;
        }
        let _ = self.cond.wait_timeout(guard, timeout).unwrap();
    }
}

impl Default for HartSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// A single RISC-V hart implementing RV32IMAC with M/S/U privilege levels.
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment.
///
/// All architectural state is owned exclusively by the hart (and hence by the thread running
/// it); the only cross-thread surfaces are the [`HartSignals`] mailbox, the shared
/// [`SystemBus`], and the timer's compare register.
#[derive(Debug)]
pub struct Hart {
    /// Configuration options for this hart. See [`Config`].
    config: Config,
    /// The shared bus via which physical memory and devices are accessed.
    bus: Arc<SystemBus>,
    /// General purpose registers: x and pc registers.
    registers: Registers,
    /// The hart's current privilege mode.
    privilege_mode: PrivilegeLevel,
    /// Status (mstatus/sstatus) register.
    status: Status,
    /// Trap-handling registers for M- and S-mode.
    trap: trap::TrapRegs,
    /// Interrupt pending/enable/delegation state.
    interrupts: Interrupts,
    /// Cycle and instructions-retired counters.
    counters: Counters,
    /// The mcounteren/scounteren registers.
    counteren: CounterEnable,
    /// Address-translation control.
    satp: Satp,
    /// Cached virtual-to-physical translations.
    tlb: Tlb,
    /// This hart's timer (shared clock + mtimecmp).
    timer: Arc<Timer>,
    /// Mailbox external agents use to reach this hart.
    signals: Arc<HartSignals>,
    /// Level of this hart's software-interrupt line (the CLINT msip register).
    msip_line: Arc<AtomicBool>,
    /// Physical word address reserved by LR, if any.
    reservation: Option<u32>,
    /// Set when a WFI has been executed and no interrupt has arrived yet.
    waiting: bool,
}

impl Hart {
    /// The misa CSR value: MXL=32, extensions I, M, A, C, plus S and U modes.
    pub const MISA: u32 = 0x4014_1105;
    /// The mvendorid CSR is 0 to indicate this is a non-commercial implementation.
    pub const MVENDORID: u32 = 0;
    /// The marchid CSR is 0 to indicate it is not implemented.
    pub const MARCHID: u32 = 0;
    /// The mimpid CSR is 0 to indicate it is not implemented.
    pub const MIMPID: u32 = 0;
    /// The mconfigptr CSR is 0 to indicate no configuration data structure exists.
    pub const MCONFIGPTR: u32 = 0;

    /// Create a hart in its reset state: all registers zero, PC at the reset vector, M-mode.
    pub fn new(config: Config, bus: Arc<SystemBus>, timer: Arc<Timer>) -> Self {
        let registers = Registers::new(config.reset_vector);
        Self {
            config,
            bus,
            registers,
            privilege_mode: PrivilegeLevel::Machine,
            status: Status::new(),
            trap: trap::TrapRegs::new(),
            interrupts: Interrupts::new(),
            counters: Counters::new(),
            counteren: CounterEnable::new(),
            satp: Satp::new(),
            tlb: Tlb::new(),
            timer,
            signals: Arc::new(HartSignals::new()),
            msip_line: Arc::new(AtomicBool::new(false)),
            reservation: None,
            waiting: false,
        }
    }

    /// Returns the Hart ID that was assigned to this hart.
    pub fn hart_id(&self) -> u32 {
        self.config.hart_id
    }

    pub fn bus(&self) -> &Arc<SystemBus> {
        &self.bus
    }

    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    /// The mailbox other threads use to interrupt or wake this hart.
    pub fn signals(&self) -> Arc<HartSignals> {
        Arc::clone(&self.signals)
    }

    /// The level of this hart's software-interrupt line, written by its CLINT region.
    pub fn msip_line(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.msip_line)
    }

    /// Returns the current privilege mode.
    ///
    /// Note that loads and stores execute at the
    /// [`effective_privilege_mode`](Self::effective_privilege_mode).
    pub fn privilege_mode(&self) -> PrivilegeLevel {
        self.privilege_mode
    }

    /// Returns the current *effective privilege mode*, the privilege level at which loads and
    /// stores execute (but not instruction fetches): the MPP level while mstatus.MPRV is set.
    pub fn effective_privilege_mode(&self) -> PrivilegeLevel {
        match self.status.mprv() {
            true => self.status.mpp(),
            false => self.privilege_mode,
        }
    }

    /// Provides immutable access to the general purpose (x) registers, and the pc register.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Provides mutable access to the general purpose (x) registers, and the pc register.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// Returns `true` if the hart is parked in a WFI.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Fetch the instruction at pc, execute it, and deliver the trap if one is raised.
    pub fn step(&mut self) {
        let result = self.try_step();
        self.counters.increment_cycle();
        match result {
            Ok(retired) => {
                if retired {
                    self.counters.increment_instret();
                }
            }
            Err(exception) => {
                // Any trap breaks an LR reservation.
                self.reservation = None;
                self.trap(exception.into());
            }
        }
    }

    fn try_step(&mut self) -> Result<bool, Exception> {
        let pc = self.registers.pc();
        let (instruction, length) = self.fetch_and_decode(pc)?;
        // ECALL and EBREAK are not considered to retire. Similarly, a failed fetch or a raised
        // exception does not count as retirement.
        let retires = !matches!(instruction, Instruction::Ecall | Instruction::Ebreak);
        self.execute_instruction(instruction, length)?;
        Ok(retires)
    }

    /// "Independent instruction fetch unit"
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit little-endian parcels,
    /// > regardless of memory system endianness.
    ///
    /// A parcel whose low two bits are not `0b11` is a complete compressed instruction;
    /// otherwise the next parcel holds the upper half of a 32-bit instruction.
    fn fetch_and_decode(&mut self, pc: u32) -> Result<(Instruction, u32), Exception> {
        let low = self
            .fetch_parcel(pc)
            .map_err(|err| Self::fetch_error(err, pc))?;
        if instruction::is_compressed(low) {
            let instruction = Instruction::decode_compressed(low)
                .map_err(|_| Exception::IllegalInstruction(Some(u32::from(low))))?;
            Ok((instruction, 2))
        } else {
            let upper_address = pc.wrapping_add(2);
            let high = self
                .fetch_parcel(upper_address)
                .map_err(|err| Self::fetch_error(err, upper_address))?;
            let raw = u32::from(high) << 16 | u32::from(low);
            let instruction = Instruction::decode(raw)
                .map_err(|_| Exception::IllegalInstruction(Some(raw)))?;
            Ok((instruction, 4))
        }
    }

    fn fetch_error(err: MemoryError, address: u32) -> Exception {
        match err {
            MemoryError::MisalignedAccess => Exception::InstructionAddressMisaligned(address),
            MemoryError::AccessFault => Exception::InstructionAccessFault(address),
            MemoryError::PageFault => Exception::InstructionPageFault(address),
        }
    }

    /// Execute a single decoded instruction of encoded length `length` bytes.
    ///
    /// This only performs the instruction-specific operations; counter updates and trap
    /// delivery happen in [`step`](Self::step).
    pub fn execute_instruction(
        &mut self,
        instruction: Instruction,
        length: u32,
    ) -> ExecutionResult {
        Executor { hart: self, length }.execute(instruction)
    }

    /// Deliver a trap: pick the target privilege per the delegation registers, save the trap
    /// state, and redirect pc to the trap vector.
    pub(crate) fn trap(&mut self, cause: TrapCause) {
        let pc = self.registers.pc();
        debug!(
            cause = cause.cause(), pc;
            "Taking trap from {}", self.privilege_mode
        );
        // Determine if we should be delegating. Note that `delegate == true` does not
        // necessarily mean the trap will be handled in S-mode, since traps that occur while
        // running in M-mode are always handled in M-mode.
        let delegate = match cause {
            TrapCause::Exception(exception) => self.trap.should_delegate(exception),
            TrapCause::Interrupt(interrupt) => self.interrupts.should_delegate(interrupt),
        };
        let trap_to_s_mode = match (self.privilege_mode, delegate) {
            (PrivilegeLevel::Machine, _) | (_, false) => false,
            (_, true) => true,
        };
        let tval = match cause {
            TrapCause::Exception(exception) => exception.tval(pc),
            TrapCause::Interrupt(_) => 0,
        };
        // Save cause, epc, and tval into the target level's registers, and pick the vector.
        let handler_address = match trap_to_s_mode {
            true => {
                self.trap.write_scause(cause.cause(), 0xFFFF_FFFF);
                self.trap.write_sepc(pc, 0xFFFF_FFFF);
                self.trap.write_stval(tval, 0xFFFF_FFFF);
                self.trap.stvec.trap_handler_address(&cause)
            }
            false => {
                self.trap.write_mcause(cause.cause(), 0xFFFF_FFFF);
                self.trap.write_mepc(pc, 0xFFFF_FFFF);
                self.trap.write_mtval(tval, 0xFFFF_FFFF);
                self.trap.mtvec.trap_handler_address(&cause)
            }
        };
        *self.registers.pc_mut() = handler_address;
        // Save the interrupt-enable stack and the previous privilege.
        match trap_to_s_mode {
            true => {
                self.status.set_spie(self.status.sie());
                self.status.set_sie(false);
                self.status.set_spp(self.privilege_mode.into());
                self.privilege_mode = PrivilegeLevel::Supervisor;
            }
            false => {
                self.status.set_mpie(self.status.mie());
                self.status.set_mie(false);
                self.status.set_mpp(self.privilege_mode.into());
                self.privilege_mode = PrivilegeLevel::Machine;
            }
        }
    }

    /// Fold externally posted interrupts into mip, reconcile the timer, and take the highest
    /// priority deliverable interrupt if there is one.
    ///
    /// Returns `true` if an interrupt was taken (pc now points at the trap vector).
    pub fn poll_interrupts(&mut self, wfi_wake: bool) -> bool {
        let posted = self.signals.drain();
        if posted != 0 {
            self.interrupts.post(posted);
        }
        // MTIP and MSIP mirror their external sources: the timer's pending predicate and the
        // msip register level. Both clear as soon as the source goes away.
        self.interrupts.set_m_timer(self.timer.is_pending());
        self.interrupts
            .set_m_soft(self.msip_line.load(Ordering::Acquire));
        match self
            .interrupts
            .pending_interrupt(&self.status, self.privilege_mode, wfi_wake)
        {
            Some(interrupt) => {
                trace!("Taking interrupt {:?}", interrupt);
                self.reservation = None;
                self.waiting = false;
                self.trap(interrupt.into());
                true
            }
            None => false,
        }
    }

    /// Run the hart until `stop` is raised.
    ///
    /// Each iteration publishes the executing state, runs a bounded batch of instructions
    /// (breaking early on WFI or an external wake), then folds in external events and delivers
    /// at most one interrupt. A WFI parks the thread on the mailbox until an interrupt can be
    /// delivered or the machine stops.
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            self.signals.publish_executing();
            for _ in 0..EXECUTION_BATCH {
                self.step();
                if self.waiting || self.signals.was_woken() {
                    break;
                }
            }
            self.poll_interrupts(false);
            while self.waiting && !stop.load(Ordering::Acquire) {
                self.signals.park(Duration::from_millis(1));
                self.signals.publish_executing();
                if self.poll_interrupts(true) {
                    break;
                }
            }
        }
    }

    /// Read the value of a CSR by its specifier.
    ///
    /// `privilege_level` indicates at what privilege level the read is performed. If the CSR
    /// that is being read requires a higher privilege level, a [`CsrAccessError::Privileged`]
    /// is returned.
    pub fn read_csr(
        &self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<u32, CsrAccessError> {
        self.check_csr_access(specifier, privilege_level)?;
        match specifier {
            //
            // Machine info registers
            //
            csr::MISA => Ok(Self::MISA),
            csr::MVENDORID => Ok(Self::MVENDORID),
            csr::MARCHID => Ok(Self::MARCHID),
            csr::MIMPID => Ok(Self::MIMPID),
            csr::MCONFIGPTR => Ok(Self::MCONFIGPTR),
            csr::MHARTID => Ok(self.config.hart_id),
            //
            // Status registers
            //
            csr::MSTATUS => Ok(self.status.read_mstatus()),
            csr::MSTATUSH => Ok(0),
            csr::SSTATUS => Ok(self.status.read_sstatus()),
            //
            // Interrupt registers
            //
            csr::MIE => Ok(self.interrupts.read_mie()),
            csr::MIP => Ok(self.interrupts.read_mip()),
            csr::MIDELEG => Ok(self.interrupts.read_mideleg()),
            csr::SIE => Ok(self.interrupts.read_sie()),
            csr::SIP => Ok(self.interrupts.read_sip()),
            //
            // Trap setup & handling
            //
            csr::MEDELEG => Ok(self.trap.read_medeleg()),
            csr::MTVEC => Ok(self.trap.mtvec.read()),
            csr::MSCRATCH => Ok(self.trap.read_mscratch()),
            csr::MEPC => Ok(self.trap.read_mepc()),
            csr::MCAUSE => Ok(self.trap.read_mcause()),
            csr::MTVAL => Ok(self.trap.read_mtval()),
            csr::STVEC => Ok(self.trap.stvec.read()),
            csr::SSCRATCH => Ok(self.trap.read_sscratch()),
            csr::SEPC => Ok(self.trap.read_sepc()),
            csr::SCAUSE => Ok(self.trap.read_scause()),
            csr::STVAL => Ok(self.trap.read_stval()),
            //
            // Address translation
            //
            csr::SATP => {
                self.check_satp_access(privilege_level)?;
                Ok(self.satp.read())
            }
            //
            // Counters
            //
            csr::MCOUNTEREN => Ok(self.counteren.read_mcounteren()),
            csr::SCOUNTEREN => Ok(self.counteren.read_scounteren()),
            csr::MCYCLE => Ok(self.counters.read_mcycle()),
            csr::MCYCLEH => Ok(self.counters.read_mcycleh()),
            csr::MINSTRET => Ok(self.counters.read_minstret()),
            csr::MINSTRETH => Ok(self.counters.read_minstreth()),
            csr::CYCLE => {
                self.check_counter_access(COUNTER_CY, privilege_level, specifier)?;
                Ok(self.counters.read_mcycle())
            }
            csr::CYCLEH => {
                self.check_counter_access(COUNTER_CY, privilege_level, specifier)?;
                Ok(self.counters.read_mcycleh())
            }
            csr::INSTRET => {
                self.check_counter_access(COUNTER_IR, privilege_level, specifier)?;
                Ok(self.counters.read_minstret())
            }
            csr::INSTRETH => {
                self.check_counter_access(COUNTER_IR, privilege_level, specifier)?;
                Ok(self.counters.read_minstreth())
            }
            csr::TIME => {
                self.check_counter_access(COUNTER_TM, privilege_level, specifier)?;
                Ok(self.timer.mtime() as u32)
            }
            csr::TIMEH => {
                self.check_counter_access(COUNTER_TM, privilege_level, specifier)?;
                Ok((self.timer.mtime() >> 32) as u32)
            }
            _ => Err(CsrAccessError::CsrUnsupported(specifier)),
        }
    }

    /// Write a (masked) value to a CSR by its specifier.
    ///
    /// Only the bits of `value` for which the corresponding bit in `mask` is `1` will be
    /// written. However, even if `mask == 0`, write side effects are still performed.
    pub fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
        value: u32,
        mask: u32,
    ) -> Result<(), CsrWriteError> {
        self.check_csr_access(specifier, privilege_level)?;
        if csr::is_read_only(specifier) {
            return Err(CsrWriteError::WriteToReadOnly);
        }
        match specifier {
            //
            // Status registers
            //
            csr::MSTATUS => {
                // A write that changes the fields feeding into address translation invalidates
                // cached translations.
                if self.status.write_affects_translation(value, mask) {
                    self.tlb.flush();
                }
                self.status.write_mstatus(value, mask);
            }
            csr::MSTATUSH => {}
            csr::SSTATUS => {
                if self
                    .status
                    .write_affects_translation(value, mask & status::SSTATUS_MASK)
                {
                    self.tlb.flush();
                }
                self.status.write_sstatus(value, mask);
            }
            //
            // Interrupt registers
            //
            csr::MIE => self.interrupts.write_mie(value, mask),
            csr::MIP => self.interrupts.write_mip(value, mask),
            csr::MIDELEG => self.interrupts.write_mideleg(value, mask),
            csr::SIE => self.interrupts.write_sie(value, mask),
            csr::SIP => self.interrupts.write_sip(value, mask),
            //
            // Trap setup & handling
            //
            csr::MEDELEG => self.trap.write_medeleg(value, mask),
            csr::MTVEC => self.trap.mtvec.write(value, mask),
            csr::MSCRATCH => self.trap.write_mscratch(value, mask),
            csr::MEPC => self.trap.write_mepc(value, mask),
            csr::MCAUSE => self.trap.write_mcause(value, mask),
            csr::MTVAL => self.trap.write_mtval(value, mask),
            csr::STVEC => self.trap.stvec.write(value, mask),
            csr::SSCRATCH => self.trap.write_sscratch(value, mask),
            csr::SEPC => self.trap.write_sepc(value, mask),
            csr::SCAUSE => self.trap.write_scause(value, mask),
            csr::STVAL => self.trap.write_stval(value, mask),
            //
            // Address translation
            //
            csr::SATP => {
                self.check_satp_access(privilege_level)?;
                self.satp.write(value, mask);
                // No translation through a stale root or ASID may survive a satp write.
                self.tlb.flush();
            }
            //
            // Counters
            //
            csr::MCOUNTEREN => self.counteren.write_mcounteren(value, mask),
            csr::SCOUNTEREN => self.counteren.write_scounteren(value, mask),
            csr::MCYCLE => self.counters.write_mcycle(value, mask),
            csr::MCYCLEH => self.counters.write_mcycleh(value, mask),
            csr::MINSTRET => self.counters.write_minstret(value, mask),
            csr::MINSTRETH => self.counters.write_minstreth(value, mask),
            _ => Err(CsrAccessError::CsrUnsupported(specifier))?,
        }
        Ok(())
    }

    fn check_csr_access(
        &self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<(), CsrAccessError> {
        if !csr::is_valid(specifier) {
            return Err(CsrAccessError::CsrUnsupported(specifier));
        }
        let required_level = csr::required_privilege_level(specifier);
        if privilege_level < required_level {
            return Err(CsrAccessError::Privileged {
                specifier,
                required_level,
                actual_level: privilege_level,
            });
        }
        Ok(())
    }

    /// When mstatus.TVM is set, satp is inaccessible from S-mode.
    fn check_satp_access(&self, privilege_level: PrivilegeLevel) -> Result<(), CsrAccessError> {
        match privilege_level == PrivilegeLevel::Supervisor && self.status.tvm() {
            true => Err(CsrAccessError::Privileged {
                specifier: csr::SATP,
                required_level: RawPrivilegeLevel::Machine,
                actual_level: privilege_level,
            }),
            false => Ok(()),
        }
    }

    /// Unprivileged counter CSRs are gated by mcounteren below M-mode and additionally by
    /// scounteren in U-mode.
    fn check_counter_access(
        &self,
        counter_bit: u32,
        privilege_level: PrivilegeLevel,
        specifier: CsrSpecifier,
    ) -> Result<(), CsrAccessError> {
        let allowed = match privilege_level {
            PrivilegeLevel::Machine => true,
            PrivilegeLevel::Supervisor => self.counteren.m_allows(counter_bit),
            PrivilegeLevel::User => {
                self.counteren.m_allows(counter_bit) && self.counteren.s_allows(counter_bit)
            }
        };
        match allowed {
            true => Ok(()),
            false => Err(CsrAccessError::CounterDisabled(specifier)),
        }
    }

    /// Drop the LR reservation if this hart stores to the reserved word.
    pub(crate) fn clear_reservation_on_store(&mut self, physical_address: u32) {
        if self.reservation == Some(physical_address & !0b11) {
            self.reservation = None;
        }
    }
}

/// Errors that can occur when attempting to access a CSR.
#[derive(Error, Debug)]
pub enum CsrAccessError {
    #[error("unsupported CSR: {0:#05X}")]
    CsrUnsupported(CsrSpecifier),
    /// Attempt to access a CSR that requires a higher privilege level.
    #[error(
        "cannot access CSR {specifier:#05X} from privilege level {actual_level}, \
             since it requires privilege level {required_level}"
    )]
    Privileged {
        /// The CSR for which access was requested.
        specifier: CsrSpecifier,
        /// The minimum required privilege level to access that CSR.
        required_level: RawPrivilegeLevel,
        /// The actual privilege level from which the access was performed.
        actual_level: PrivilegeLevel,
    },
    /// Attempt to read a counter CSR that the counter-enable registers hide from the current
    /// privilege level.
    #[error("counter CSR {0:#05X} is disabled by mcounteren/scounteren")]
    CounterDisabled(CsrSpecifier),
}

/// Errors that can occur when attempting to write to a CSR.
#[derive(Error, Debug)]
pub enum CsrWriteError {
    /// A non-write specific access error. See [`CsrAccessError`].
    #[error("{0}")]
    AccessError(#[from] CsrAccessError),
    /// Attempt to write to a read-only register.
    #[error("writing to read-only CSR is invalid")]
    WriteToReadOnly,
}
