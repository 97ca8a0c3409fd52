//! Trap causes and the per-hart trap-handling registers.

use crate::hart::interrupts::DELEGATABLE_INTERRUPTS_MASK;

/// Set in `xcause` when the trap was caused by an interrupt rather than an exception.
pub const INTERRUPT_BIT: u32 = 0x8000_0000;

// Exception codes that medeleg can delegate to S-mode. Environment calls from M-mode (code 11)
// are never delegated.
const DELEGATABLE_EXCEPTIONS_MASK: u32 = 0xB3FF;

/// Synchronous exception raised while executing an instruction.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not aligned to the instruction-address alignment (two bytes, since
    /// the C extension is implemented).
    ///
    /// The inner value is the faulting virtual address.
    InstructionAddressMisaligned(u32),
    /// The inner value is the faulting virtual address.
    InstructionAccessFault(u32),
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    ///
    /// The inner value is the raw instruction if that data was available.
    IllegalInstruction(Option<u32>),
    Breakpoint,
    /// The inner value is the virtual address of the portion of the access that caused the fault.
    LoadAddressMisaligned(u32),
    /// The inner value is the faulting virtual address.
    LoadAccessFault(u32),
    /// The inner value is the virtual address of the portion of the access that caused the fault.
    StoreOrAmoAddressMisaligned(u32),
    /// The inner value is the faulting virtual address.
    StoreOrAmoAccessFault(u32),
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    /// The inner value is the faulting virtual address.
    InstructionPageFault(u32),
    /// The inner value is the faulting virtual address.
    LoadPageFault(u32),
    /// The inner value is the faulting virtual address.
    StoreOrAmoPageFault(u32),
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u32 = 0;
    pub const INSTRUCTION_ACCESS_FAULT: u32 = 1;
    pub const ILLEGAL_INSTRUCTION: u32 = 2;
    pub const BREAKPOINT: u32 = 3;
    pub const LOAD_ADDRESS_MISALIGNED: u32 = 4;
    pub const LOAD_ACCESS_FAULT: u32 = 5;
    pub const STORE_OR_AMO_ADDRESS_MISALIGNED: u32 = 6;
    pub const STORE_OR_AMO_ACCESS_FAULT: u32 = 7;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: u32 = 8;
    pub const ENVIRONMENT_CALL_FROM_S_MODE: u32 = 9;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u32 = 11;
    pub const INSTRUCTION_PAGE_FAULT: u32 = 12;
    pub const LOAD_PAGE_FAULT: u32 = 13;
    pub const STORE_OR_AMO_PAGE_FAULT: u32 = 15;

    /// Returns the exception code (cause) for this exception.
    pub const fn code(&self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned(_) => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::InstructionAccessFault(_) => Self::INSTRUCTION_ACCESS_FAULT,
            Self::IllegalInstruction(_) => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::LoadAddressMisaligned(_) => Self::LOAD_ADDRESS_MISALIGNED,
            Self::LoadAccessFault(_) => Self::LOAD_ACCESS_FAULT,
            Self::StoreOrAmoAddressMisaligned(_) => Self::STORE_OR_AMO_ADDRESS_MISALIGNED,
            Self::StoreOrAmoAccessFault(_) => Self::STORE_OR_AMO_ACCESS_FAULT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromSMode => Self::ENVIRONMENT_CALL_FROM_S_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
            Self::InstructionPageFault(_) => Self::INSTRUCTION_PAGE_FAULT,
            Self::LoadPageFault(_) => Self::LOAD_PAGE_FAULT,
            Self::StoreOrAmoPageFault(_) => Self::STORE_OR_AMO_PAGE_FAULT,
        }
    }

    /// Returns the value to be written to `xtval` when this exception is taken with the hart's
    /// `pc` at `pc`.
    pub fn tval(&self, pc: u32) -> u32 {
        match *self {
            Self::IllegalInstruction(raw_instruction) => raw_instruction.unwrap_or(0),
            Self::Breakpoint => pc,
            Self::InstructionAddressMisaligned(vaddr)
            | Self::InstructionAccessFault(vaddr)
            | Self::LoadAddressMisaligned(vaddr)
            | Self::StoreOrAmoAddressMisaligned(vaddr)
            | Self::LoadAccessFault(vaddr)
            | Self::StoreOrAmoAccessFault(vaddr)
            | Self::InstructionPageFault(vaddr)
            | Self::LoadPageFault(vaddr)
            | Self::StoreOrAmoPageFault(vaddr) => vaddr,
            Self::EnvironmentCallFromUMode
            | Self::EnvironmentCallFromSMode
            | Self::EnvironmentCallFromMMode => 0,
        }
    }
}

/// Asynchronous interrupt, by priority-independent identity.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Interrupt {
    SupervisorSoftware,
    MachineSoftware,
    SupervisorTimer,
    MachineTimer,
    SupervisorExternal,
    MachineExternal,
}

impl Interrupt {
    /// Returns the exception code (cause, without the interrupt bit) for this interrupt.
    pub const fn code(&self) -> u32 {
        match self {
            Self::SupervisorSoftware => 1,
            Self::MachineSoftware => 3,
            Self::SupervisorTimer => 5,
            Self::MachineTimer => 7,
            Self::SupervisorExternal => 9,
            Self::MachineExternal => 11,
        }
    }

    /// Returns the `mip`/`mie` bit corresponding to this interrupt.
    pub const fn mask(&self) -> u32 {
        1 << self.code()
    }
}

/// Cause of a trap: either a synchronous exception or an accepted interrupt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl TrapCause {
    /// Returns the value to be written to `xcause` for this trap.
    pub fn cause(&self) -> u32 {
        match self {
            Self::Exception(exception) => exception.code(),
            Self::Interrupt(interrupt) => INTERRUPT_BIT | interrupt.code(),
        }
    }
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

/// Trap-vector mode, encoded in the low two bits of `xtvec`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VectorMode {
    /// All traps set pc to the vector base.
    Direct,
    /// Interrupts set pc to `base + 4 * cause`; exceptions use the base.
    Vectored,
}

/// An `mtvec`/`stvec` register.
///
/// The mode field is **WARL**: writes of the reserved modes (`2` and `3`) are ignored.
#[derive(Debug, Clone)]
pub struct Xtvec {
    raw: u32,
}

impl Xtvec {
    pub fn new() -> Self {
        Self { raw: 0 }
    }

    pub fn read(&self) -> u32 {
        self.raw
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        let new = self.raw & !mask | value & mask;
        self.raw = match new & 0b11 {
            0 | 1 => new,
            _ => new & !0b11 | self.raw & 0b11,
        };
    }

    pub fn base(&self) -> u32 {
        self.raw & !0b11
    }

    pub fn mode(&self) -> VectorMode {
        match self.raw & 0b11 {
            0 => VectorMode::Direct,
            _ => VectorMode::Vectored,
        }
    }

    /// Returns the address the hart jumps to when trapping with cause `cause`.
    pub fn trap_handler_address(&self, cause: &TrapCause) -> u32 {
        match (self.mode(), cause) {
            (VectorMode::Vectored, TrapCause::Interrupt(interrupt)) => {
                self.base().wrapping_add(4 * interrupt.code())
            }
            (VectorMode::Vectored, TrapCause::Exception(_)) | (VectorMode::Direct, _) => {
                self.base()
            }
        }
    }
}

impl Default for Xtvec {
    fn default() -> Self {
        Self::new()
    }
}

/// The machine- and supervisor-level trap-handling registers of one hart.
#[derive(Debug, Clone, Default)]
pub struct TrapRegs {
    pub mtvec: Xtvec,
    pub stvec: Xtvec,

    // mideleg lives with mip/mie in `Interrupts`.
    medeleg: u32,

    mscratch: u32,
    mepc: u32,
    mcause: u32,
    mtval: u32,

    sscratch: u32,
    sepc: u32,
    scause: u32,
    stval: u32,
}

impl TrapRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_medeleg(&self) -> u32 {
        self.medeleg
    }

    /// The medeleg register is **WARL**; only implemented, delegatable exception codes are
    /// writable.
    pub fn write_medeleg(&mut self, value: u32, mask: u32) {
        let mask = mask & DELEGATABLE_EXCEPTIONS_MASK;
        self.medeleg = self.medeleg & !mask | value & mask;
    }

    /// Returns `true` if handling of `exception` is delegated to S-mode (when not trapping from
    /// M-mode).
    pub fn should_delegate(&self, exception: Exception) -> bool {
        self.medeleg & (1 << exception.code()) != 0
    }

    pub fn read_mscratch(&self) -> u32 {
        self.mscratch
    }

    pub fn write_mscratch(&mut self, value: u32, mask: u32) {
        self.mscratch = self.mscratch & !mask | value & mask;
    }

    pub fn read_mepc(&self) -> u32 {
        self.mepc
    }

    /// The low bit of an epc register always reads as zero (IALIGN is 16 with the C extension).
    pub fn write_mepc(&mut self, value: u32, mask: u32) {
        self.mepc = (self.mepc & !mask | value & mask) & !0b1;
    }

    pub fn read_mcause(&self) -> u32 {
        self.mcause
    }

    pub fn write_mcause(&mut self, value: u32, mask: u32) {
        self.mcause = self.mcause & !mask | value & mask;
    }

    pub fn read_mtval(&self) -> u32 {
        self.mtval
    }

    pub fn write_mtval(&mut self, value: u32, mask: u32) {
        self.mtval = self.mtval & !mask | value & mask;
    }

    pub fn read_sscratch(&self) -> u32 {
        self.sscratch
    }

    pub fn write_sscratch(&mut self, value: u32, mask: u32) {
        self.sscratch = self.sscratch & !mask | value & mask;
    }

    pub fn read_sepc(&self) -> u32 {
        self.sepc
    }

    pub fn write_sepc(&mut self, value: u32, mask: u32) {
        self.sepc = (self.sepc & !mask | value & mask) & !0b1;
    }

    pub fn read_scause(&self) -> u32 {
        self.scause
    }

    pub fn write_scause(&mut self, value: u32, mask: u32) {
        self.scause = self.scause & !mask | value & mask;
    }

    pub fn read_stval(&self) -> u32 {
        self.stval
    }

    pub fn write_stval(&mut self, value: u32, mask: u32) {
        self.stval = self.stval & !mask | value & mask;
    }
}

const _: () = {
    assert!(DELEGATABLE_EXCEPTIONS_MASK & (1 << Exception::ENVIRONMENT_CALL_FROM_M_MODE) == 0);
    assert!(DELEGATABLE_INTERRUPTS_MASK & INTERRUPT_BIT == 0);
};
