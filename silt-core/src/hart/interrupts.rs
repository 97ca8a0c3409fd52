//! Interrupt pending/enable/delegation state and the delivery decision.

use super::status::Status;
use super::trap::Interrupt;
use crate::PrivilegeLevel;

#[allow(clippy::identity_op)]
const VALID_INTERRUPTS_MASK: u32 = 0
    | Interrupt::SupervisorSoftware.mask()
    | Interrupt::MachineSoftware.mask()
    | Interrupt::SupervisorTimer.mask()
    | Interrupt::MachineTimer.mask()
    | Interrupt::SupervisorExternal.mask()
    | Interrupt::MachineExternal.mask();

// Delegatable interrupts according to QEMU's implementation: only the S-level ones.
#[allow(clippy::identity_op)]
pub(crate) const DELEGATABLE_INTERRUPTS_MASK: u32 = 0
    | Interrupt::SupervisorSoftware.mask()
    | Interrupt::SupervisorTimer.mask()
    | Interrupt::SupervisorExternal.mask();

// Bits of mip that M-mode guest code can write. MSIP, MTIP, and MEIP are controlled externally
// (software interrupt source, timer, and interrupt controller respectively).
const MIP_WRITABLE_MASK: u32 = Interrupt::SupervisorSoftware.mask()
    | Interrupt::SupervisorTimer.mask()
    | Interrupt::SupervisorExternal.mask();

/// Scan order for interrupt delivery, highest priority first.
const PRIORITY_ORDER: [Interrupt; 6] = [
    Interrupt::MachineExternal,
    Interrupt::MachineSoftware,
    Interrupt::MachineTimer,
    Interrupt::SupervisorExternal,
    Interrupt::SupervisorSoftware,
    Interrupt::SupervisorTimer,
];

/// The mip, mie, and mideleg registers of one hart, plus the delivery rule.
#[derive(Debug, Clone)]
pub struct Interrupts {
    mip: u32,
    mie: u32,
    mideleg: u32,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            mip: 0,
            mie: 0,
            mideleg: 0,
        }
    }

    pub fn read_mip(&self) -> u32 {
        self.mip
    }

    /// Write mip from guest code. The externally controlled bits (MSIP, MTIP, MEIP) are
    /// read-only from this path.
    pub fn write_mip(&mut self, value: u32, mask: u32) {
        let mask = mask & MIP_WRITABLE_MASK;
        self.mip = self.mip & !mask | value & mask;
    }

    /// OR externally posted interrupt bits into mip. This is the entry point for the bits
    /// drained from the hart's signal mask (software IPIs, interrupt-controller lines).
    pub fn post(&mut self, bits: u32) {
        self.mip |= bits & VALID_INTERRUPTS_MASK;
    }

    /// Reconcile the M-level timer pending bit with the timer's pending predicate.
    ///
    /// MTIP is special: it is set while `mtime >= mtimecmp` and cleared as soon as the
    /// comparand moves past `mtime` again, without guest-visible writes.
    pub fn set_m_timer(&mut self, pending: bool) {
        match pending {
            true => self.mip |= Interrupt::MachineTimer.mask(),
            false => self.mip &= !Interrupt::MachineTimer.mask(),
        }
    }

    /// Reconcile the M-level software pending bit with the level of the msip line.
    ///
    /// Like MTIP, MSIP mirrors an external register (the CLINT's msip word): it is pending
    /// exactly while that register holds 1.
    pub fn set_m_soft(&mut self, pending: bool) {
        match pending {
            true => self.mip |= Interrupt::MachineSoftware.mask(),
            false => self.mip &= !Interrupt::MachineSoftware.mask(),
        }
    }

    pub fn read_mie(&self) -> u32 {
        self.mie
    }

    pub fn write_mie(&mut self, value: u32, mask: u32) {
        let mask = mask & VALID_INTERRUPTS_MASK;
        self.mie = self.mie & !mask | value & mask;
    }

    pub fn read_mideleg(&self) -> u32 {
        self.mideleg
    }

    /// The mideleg register is **WARL**.
    pub fn write_mideleg(&mut self, value: u32, mask: u32) {
        let mask = mask & DELEGATABLE_INTERRUPTS_MASK;
        self.mideleg = self.mideleg & !mask | value & mask;
    }

    /// sip is the view of mip restricted to the interrupts delegated to S-mode.
    pub fn read_sip(&self) -> u32 {
        self.mip & self.mideleg
    }

    /// Only SSIP is writable through sip; SEIP and STIP are read-only there.
    pub fn write_sip(&mut self, value: u32, mask: u32) {
        let mask = mask & self.mideleg & Interrupt::SupervisorSoftware.mask();
        self.mip = self.mip & !mask | value & mask;
    }

    pub fn read_sie(&self) -> u32 {
        self.mie & self.mideleg
    }

    pub fn write_sie(&mut self, value: u32, mask: u32) {
        // Since we are masking with mideleg, it is not needed to also mask with
        // VALID_INTERRUPTS_MASK (or DELEGATABLE_INTERRUPTS_MASK).
        let mask = mask & self.mideleg;
        self.mie = self.mie & !mask | value & mask;
    }

    pub fn should_delegate(&self, interrupt: Interrupt) -> bool {
        self.mideleg & interrupt.mask() != 0
    }

    /// Decide which interrupt, if any, the hart takes next.
    ///
    /// An interrupt fires when it is pending and enabled, its target privilege (per mideleg) is
    /// at least the current privilege, and, when the target equals the current privilege, the
    /// matching global enable bit in mstatus is set. A hart waking from WFI takes the interrupt
    /// even with the global enable clear, as the privileged architecture allows.
    pub fn pending_interrupt(
        &self,
        status: &Status,
        privilege_mode: PrivilegeLevel,
        wfi_wake: bool,
    ) -> Option<Interrupt> {
        let ready = self.mip & self.mie & VALID_INTERRUPTS_MASK;
        if ready == 0 {
            return None;
        }
        PRIORITY_ORDER.into_iter().find(|&interrupt| {
            if ready & interrupt.mask() == 0 {
                return false;
            }
            let target = match self.should_delegate(interrupt) {
                true => PrivilegeLevel::Supervisor,
                false => PrivilegeLevel::Machine,
            };
            if target < privilege_mode {
                return false;
            }
            if target > privilege_mode {
                return true;
            }
            let global_enable = match target {
                PrivilegeLevel::Machine => status.mie(),
                _ => status.sie(),
            };
            global_enable || wfi_wake
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_timer_ready() -> Interrupts {
        let mut interrupts = Interrupts::new();
        interrupts.set_m_timer(true);
        interrupts.write_mie(Interrupt::MachineTimer.mask(), 0xFFFF_FFFF);
        interrupts
    }

    #[test]
    fn test_mip_external_bits_not_guest_writable() {
        let mut interrupts = Interrupts::new();
        interrupts.set_m_timer(true);
        interrupts.write_mip(0, 0xFFFF_FFFF);
        assert_ne!(0, interrupts.read_mip() & Interrupt::MachineTimer.mask());
        interrupts.set_m_timer(false);
        assert_eq!(0, interrupts.read_mip());
    }

    #[test]
    fn test_delivery_requires_global_enable_at_same_level() {
        let interrupts = machine_timer_ready();
        let mut status = Status::new();
        assert_eq!(
            None,
            interrupts.pending_interrupt(&status, PrivilegeLevel::Machine, false)
        );
        status.set_mie(true);
        assert_eq!(
            Some(Interrupt::MachineTimer),
            interrupts.pending_interrupt(&status, PrivilegeLevel::Machine, false)
        );
    }

    #[test]
    fn test_wfi_wake_overrides_global_enable() {
        let interrupts = machine_timer_ready();
        let status = Status::new();
        assert_eq!(
            Some(Interrupt::MachineTimer),
            interrupts.pending_interrupt(&status, PrivilegeLevel::Machine, true)
        );
    }

    #[test]
    fn test_m_interrupts_always_fire_below_m() {
        let interrupts = machine_timer_ready();
        let status = Status::new();
        // From U- or S-mode an M-level interrupt fires regardless of mstatus.MIE.
        assert_eq!(
            Some(Interrupt::MachineTimer),
            interrupts.pending_interrupt(&status, PrivilegeLevel::User, false)
        );
        assert_eq!(
            Some(Interrupt::MachineTimer),
            interrupts.pending_interrupt(&status, PrivilegeLevel::Supervisor, false)
        );
    }

    #[test]
    fn test_delegated_interrupt_not_taken_in_m() {
        let mut interrupts = Interrupts::new();
        interrupts.write_mideleg(0xFFFF_FFFF, 0xFFFF_FFFF);
        interrupts.write_mie(Interrupt::SupervisorSoftware.mask(), 0xFFFF_FFFF);
        interrupts.post(Interrupt::SupervisorSoftware.mask());
        let mut status = Status::new();
        status.set_mie(true);
        status.set_sie(true);
        // Delegated to S, so invisible while executing in M.
        assert_eq!(
            None,
            interrupts.pending_interrupt(&status, PrivilegeLevel::Machine, false)
        );
        assert_eq!(
            Some(Interrupt::SupervisorSoftware),
            interrupts.pending_interrupt(&status, PrivilegeLevel::Supervisor, false)
        );
        assert_eq!(
            Some(Interrupt::SupervisorSoftware),
            interrupts.pending_interrupt(&status, PrivilegeLevel::User, false)
        );
    }

    #[test]
    fn test_priority_order() {
        let mut interrupts = Interrupts::new();
        interrupts.post(Interrupt::SupervisorSoftware.mask());
        interrupts.set_m_timer(true);
        interrupts.write_mie(0xFFFF_FFFF, 0xFFFF_FFFF);
        let mut status = Status::new();
        status.set_mie(true);
        status.set_sie(true);
        assert_eq!(
            Some(Interrupt::MachineTimer),
            interrupts.pending_interrupt(&status, PrivilegeLevel::Machine, false)
        );
    }
}
