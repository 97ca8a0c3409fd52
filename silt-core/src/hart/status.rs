use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::{PrivilegeLevel, RawPrivilegeLevel};

// Mask of the mstatus bits that are writable in this implementation.
const MSTATUS_WRITABLE_MASK: u32 = 0x007E_19AA;

// Mask to be applied to mstatus to get sstatus (SIE, SPIE, SPP, SUM, MXR).
pub(crate) const SSTATUS_MASK: u32 = 0x000C_0122;

// Mask of the fields that influence address translation or the effective privilege of loads and
// stores (MPRV, MPP, SUM, MXR). A write that changes any of these invalidates cached
// translations.
const TRANSLATION_MASK: u32 = 0x000E_1800;

/// Provides the mstatus register and its sstatus restricted view.
///
/// > The mstatus register keeps track of and controls the hart's current operating state. A
/// > restricted view of mstatus appears as the sstatus register in the S-level ISA.
///
/// Only little-endian operation is supported, so the endianness control fields (MBE, SBE, UBE)
/// are read-only zero, as is the entire mstatush register.
#[derive(Debug, Clone)]
pub struct Status {
    mstatus: u32,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Self { mstatus: 0 }
    }

    pub fn read_mstatus(&self) -> u32 {
        self.mstatus
    }

    /// Write the masked bits of `value` to mstatus, respecting WARL fields.
    pub fn write_mstatus(&mut self, value: u32, mask: u32) {
        let mask = mask & MSTATUS_WRITABLE_MASK;
        let old_mpp = self.mpp();
        self.mstatus = self.mstatus & !mask | value & mask;
        // MPP is a WARL field; writes of the reserved level are ignored.
        let mpp_bits = self.mstatus.view_bits::<Lsb0>()[idx::MPP..idx::MPP + 2].load_le::<u8>();
        if RawPrivilegeLevel::from_u2(mpp_bits).is_reserved() {
            self.set_mpp(old_mpp.into());
        }
    }

    pub fn read_sstatus(&self) -> u32 {
        self.mstatus & SSTATUS_MASK
    }

    pub fn write_sstatus(&mut self, value: u32, mask: u32) {
        self.write_mstatus(value, mask & SSTATUS_MASK);
    }

    /// Returns `true` if a write of `value` under `mask` would change a field that affects
    /// address translation (MPRV, MPP, SUM, MXR), in which case the TLB must be flushed.
    pub fn write_affects_translation(&self, value: u32, mask: u32) -> bool {
        let mask = mask & MSTATUS_WRITABLE_MASK & TRANSLATION_MASK;
        (self.mstatus ^ value) & mask != 0
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SIE]
    }

    /// Sets the SIE (S-mode Interrupt Enable) bit to `value`.
    pub fn set_sie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is set.
    pub fn spie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SPIE]
    }

    /// Sets the SPIE (S-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_spie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous Privilege level) field.
    ///
    /// The MPP field is **WARL**.
    pub fn mpp(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        )
        .try_into()
        .unwrap()
    }

    /// Sets the privilege level encoded by the MPP (M-mode Previous Privilege level) field to
    /// `value`.
    ///
    /// The MPP field is **WARL**.
    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            // MPP is a WARL field, so ignore illegal values.
            return;
        };
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous Privilege level) field.
    ///
    /// The SPP field is **WARL**.
    pub fn spp(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(self.mstatus.view_bits::<Lsb0>()[idx::SPP] as u8)
            .try_into()
            .unwrap()
    }

    /// Sets the privilege level encoded by the SPP (S-mode Previous Privilege level) field to
    /// `value`.
    ///
    /// The SPP field is **WARL**.
    pub fn set_spp(&mut self, value: RawPrivilegeLevel) {
        match PrivilegeLevel::try_from(value) {
            Ok(value) if value <= PrivilegeLevel::Supervisor => {
                let bit = value as u8 != 0;
                self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
            }
            _ => {} // SPP is a WARL field, so ignore illegal values.
        };
    }

    /// Returns `true` if the MPRV (Modify PRiVilege) bit is set.
    pub fn mprv(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPRV]
    }

    /// Sets the MPRV (Modify PRiVilege) bit to `value`.
    pub fn set_mprv(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPRV, value);
    }

    /// Returns `true` if the MXR (Make eXecutable Readable) bit is set.
    pub fn mxr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MXR]
    }

    /// Returns `true` if the SUM (permit Supervisor User Memory access) bit is set.
    pub fn sum(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SUM]
    }

    /// Returns `true` if the TVM (Trap Virtual Memory) bit is set.
    ///
    /// When set, S-mode accesses to satp and SFENCE.VMA raise an illegal instruction exception.
    pub fn tvm(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TVM]
    }

    /// Returns `true` if the TW (Timeout Wait) bit is set.
    ///
    /// When set, WFI executed below M-mode raises an illegal instruction exception.
    pub fn tw(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TW]
    }

    /// Returns `true` if the TSR (Trap SRET) bit is set.
    ///
    /// When set, SRET executed in S-mode raises an illegal instruction exception.
    pub fn tsr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TSR]
    }
}

/// Bit indices of the supported mstatus fields.
mod idx {
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
    pub const TVM: usize = 20;
    pub const TW: usize = 21;
    pub const TSR: usize = 22;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpp_warl() {
        let mut status = Status::new();
        status.set_mpp(RawPrivilegeLevel::Machine);
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        // Writes of the reserved level are ignored.
        status.set_mpp(RawPrivilegeLevel::Reserved);
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        // A full mstatus write of a reserved MPP is ignored too.
        status.write_mstatus(0b01 << 11, 0b11 << 11);
        assert_eq!(PrivilegeLevel::Supervisor, status.mpp());
        status.write_mstatus(0b10 << 11, 0b11 << 11);
        assert_eq!(PrivilegeLevel::Supervisor, status.mpp());
    }

    #[test]
    fn test_sstatus_is_restricted_view() {
        let mut status = Status::new();
        status.set_mie(true);
        status.set_sie(true);
        let sstatus = status.read_sstatus();
        assert_eq!(0b10, sstatus & 0b1010, "MIE must not leak into sstatus");
        // Writing sstatus cannot touch M-mode fields.
        status.write_sstatus(0, 0xFFFF_FFFF);
        assert!(status.mie());
        assert!(!status.sie());
    }

    #[test]
    fn test_translation_change_detection() {
        let mut status = Status::new();
        assert!(status.write_affects_translation(1 << 18, 1 << 18));
        assert!(!status.write_affects_translation(1 << 3, 1 << 3));
        status.write_mstatus(1 << 18, 1 << 18);
        // Rewriting the same value is not a change.
        assert!(!status.write_affects_translation(1 << 18, 1 << 18));
    }

    #[test]
    fn test_read_only_fields_stay_zero() {
        let mut status = Status::new();
        status.write_mstatus(0xFFFF_FFFF, 0xFFFF_FFFF);
        assert_eq!(0, status.read_mstatus() & !super::MSTATUS_WRITABLE_MASK);
    }
}
