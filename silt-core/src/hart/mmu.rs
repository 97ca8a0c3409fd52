//! Virtual memory: the satp register, the SV32 table walker, and the TLB.

use super::Hart;
use crate::system_bus::AccessType;
use crate::{Alignment, PrivilegeLevel};
use bitvec::order::Lsb0;
use bitvec::view::BitView;
use log::{debug, trace};
use thiserror::Error;

const PAGE_TABLE_LEVELS: u32 = 2;
// log2(Size of a single page (in bytes))
const PAGE_SIZE_SHF: u32 = 12;
// log2(Size of a single PTE (in bytes))
const PTE_SIZE_SHF: u32 = 2;

// SV32 PPNs are 22 bits wide, but this machine's physical address space is 32 bits, so only
// PPNs below this limit name addressable memory.
const PPN_LIMIT: u32 = 1 << 20;

/// Number of TLB entries. Must be a power of two, since the low bits of the virtual page number
/// select the slot.
pub const TLB_LEN: usize = 256;
const_assert!(TLB_LEN.is_power_of_two());

/// Address-translation mode selected by the satp MODE bit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SatpMode {
    /// No translation: virtual addresses are physical addresses.
    Bare,
    /// Two-level 4 KiB paging with optional 4 MiB superpages.
    Sv32,
}

/// The satp (Supervisor Address Translation and Protection) register.
///
/// Layout on RV32: MODE at bit 31, ASID at bits 30:22, the root page-table PPN at bits 21:0.
#[derive(Debug, Clone, Default)]
pub struct Satp {
    raw: u32,
}

impl Satp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> u32 {
        self.raw
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        self.raw = self.raw & !mask | value & mask;
    }

    pub fn mode(&self) -> SatpMode {
        match self.raw >> 31 {
            0 => SatpMode::Bare,
            _ => SatpMode::Sv32,
        }
    }

    pub fn asid(&self) -> u32 {
        (self.raw >> 22) & 0x1FF
    }

    /// Physical page number of the root page table.
    pub fn root_ppn(&self) -> u32 {
        self.raw & 0x003F_FFFF
    }
}

/// A cached leaf translation: one 4 KiB page, tagged by its full virtual page number.
///
/// `flags` holds the low bits of the resolved leaf PTE (permissions plus A/D), so the
/// permission decision can be re-evaluated against the current privilege and mstatus on every
/// hit without touching guest memory.
#[derive(Debug, Copy, Clone)]
struct TlbEntry {
    vpn: u32,
    ppn: u32,
    flags: u8,
}

/// Direct-mapped TLB: slot = `vpn & (TLB_LEN - 1)`, `None` is the invalid sentinel.
#[derive(Debug)]
pub struct Tlb {
    entries: Box<[Option<TlbEntry>]>,
}

impl Tlb {
    pub fn new() -> Self {
        Self {
            entries: vec![None; TLB_LEN].into_boxed_slice(),
        }
    }

    /// Invalidate every entry. Used for SFENCE.VMA and any satp/mstatus change that affects
    /// translation; ASID-targeted invalidation is implemented as a full flush.
    pub fn flush(&mut self) {
        self.entries.fill(None);
    }

    fn lookup(&self, vpn: u32) -> Option<TlbEntry> {
        let entry = self.entries[vpn as usize & (TLB_LEN - 1)]?;
        (entry.vpn == vpn).then_some(entry)
    }

    fn insert(&mut self, entry: TlbEntry) {
        self.entries[entry.vpn as usize & (TLB_LEN - 1)] = Some(entry);
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Invoke a read for the specified virtual address.
            pub fn $read_fn(&mut self, address: u32) -> Result<$u, MemoryError> {
                trace!("Reading {} from memory at vaddr {address:#010x}", stringify!($u));
                const SIZE: usize = std::mem::size_of::<$u>();
                self.check_alignment(address, SIZE as u32)?;
                let privilege_level = self.effective_privilege_mode();
                let physical_address =
                    self.translate(address, AccessType::Read, privilege_level)?;
                let mut buf = [0u8; SIZE];
                self.bus
                    .read(physical_address, &mut buf)
                    .map_err(|_| MemoryError::AccessFault)?;
                Ok($u::from_le_bytes(buf))
            }

            /// Invoke a write for the specified virtual address.
            pub fn $write_fn(&mut self, address: u32, value: $u) -> Result<(), MemoryError> {
                trace!(value; "Writing {} to memory at vaddr {address:#010x}", stringify!($u));
                const SIZE: usize = std::mem::size_of::<$u>();
                self.check_alignment(address, SIZE as u32)?;
                let privilege_level = self.effective_privilege_mode();
                let physical_address =
                    self.translate(address, AccessType::Write, privilege_level)?;
                self.clear_reservation_on_store(physical_address);
                self.bus
                    .write(physical_address, &value.to_le_bytes())
                    .map_err(|_| MemoryError::AccessFault)
            }
        )*
    };
}

impl Hart {
    access_fns! {
        read_byte, write_byte => u8,
        read_halfword, write_halfword => u16,
        read_word, write_word => u32,
    }

    /// Fetch one 16-bit instruction parcel from the virtual address `address`.
    ///
    /// Instructions are fetched parcel by parcel so a 32-bit instruction straddling a page
    /// boundary translates each half separately.
    ///
    /// Fetches are performed at the hart's *current* privilege level; mstatus.MPRV only affects
    /// loads and stores.
    pub fn fetch_parcel(&mut self, address: u32) -> Result<u16, MemoryError> {
        trace!("Fetching instruction parcel at vaddr {address:#010x}");
        if !Alignment::HALFWORD.is_aligned(address) {
            debug!("Failed to fetch instruction: address misaligned: {address:#010x}");
            return Err(MemoryError::MisalignedAccess);
        }
        let privilege_level = self.privilege_mode;
        let physical_address = self.translate(address, AccessType::Execute, privilege_level)?;
        let mut buf = [0u8; 2];
        self.bus
            .read(physical_address, &mut buf)
            .map_err(|_| MemoryError::AccessFault)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Translate a word-aligned virtual address for an AMO or SC, which are stores per the
    /// A-extension fault rules.
    pub(super) fn translate_amo(&mut self, address: u32) -> Result<u32, MemoryError> {
        self.check_alignment(address, 4)?;
        let privilege_level = self.effective_privilege_mode();
        self.translate(address, AccessType::Write, privilege_level)
    }

    /// Translate a word-aligned virtual address for an LR, which is a load.
    pub(super) fn translate_reserved(&mut self, address: u32) -> Result<u32, MemoryError> {
        self.check_alignment(address, 4)?;
        let privilege_level = self.effective_privilege_mode();
        self.translate(address, AccessType::Read, privilege_level)
    }

    fn check_alignment(&self, address: u32, size: u32) -> Result<(), MemoryError> {
        match Alignment::natural_for_size(size).unwrap().is_aligned(address) {
            true => Ok(()),
            false => {
                debug!(address, size; "Memory access misaligned");
                Err(MemoryError::MisalignedAccess)
            }
        }
    }

    /// Map a virtual byte address to the corresponding physical byte address.
    ///
    /// Consults the TLB first; a miss or an entry that does not satisfy the request (wrong
    /// permissions, or a store to a page whose D bit is still clear) falls through to the
    /// walker, which raises the page fault if the translation really is not allowed.
    fn translate(
        &mut self,
        address: u32,
        access_type: AccessType,
        privilege_level: PrivilegeLevel,
    ) -> Result<u32, MemoryError> {
        // Satp must be active (privilege mode U or S).
        let user_mode = match privilege_level {
            PrivilegeLevel::Machine => return Ok(address),
            PrivilegeLevel::User => true,
            PrivilegeLevel::Supervisor => false,
        };
        match self.satp.mode() {
            SatpMode::Bare => return Ok(address),
            SatpMode::Sv32 => {}
        };
        const PAGE_SIZE_MSK: u32 = (1 << PAGE_SIZE_SHF) - 1;
        let vpn = address >> PAGE_SIZE_SHF;
        if let Some(entry) = self.tlb.lookup(vpn) {
            if self.leaf_permits(entry.flags, access_type, user_mode)
                && (access_type != AccessType::Write || entry.flags & pte::D_MASK != 0)
            {
                return Ok((entry.ppn << PAGE_SIZE_SHF) + (address & PAGE_SIZE_MSK));
            }
        }
        self.walk(address, access_type, user_mode)
    }

    /// The SV32 page-table walk. On success the resolved translation is inserted into the TLB.
    fn walk(
        &mut self,
        address: u32,
        access_type: AccessType,
        user_mode: bool,
    ) -> Result<u32, MemoryError> {
        const PAGE_SIZE_MSK: u32 = (1 << PAGE_SIZE_SHF) - 1;
        // log2(Number of PTEs that fit in one page)
        const PTE_COUNT_SHF: u32 = PAGE_SIZE_SHF - PTE_SIZE_SHF;
        const PTE_COUNT_MSK: u32 = (1 << PTE_COUNT_SHF) - 1;
        // STEP 1
        if self.satp.root_ppn() >= PPN_LIMIT {
            return Err(MemoryError::AccessFault);
        }
        let mut page_table = self.satp.root_ppn() << PAGE_SIZE_SHF;
        for level in (0..PAGE_TABLE_LEVELS).rev() {
            // STEP 2
            let vpn = (address >> (PAGE_SIZE_SHF + level * PTE_COUNT_SHF)) & PTE_COUNT_MSK;
            let entry_address = page_table + (vpn << PTE_SIZE_SHF);
            let raw_entry = self
                .bus
                .load_word(entry_address)
                .map_err(|_| MemoryError::AccessFault)?;
            let entry = raw_entry.view_bits::<Lsb0>();
            // STEP 3
            if !entry[pte::V] || (!entry[pte::R] && entry[pte::W]) {
                return Err(MemoryError::PageFault);
            }
            // STEP 4
            if !entry[pte::R] && !entry[pte::X] {
                // This PTE is a pointer to the next level of the page table.
                // But if we're at the last level, this is a page fault.
                if level == 0 {
                    return Err(MemoryError::PageFault);
                }
                let next = pte::ppn(entry);
                if next >= PPN_LIMIT {
                    return Err(MemoryError::AccessFault);
                }
                page_table = next << PAGE_SIZE_SHF;
                continue;
            }
            // STEP 5
            let flags = (raw_entry & 0xFF) as u8;
            if !self.leaf_permits(flags, access_type, user_mode) {
                return Err(MemoryError::PageFault);
            }
            // STEP 6 & 8
            let mut ppn = pte::ppn(entry);
            if level != 0 {
                // STEP 6: superpages must be aligned on a 4 MiB boundary.
                let mask = (1 << (level * PTE_COUNT_SHF)) - 1;
                if ppn & mask != 0 {
                    return Err(MemoryError::PageFault);
                }
                // STEP 8
                ppn |= (address >> PAGE_SIZE_SHF) & mask;
            }
            if ppn >= PPN_LIMIT {
                return Err(MemoryError::AccessFault);
            }
            // STEP 7: set A on any access, D additionally on stores, atomically in guest
            // memory.
            let mut update = 0u32;
            if !entry[pte::A] {
                update |= 1 << pte::A;
            }
            if access_type == AccessType::Write && !entry[pte::D] {
                update |= 1 << pte::D;
            }
            if update != 0 {
                self.bus
                    .fetch_update_word(entry_address, |e| e | update)
                    .map_err(|_| MemoryError::AccessFault)?;
            }
            self.tlb.insert(TlbEntry {
                vpn: address >> PAGE_SIZE_SHF,
                ppn,
                flags: flags | update as u8,
            });
            let page_offset = address & PAGE_SIZE_MSK;
            return Ok((ppn << PAGE_SIZE_SHF) + page_offset);
        }
        // The following asserts the above loop is taken.
        const_assert!(PAGE_TABLE_LEVELS > 0);
        // The above loop can only exit through a return, hence this is unreachable.
        unreachable!()
    }

    /// The leaf permission check of the SV32 walk, shared by the walker and TLB hits.
    fn leaf_permits(&self, flags: u8, access_type: AccessType, user_mode: bool) -> bool {
        let flags = flags.view_bits::<Lsb0>();
        let type_ok = match access_type {
            AccessType::Read => flags[pte::R] || (flags[pte::X] && self.status.mxr()),
            AccessType::Write => flags[pte::W],
            AccessType::Execute => flags[pte::X],
        };
        let user_ok = match user_mode {
            true => flags[pte::U],
            false => {
                !flags[pte::U] || (self.status.sum() && access_type != AccessType::Execute)
            }
        };
        type_ok && user_ok
    }
}

pub(super) mod pte {
    use bitvec::{field::BitField, order::Lsb0, slice::BitSlice};

    pub const V: usize = 0;
    pub const R: usize = 1;
    pub const W: usize = 2;
    pub const X: usize = 3;
    pub const U: usize = 4;
    pub const A: usize = 6;
    pub const D: usize = 7;

    pub const D_MASK: u8 = 1 << D;

    pub fn ppn(entry: &BitSlice<u32, Lsb0>) -> u32 {
        entry[10..32].load_le()
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MemoryError {
    #[error("misaligned access")]
    MisalignedAccess,
    #[error("access fault")]
    AccessFault,
    #[error("page fault")]
    PageFault,
}
