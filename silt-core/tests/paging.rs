//! SV32 translation, TLB coherence, and trap delegation against a whole machine.

use silt_core::hart::mmu::MemoryError;
use silt_core::hart::{csr, Hart};
use silt_core::instruction::Instruction;
use silt_core::machine::{Config, Machine};
use silt_core::system_bus::SystemBus;
use silt_core::PrivilegeLevel;
use std::sync::Arc;

const RAM_BASE: u32 = 0x8000_0000;

const ROOT_PT: u32 = 0x8000_2000;
const LEAF_PT: u32 = 0x8000_4000;
const DATA_PAGE: u32 = 0x8000_3000;
const OTHER_PAGE: u32 = 0x8000_5000;

/// Virtual address mapped by [`map_page`]: vpn[1] = 0, vpn[0] = 1.
const VADDR: u32 = 0x0000_1000;

const PTE_V: u32 = 1 << 0;
const PTE_R: u32 = 1 << 1;
const PTE_W: u32 = 1 << 2;
const PTE_U: u32 = 1 << 4;
const PTE_A: u32 = 1 << 6;
const PTE_D: u32 = 1 << 7;

fn small_machine() -> (Arc<SystemBus>, Machine) {
    let machine = Machine::new(Config {
        ram_size: 0x10000,
        ..Config::default()
    })
    .unwrap();
    (machine.bus().clone(), machine)
}

fn pte(physical: u32, flags: u32) -> u32 {
    (physical >> 12) << 10 | flags
}

/// Build a two-level table mapping [`VADDR`] to `target` with `flags`, and point satp at it.
fn map_page(bus: &SystemBus, hart: &mut Hart, target: u32, flags: u32) {
    assert!(bus.ram().store_word(ROOT_PT, pte(LEAF_PT, PTE_V)));
    assert!(bus.ram().store_word(LEAF_PT + 4, pte(target, flags)));
    hart.write_csr(
        csr::SATP,
        PrivilegeLevel::Machine,
        1 << 31 | ROOT_PT >> 12,
        !0,
    )
    .unwrap();
}

/// Make loads and stores run at S-mode (MPRV with MPP = S) while staying in M-mode.
fn data_accesses_as_supervisor(hart: &mut Hart) {
    hart.write_csr(
        csr::MSTATUS,
        PrivilegeLevel::Machine,
        1 << 17 | 0b01 << 11,
        1 << 17 | 0b11 << 11,
    )
    .unwrap();
}

fn execute_raw(hart: &mut Hart, raw: u32) {
    let instruction = Instruction::decode(raw).unwrap();
    hart.execute_instruction(instruction, 4).unwrap();
}

#[test]
fn sv32_walk_translates_and_sets_accessed_dirty() {
    let (bus, mut machine) = small_machine();
    let hart = &mut machine.harts_mut()[0];
    map_page(&bus, hart, DATA_PAGE, PTE_V | PTE_R | PTE_W);
    data_accesses_as_supervisor(hart);
    bus.ram().store_word(DATA_PAGE, 0xDEAD_BEEF);

    assert_eq!(Ok(0xDEAD_BEEF), hart.read_word(VADDR));
    let leaf = bus.ram().load_word(LEAF_PT + 4).unwrap();
    assert_ne!(0, leaf & PTE_A, "A must be set by the read");
    assert_eq!(0, leaf & PTE_D, "D must not be set by a read");

    hart.write_word(VADDR, 0x1234_5678).unwrap();
    let leaf = bus.ram().load_word(LEAF_PT + 4).unwrap();
    assert_ne!(0, leaf & PTE_D, "D must be set by the write");
    assert_eq!(Some(0x1234_5678), bus.ram().load_word(DATA_PAGE));
}

#[test]
fn sfence_vma_forces_a_rewalk() {
    let (bus, mut machine) = small_machine();
    let hart = &mut machine.harts_mut()[0];
    map_page(&bus, hart, DATA_PAGE, PTE_V | PTE_R | PTE_A);
    data_accesses_as_supervisor(hart);
    bus.ram().store_word(DATA_PAGE, 1);
    bus.ram().store_word(OTHER_PAGE, 2);

    assert_eq!(Ok(1), hart.read_word(VADDR));
    // Retarget the leaf PTE. The cached translation still wins until it is fenced away.
    bus.ram()
        .store_word(LEAF_PT + 4, pte(OTHER_PAGE, PTE_V | PTE_R | PTE_A));
    assert_eq!(Ok(1), hart.read_word(VADDR));
    execute_raw(hart, 0x1200_0073); // sfence.vma x0, x0
    assert_eq!(Ok(2), hart.read_word(VADDR));
}

#[test]
fn satp_write_flushes_cached_translations() {
    let (bus, mut machine) = small_machine();
    let hart = &mut machine.harts_mut()[0];
    map_page(&bus, hart, DATA_PAGE, PTE_V | PTE_R | PTE_A);
    data_accesses_as_supervisor(hart);
    bus.ram().store_word(DATA_PAGE, 1);
    bus.ram().store_word(OTHER_PAGE, 2);

    assert_eq!(Ok(1), hart.read_word(VADDR));
    bus.ram()
        .store_word(LEAF_PT + 4, pte(OTHER_PAGE, PTE_V | PTE_R | PTE_A));
    // Rewriting satp (even with the same value) must drop every cached translation.
    let satp = hart.read_csr(csr::SATP, PrivilegeLevel::Machine).unwrap();
    hart.write_csr(csr::SATP, PrivilegeLevel::Machine, satp, !0)
        .unwrap();
    assert_eq!(Ok(2), hart.read_word(VADDR));
}

#[test]
fn supervisor_cannot_touch_user_pages_without_sum() {
    let (bus, mut machine) = small_machine();
    let hart = &mut machine.harts_mut()[0];
    map_page(&bus, hart, DATA_PAGE, PTE_V | PTE_R | PTE_U | PTE_A);
    data_accesses_as_supervisor(hart);

    assert_eq!(Err(MemoryError::PageFault), hart.read_word(VADDR));
    // Setting SUM makes the same access legal.
    hart.write_csr(csr::MSTATUS, PrivilegeLevel::Machine, 1 << 18, 1 << 18)
        .unwrap();
    assert!(hart.read_word(VADDR).is_ok());
}

#[test]
fn missing_write_permission_page_faults() {
    let (bus, mut machine) = small_machine();
    let hart = &mut machine.harts_mut()[0];
    map_page(&bus, hart, DATA_PAGE, PTE_V | PTE_R | PTE_A);
    data_accesses_as_supervisor(hart);

    assert!(hart.read_word(VADDR).is_ok());
    assert_eq!(Err(MemoryError::PageFault), hart.write_word(VADDR, 0));
}

#[test]
fn delegated_breakpoint_lands_in_s_mode() {
    let (_bus, mut machine) = small_machine();
    machine
        .load_image(RAM_BASE, &0x0010_0073u32.to_le_bytes())
        .unwrap(); // ebreak
    let hart = &mut machine.harts_mut()[0];
    hart.write_csr(csr::MEDELEG, PrivilegeLevel::Machine, 1 << 3, !0)
        .unwrap();
    hart.write_csr(csr::STVEC, PrivilegeLevel::Machine, 0x8000_0200, !0)
        .unwrap();
    hart.write_csr(csr::MEPC, PrivilegeLevel::Machine, RAM_BASE, !0)
        .unwrap();
    execute_raw(hart, 0x3020_0073); // mret; MPP resets to U
    assert_eq!(PrivilegeLevel::User, hart.privilege_mode());

    hart.step(); // ebreak from U-mode
    assert_eq!(PrivilegeLevel::Supervisor, hart.privilege_mode());
    assert_eq!(
        3,
        hart.read_csr(csr::SCAUSE, PrivilegeLevel::Machine).unwrap()
    );
    assert_eq!(
        RAM_BASE,
        hart.read_csr(csr::SEPC, PrivilegeLevel::Machine).unwrap()
    );
    assert_eq!(0x8000_0200, hart.registers().pc());
}

#[test]
fn traps_from_m_mode_never_delegate() {
    let (_bus, mut machine) = small_machine();
    machine
        .load_image(RAM_BASE, &0x0010_0073u32.to_le_bytes())
        .unwrap(); // ebreak
    let hart = &mut machine.harts_mut()[0];
    hart.write_csr(csr::MEDELEG, PrivilegeLevel::Machine, 1 << 3, !0)
        .unwrap();

    hart.step(); // ebreak from M-mode
    assert_eq!(PrivilegeLevel::Machine, hart.privilege_mode());
    assert_eq!(
        3,
        hart.read_csr(csr::MCAUSE, PrivilegeLevel::Machine).unwrap()
    );
}
