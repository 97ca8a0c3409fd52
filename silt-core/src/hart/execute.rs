use log::trace;

use super::mmu::MemoryError;
use super::trap::Exception;
use super::{CsrSpecifier, ExecutionResult, Hart};
use crate::instruction::{
    AmoOp, BranchCondition, CsrOp, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp,
    StoreWidth,
};
use crate::registers::Specifier;
use crate::{Alignment, PrivilegeLevel, RawPrivilegeLevel};

/// Executes one decoded instruction against a hart.
///
/// `length` is the encoded length in bytes (2 for expanded compressed forms, 4 otherwise); it
/// determines how far pc advances and the link value of jumps.
#[derive(Debug)]
pub(super) struct Executor<'h> {
    pub hart: &'h mut Hart,
    pub length: u32,
}

impl<'h> Executor<'h> {
    pub fn execute(mut self, instruction: Instruction) -> ExecutionResult {
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                trace!("Executing {op:?} {dest} {src} {immediate}");
                self.reg_imm_op(dest, src, immediate, |s, imm| match op {
                    RegImmOp::Addi => s.wrapping_add_signed(imm),
                    RegImmOp::Slti => ((s as i32) < imm) as u32,
                    RegImmOp::Sltiu => (s < imm as u32) as u32,
                    RegImmOp::Xori => s ^ imm as u32,
                    RegImmOp::Ori => s | imm as u32,
                    RegImmOp::Andi => s & imm as u32,
                })
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u5,
            } => {
                trace!("Executing {op:?} {dest} {src} {shift_amount_u5}");
                self.reg_imm_op(dest, src, 0, |s, _| match op {
                    RegShiftImmOp::Slli => s << shift_amount_u5,
                    RegShiftImmOp::Srli => s >> shift_amount_u5,
                    RegShiftImmOp::Srai => ((s as i32) >> shift_amount_u5) as u32,
                })
            }
            Instruction::Auipc { dest, immediate } => self.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => self.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                trace!("Executing {op:?} {dest} {src1} {src2}");
                self.reg_reg_op(dest, src1, src2, |s1, s2| alu_op(op, s1, s2))
            }
            Instruction::Jal { dest, offset } => self.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => self.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                trace!("Executing {condition:?} {src1} {src2} {offset}");
                self.cond_branch(src1, src2, offset, |s1, s2| match condition {
                    BranchCondition::Beq => s1 == s2,
                    BranchCondition::Bne => s1 != s2,
                    BranchCondition::Blt => (s1 as i32) < (s2 as i32),
                    BranchCondition::Bltu => s1 < s2,
                    BranchCondition::Bge => (s1 as i32) >= (s2 as i32),
                    BranchCondition::Bgeu => s1 >= s2,
                })
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => self.load(width, dest, base, offset),
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => self.store(width, src, base, offset),
            Instruction::Amo {
                op,
                aq: _,
                rl: _,
                src,
                addr,
                dest,
            } => match op {
                // All host atomics are sequentially consistent, which satisfies any aq/rl
                // combination.
                AmoOp::Lr => self.lr(dest, addr),
                AmoOp::Sc => self.sc(dest, src, addr),
                _ => self.amo_op(op, dest, src, addr),
            },
            Instruction::Fence => self.fence(),
            Instruction::Ecall => self.ecall(),
            Instruction::Ebreak => self.ebreak(),
            Instruction::Sret => self.sret(),
            Instruction::Mret => self.mret(),
            Instruction::Wfi => self.wfi(),
            Instruction::SfenceVma { vaddr, asid } => self.sfence_vma(vaddr, asid),
            Instruction::Csr { op, dest, csr, src } => {
                trace!("Executing {op:?} {dest} {csr:#05x} {src}");
                self.csr_op(
                    op,
                    dest,
                    csr,
                    (op == CsrOp::ReadWrite || src != Specifier::X0)
                        .then(|| self.hart.registers.x(src)),
                )
            }
            Instruction::Csri {
                op,
                dest,
                csr,
                immediate,
            } => {
                trace!("Executing {op:?} {dest} {csr:#05x} {immediate}");
                self.csr_op(
                    op,
                    dest,
                    csr,
                    (op == CsrOp::ReadWrite || immediate != 0).then_some(immediate),
                )
            }
        }
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) is used to build 32-bit constants and uses the U-type
    /// > format. LUI places the U-immediate value in the top 20 bits of the destination register
    /// > rd, filling in the lowest 12 bits with zeros.
    fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing lui {dest} {immediate}");
        let result = immediate as u32 & !0xFFF;
        self.hart.registers.set_x(dest, result);
        self.increment_pc();
        Ok(())
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) is used to build pc-relative addresses [...]. AUIPC
    /// > forms a 32-bit offset from the 20-bit U-immediate, filling in the lowest 12 bits with
    /// > zeros, adds this offset to the address of the AUIPC instruction, then places the result
    /// > in register rd.
    fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing auipc {dest} {immediate}");
        let registers = &mut self.hart.registers;
        let result = registers.pc().wrapping_add_signed(immediate & !0xFFF);
        registers.set_x(dest, result);
        self.increment_pc();
        Ok(())
    }

    fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing jal {dest} {offset}");
        self.jump_op(dest, |registers| registers.pc().wrapping_add_signed(offset))
    }

    fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing jalr {dest} {base} {offset}");
        self.jump_op(dest, |registers| {
            registers.x(base).wrapping_add_signed(offset) & !1
        })
    }

    fn load(
        &mut self,
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        trace!("Executing {width:?} {dest} {offset}({base})");
        let address = self.hart.registers.x(base).wrapping_add_signed(offset);
        let value = match width {
            LoadWidth::Lb => self.hart.read_byte(address).map(|v| v as i8 as u32),
            LoadWidth::Lbu => self.hart.read_byte(address).map(u32::from),
            LoadWidth::Lh => self.hart.read_halfword(address).map(|v| v as i16 as u32),
            LoadWidth::Lhu => self.hart.read_halfword(address).map(u32::from),
            LoadWidth::Lw => self.hart.read_word(address),
        }
        .map_err(|err| load_error(err, address))?;
        self.hart.registers.set_x(dest, value);
        self.increment_pc();
        Ok(())
    }

    fn store(
        &mut self,
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        trace!("Executing {width:?} {src} {offset}({base})");
        let address = self.hart.registers.x(base).wrapping_add_signed(offset);
        let value = self.hart.registers.x(src);
        match width {
            StoreWidth::Sb => self.hart.write_byte(address, value as u8),
            StoreWidth::Sh => self.hart.write_halfword(address, value as u16),
            StoreWidth::Sw => self.hart.write_word(address, value),
        }
        .map_err(|err| store_error(err, address))?;
        self.increment_pc();
        Ok(())
    }

    /// Executes an `lr.w` instruction.
    ///
    /// > LR.W loads a word from the address in rs1, places the sign-extended value in rd, and
    /// > registers a reservation set [...] that subsumes the bytes in the addressed word.
    ///
    /// The reservation is word-granular and tracks the *physical* word, so it also covers
    /// aliased virtual mappings.
    fn lr(&mut self, dest: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing lr.w {dest}, ({addr})");
        let address = self.hart.registers.x(addr);
        let physical_address = self
            .hart
            .translate_reserved(address)
            .map_err(|err| load_error(err, address))?;
        let value = self
            .hart
            .bus
            .fetch_update_word(physical_address, |v| v)
            .map_err(|_| Exception::LoadAccessFault(address))?;
        self.hart.reservation = Some(physical_address);
        self.hart.registers.set_x(dest, value);
        self.increment_pc();
        Ok(())
    }

    /// Executes an `sc.w` instruction.
    ///
    /// > SC.W conditionally writes a word in rs2 to the address in rs1: the SC.W succeeds only
    /// > if the reservation is still valid [...]. If the SC.W succeeds, [...] rd is set to zero.
    /// > If the SC.W fails, [...] rd is set to a nonzero value.
    ///
    /// The reservation is invalidated by any SC, successful or not.
    fn sc(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing sc.w {dest}, {src}, ({addr})");
        let address = self.hart.registers.x(addr);
        let physical_address = self
            .hart
            .translate_amo(address)
            .map_err(|err| store_error(err, address))?;
        let value = self.hart.registers.x(src);
        let result = match self.hart.reservation.take() == Some(physical_address) {
            true => {
                self.hart
                    .bus
                    .fetch_update_word(physical_address, |_| value)
                    .map_err(|_| Exception::StoreOrAmoAccessFault(address))?;
                0
            }
            false => 1,
        };
        self.hart.registers.set_x(dest, result);
        self.increment_pc();
        Ok(())
    }

    /// Executes an AMO instruction: an atomic read-modify-write of the aligned word at the
    /// address in rs1, returning the old value in rd.
    fn amo_op(
        &mut self,
        op: AmoOp,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amo{op:?}.w {dest}, {src}, ({addr})");
        let address = self.hart.registers.x(addr);
        let physical_address = self
            .hart
            .translate_amo(address)
            .map_err(|err| store_error(err, address))?;
        // An AMO is a store by this hart, so it breaks this hart's own reservation on the word.
        self.hart.clear_reservation_on_store(physical_address);
        let src_value = self.hart.registers.x(src);
        let old_value = self
            .hart
            .bus
            .fetch_update_word(physical_address, |mem| match op {
                AmoOp::Swap => src_value,
                AmoOp::Add => mem.wrapping_add(src_value),
                AmoOp::Xor => mem ^ src_value,
                AmoOp::And => mem & src_value,
                AmoOp::Or => mem | src_value,
                AmoOp::Min => (mem as i32).min(src_value as i32) as u32,
                AmoOp::Max => (mem as i32).max(src_value as i32) as u32,
                AmoOp::Minu => mem.min(src_value),
                AmoOp::Maxu => mem.max(src_value),
                AmoOp::Lr | AmoOp::Sc => unreachable!(), // Dispatched separately
            })
            .map_err(|_| Exception::StoreOrAmoAccessFault(address))?;
        self.hart.registers.set_x(dest, old_value);
        self.increment_pc();
        Ok(())
    }

    fn fence(&mut self) -> ExecutionResult {
        trace!("Executing fence");
        // All guest-visible memory operations go through sequentially consistent or acquire/
        // release host atomics, so a fence needs no additional ordering.
        self.increment_pc();
        Ok(())
    }

    fn ecall(&mut self) -> ExecutionResult {
        trace!("Executing ecall");
        match self.hart.privilege_mode {
            PrivilegeLevel::User => Err(Exception::EnvironmentCallFromUMode),
            PrivilegeLevel::Supervisor => Err(Exception::EnvironmentCallFromSMode),
            PrivilegeLevel::Machine => Err(Exception::EnvironmentCallFromMMode),
        }
    }

    fn ebreak(&mut self) -> ExecutionResult {
        trace!("Executing ebreak");
        Err(Exception::Breakpoint)
    }

    /// Executes an `sret` instruction.
    ///
    /// Restores the S-level interrupt-enable stack (SIE from SPIE, SPIE set), drops to the
    /// privilege level in SPP, and returns to sepc.
    fn sret(&mut self) -> ExecutionResult {
        trace!("Executing sret");
        if self.hart.privilege_mode < PrivilegeLevel::Supervisor {
            return Err(Exception::IllegalInstruction(None));
        }
        if self.hart.privilege_mode == PrivilegeLevel::Supervisor && self.hart.status.tsr() {
            return Err(Exception::IllegalInstruction(None));
        }
        let status = &mut self.hart.status;
        let pp = status.spp();
        status.set_sie(status.spie());
        status.set_spie(true);
        status.set_spp(RawPrivilegeLevel::User);
        // Leaving M-mode always clears MPRV; sret can only leave M towards S/U.
        if pp != PrivilegeLevel::Machine {
            status.set_mprv(false);
        }
        self.hart.privilege_mode = pp;
        *self.hart.registers.pc_mut() = self.hart.trap.read_sepc();
        Ok(())
    }

    /// Executes an `mret` instruction.
    ///
    /// Restores the M-level interrupt-enable stack (MIE from MPIE, MPIE set), drops to the
    /// privilege level in MPP, and returns to mepc.
    fn mret(&mut self) -> ExecutionResult {
        trace!("Executing mret");
        if self.hart.privilege_mode < PrivilegeLevel::Machine {
            return Err(Exception::IllegalInstruction(None));
        }
        let status = &mut self.hart.status;
        let pp = status.mpp();
        status.set_mie(status.mpie());
        status.set_mpie(true);
        status.set_mpp(RawPrivilegeLevel::User);
        if pp != PrivilegeLevel::Machine {
            status.set_mprv(false);
        }
        self.hart.privilege_mode = pp;
        *self.hart.registers.pc_mut() = self.hart.trap.read_mepc();
        Ok(())
    }

    /// Executes a `wfi` instruction.
    ///
    /// pc is advanced *before* the hart parks, so the interrupt that eventually wakes the hart
    /// returns past the WFI instead of re-executing it.
    fn wfi(&mut self) -> ExecutionResult {
        trace!("Executing wfi");
        if self.hart.privilege_mode < PrivilegeLevel::Machine && self.hart.status.tw() {
            return Err(Exception::IllegalInstruction(None));
        }
        self.increment_pc();
        self.hart.waiting = true;
        Ok(())
    }

    fn sfence_vma(&mut self, vaddr: Specifier, asid: Specifier) -> ExecutionResult {
        trace!("Executing sfence.vma {vaddr} {asid}");
        if self.hart.privilege_mode < PrivilegeLevel::Supervisor {
            return Err(Exception::IllegalInstruction(None));
        }
        if self.hart.privilege_mode == PrivilegeLevel::Supervisor && self.hart.status.tvm() {
            return Err(Exception::IllegalInstruction(None));
        }
        // Address- and ASID-targeted invalidation is implemented as a full flush, which the
        // privileged architecture permits.
        let _ = (vaddr, asid);
        self.hart.tlb.flush();
        self.increment_pc();
        Ok(())
    }

    // Private generic implementations

    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let registers = &mut self.hart.registers;
        registers.set_x(dest, op(registers.x(src), immediate));
        self.increment_pc();
        Ok(())
    }

    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = &mut self.hart.registers;
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        self.increment_pc();
        Ok(())
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&crate::registers::Registers) -> u32,
    {
        let registers = &mut self.hart.registers;
        let new_pc = compute_target(registers);
        // IALIGN is 16 since the C extension is implemented.
        if !Alignment::HALFWORD.is_aligned(new_pc) {
            return Err(Exception::InstructionAddressMisaligned(new_pc));
        }
        let old_pc = std::mem::replace(registers.pc_mut(), new_pc);
        // Write the address of the next instruction to the `dest` register.
        registers.set_x(dest, old_pc.wrapping_add(self.length));
        Ok(())
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let registers = &mut self.hart.registers;
        if predicate(registers.x(src1), registers.x(src2)) {
            let new_pc = registers.pc().wrapping_add_signed(offset);
            if !Alignment::HALFWORD.is_aligned(new_pc) {
                return Err(Exception::InstructionAddressMisaligned(new_pc));
            }
            *registers.pc_mut() = new_pc;
        } else {
            self.increment_pc();
        }
        Ok(())
    }

    /// Common implementation of the six CSR instruction forms.
    ///
    /// > If rd=x0, then CSRRW shall not read the CSR and shall not cause any of the side effects
    /// > that might occur on a CSR read. [...] For both CSRRS and CSRRC, if rs1=x0, then the
    /// > instruction will not write to the CSR at all.
    ///
    /// `src_value` is `None` when the write side must be skipped per those rules; the caller
    /// has already applied the rd/rs1 conditions.
    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src_value: Option<u32>,
    ) -> ExecutionResult {
        // The privilege level is latched before the read, since a CSR operation is atomic: both
        // halves are performed at the same, original privilege level.
        let privilege_level = self.hart.privilege_mode;
        if op != CsrOp::ReadWrite || dest != Specifier::X0 {
            let old_value = self
                .hart
                .read_csr(csr, privilege_level)
                .map_err(|_| Exception::IllegalInstruction(None))?;
            self.hart.registers.set_x(dest, old_value);
        };
        if let Some(src_value) = src_value {
            let (value, mask) = match op {
                CsrOp::ReadWrite => (src_value, 0xFFFF_FFFF),
                CsrOp::ReadSet => (0xFFFF_FFFF, src_value),
                CsrOp::ReadClear => (0x0000_0000, src_value),
            };
            self.hart
                .write_csr(csr, privilege_level, value, mask)
                .map_err(|_| Exception::IllegalInstruction(None))?;
        }
        self.increment_pc();
        Ok(())
    }

    fn increment_pc(&mut self) {
        let pc = self.hart.registers.pc_mut();
        *pc = pc.wrapping_add(self.length);
    }
}

/// Integer register-register operations, including the M extension.
///
/// > The quotient of division by zero has all bits set, and the remainder of division by zero
/// > equals the dividend. Signed division overflow occurs only when the most-negative integer is
/// > divided by -1. The quotient of a signed division with overflow is equal to the dividend,
/// > and the remainder is zero.
fn alu_op(op: RegRegOp, s1: u32, s2: u32) -> u32 {
    match op {
        RegRegOp::Add => s1.wrapping_add(s2),
        RegRegOp::Sub => s1.wrapping_sub(s2),
        RegRegOp::Slt => ((s1 as i32) < (s2 as i32)) as u32,
        RegRegOp::Sltu => (s1 < s2) as u32,
        RegRegOp::And => s1 & s2,
        RegRegOp::Or => s1 | s2,
        RegRegOp::Xor => s1 ^ s2,
        RegRegOp::Sll => s1 << (s2 & 0x1F),
        RegRegOp::Srl => s1 >> (s2 & 0x1F),
        RegRegOp::Sra => ((s1 as i32) >> (s2 & 0x1F)) as u32,
        RegRegOp::Mul => s1.wrapping_mul(s2),
        RegRegOp::Mulh => ((s1 as i32 as i64 * s2 as i32 as i64) >> 32) as u32,
        RegRegOp::Mulhsu => ((s1 as i32 as i64 * s2 as i64) >> 32) as u32,
        RegRegOp::Mulhu => ((s1 as u64 * s2 as u64) >> 32) as u32,
        RegRegOp::Div => match s2 == 0 {
            true => 0xFFFF_FFFF,
            false => (s1 as i32).overflowing_div(s2 as i32).0 as u32,
        },
        RegRegOp::Divu => s1.checked_div(s2).unwrap_or(0xFFFF_FFFF),
        RegRegOp::Rem => match s2 == 0 {
            true => s1,
            false => (s1 as i32).overflowing_rem(s2 as i32).0 as u32,
        },
        RegRegOp::Remu => s1.checked_rem(s2).unwrap_or(s1),
    }
}

fn load_error(err: MemoryError, address: u32) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::LoadAddressMisaligned(address),
        MemoryError::AccessFault => Exception::LoadAccessFault(address),
        MemoryError::PageFault => Exception::LoadPageFault(address),
    }
}

fn store_error(err: MemoryError, address: u32) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::StoreOrAmoAddressMisaligned(address),
        MemoryError::AccessFault => Exception::StoreOrAmoAccessFault(address),
        MemoryError::PageFault => Exception::StoreOrAmoPageFault(address),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{csr, Config};
    use super::*;
    use crate::hart::timer::{Clock, Timer};
    use crate::instruction::Instruction;
    use crate::memory::PhysMemory;
    use crate::system_bus::SystemBus;
    use std::sync::Arc;

    const RAM_BASE: u32 = 0x8000_0000;

    fn test_hart() -> Hart {
        let bus = Arc::new(SystemBus::new(PhysMemory::new(RAM_BASE, 0x10000).unwrap()));
        let timer = Arc::new(Timer::new(Arc::new(Clock::new())));
        Hart::new(
            Config {
                hart_id: 0,
                reset_vector: RAM_BASE,
            },
            bus,
            timer,
        )
    }

    fn execute_raw(hart: &mut Hart, raw: u32) -> ExecutionResult {
        let instruction = Instruction::decode(raw).unwrap();
        hart.execute_instruction(instruction, 4)
    }

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    #[test]
    fn test_register_zero_stays_zero() {
        let mut hart = test_hart();
        // addi x0, x0, 42
        execute_raw(&mut hart, 0x02A0_0013).unwrap();
        assert_eq!(0, hart.registers().x(x(0)));
        assert_eq!(RAM_BASE + 4, hart.registers().pc());
    }

    #[test]
    fn test_addi() {
        let mut hart = test_hart();
        // addi x1, x0, 42
        execute_raw(&mut hart, 0x02A0_0093).unwrap();
        assert_eq!(42, hart.registers().x(x(1)));
    }

    #[test]
    fn test_division_edge_cases() {
        assert_eq!(0xFFFF_FFFF, alu_op(RegRegOp::Div, 5, 0));
        assert_eq!(5, alu_op(RegRegOp::Rem, 5, 0));
        assert_eq!(0xFFFF_FFFF, alu_op(RegRegOp::Divu, 5, 0));
        assert_eq!(5, alu_op(RegRegOp::Remu, 5, 0));
        // INT_MIN / -1 overflows to INT_MIN with remainder 0.
        assert_eq!(
            0x8000_0000,
            alu_op(RegRegOp::Div, 0x8000_0000, 0xFFFF_FFFF)
        );
        assert_eq!(0, alu_op(RegRegOp::Rem, 0x8000_0000, 0xFFFF_FFFF));
    }

    #[test]
    fn test_mulh_variants() {
        assert_eq!(0xFFFF_FFFF, alu_op(RegRegOp::Mulh, 0xFFFF_FFFF, 2));
        assert_eq!(1, alu_op(RegRegOp::Mulhu, 0xFFFF_FFFF, 2));
        assert_eq!(0xFFFF_FFFF, alu_op(RegRegOp::Mulhsu, 0xFFFF_FFFF, 2));
    }

    #[test]
    fn test_load_store_round_trip() {
        let mut hart = test_hart();
        hart.registers_mut().set_x(x(1), RAM_BASE + 0x1000);
        hart.registers_mut().set_x(x(2), 0xCAFE_BABE);
        // sw x2, 0(x1); lw x3, 0(x1)
        execute_raw(&mut hart, 0x0020_A023).unwrap();
        execute_raw(&mut hart, 0x0000_A183).unwrap();
        assert_eq!(0xCAFE_BABE, hart.registers().x(x(3)));
    }

    #[test]
    fn test_misaligned_load_traps() {
        let mut hart = test_hart();
        hart.registers_mut().set_x(x(1), RAM_BASE + 2);
        // lw x3, 0(x1)
        assert_eq!(
            Err(Exception::LoadAddressMisaligned(RAM_BASE + 2)),
            execute_raw(&mut hart, 0x0000_A183)
        );
    }

    #[test]
    fn test_store_outside_memory_faults() {
        let mut hart = test_hart();
        hart.registers_mut().set_x(x(1), 0x4000_0000);
        // sw x2, 0(x1)
        assert_eq!(
            Err(Exception::StoreOrAmoAccessFault(0x4000_0000)),
            execute_raw(&mut hart, 0x0020_A023)
        );
    }

    #[test]
    fn test_jal_links_past_instruction() {
        let mut hart = test_hart();
        // jal x1, 2048
        execute_raw(&mut hart, 0x0010_00EF).unwrap();
        assert_eq!(RAM_BASE + 2048, hart.registers().pc());
        assert_eq!(RAM_BASE + 4, hart.registers().x(x(1)));
    }

    #[test]
    fn test_compressed_length_advances_pc_by_two() {
        let mut hart = test_hart();
        // c.li x5, 7
        let instruction = Instruction::decode_compressed(0x429D).unwrap();
        hart.execute_instruction(instruction, 2).unwrap();
        assert_eq!(7, hart.registers().x(x(5)));
        assert_eq!(RAM_BASE + 2, hart.registers().pc());
        // c.add x5, x5
        let instruction = Instruction::decode_compressed(0x9296).unwrap();
        hart.execute_instruction(instruction, 2).unwrap();
        assert_eq!(14, hart.registers().x(x(5)));
        assert_eq!(RAM_BASE + 4, hart.registers().pc());
    }

    #[test]
    fn test_lr_sc_round_trip() {
        let mut hart = test_hart();
        hart.registers_mut().set_x(x(1), RAM_BASE + 0x100);
        hart.registers_mut().set_x(x(2), 7);
        // lr.w x3, (x1)
        execute_raw(&mut hart, 0x1000_A1AF).unwrap();
        assert_eq!(0, hart.registers().x(x(3)));
        // sc.w x4, x2, (x1) succeeds
        execute_raw(&mut hart, 0x1820_A22F).unwrap();
        assert_eq!(0, hart.registers().x(x(4)));
        assert_eq!(Some(7), hart.bus().ram().load_word(RAM_BASE + 0x100));
        // A second sc.w fails: the first one consumed the reservation.
        execute_raw(&mut hart, 0x1820_A22F).unwrap();
        assert_eq!(1, hart.registers().x(x(4)));
    }

    #[test]
    fn test_amo_breaks_reservation() {
        let mut hart = test_hart();
        hart.registers_mut().set_x(x(1), RAM_BASE + 0x100);
        hart.registers_mut().set_x(x(2), 1);
        // lr.w x3, (x1)
        execute_raw(&mut hart, 0x1000_A1AF).unwrap();
        // amoadd.w x5, x2, (x1)
        execute_raw(&mut hart, 0x0020_A2AF).unwrap();
        assert_eq!(0, hart.registers().x(x(5)));
        assert_eq!(Some(1), hart.bus().ram().load_word(RAM_BASE + 0x100));
        // sc.w x4, x2, (x1) fails: the AMO was a store to the reserved word.
        execute_raw(&mut hart, 0x1820_A22F).unwrap();
        assert_eq!(1, hart.registers().x(x(4)));
    }

    #[test]
    fn test_plain_store_breaks_reservation() {
        let mut hart = test_hart();
        hart.registers_mut().set_x(x(1), RAM_BASE + 0x100);
        hart.registers_mut().set_x(x(2), 7);
        // lr.w x3, (x1)
        execute_raw(&mut hart, 0x1000_A1AF).unwrap();
        // sw x2, 0(x1)
        execute_raw(&mut hart, 0x0020_A023).unwrap();
        // sc.w x4, x2, (x1) fails
        execute_raw(&mut hart, 0x1820_A22F).unwrap();
        assert_eq!(1, hart.registers().x(x(4)));
    }

    #[test]
    fn test_wfi_advances_pc_and_parks() {
        let mut hart = test_hart();
        execute_raw(&mut hart, 0x1050_0073).unwrap();
        assert!(hart.is_waiting());
        assert_eq!(RAM_BASE + 4, hart.registers().pc());
    }

    #[test]
    fn test_csrrw_mscratch_round_trip() {
        let mut hart = test_hart();
        hart.registers_mut().set_x(x(1), 0x1234_5678);
        // csrrw x2, mscratch, x1
        execute_raw(&mut hart, 0x3400_9173).unwrap();
        assert_eq!(0, hart.registers().x(x(2)));
        // csrrs x3, mscratch, x0
        execute_raw(&mut hart, 0x3400_21F3).unwrap();
        assert_eq!(0x1234_5678, hart.registers().x(x(3)));
    }

    #[test]
    fn test_csr_write_to_read_only_traps() {
        let mut hart = test_hart();
        // csrrw x0, mhartid, x1
        assert_eq!(
            Err(Exception::IllegalInstruction(None)),
            execute_raw(&mut hart, 0xF140_9073)
        );
    }

    #[test]
    fn test_mret_restores_privilege_and_pc() {
        let mut hart = test_hart();
        hart.write_csr(csr::MEPC, PrivilegeLevel::Machine, RAM_BASE + 0x40, !0)
            .unwrap();
        // MPP defaults to U; mret must drop to U-mode and re-enable MPIE.
        execute_raw(&mut hart, 0x3020_0073).unwrap();
        assert_eq!(PrivilegeLevel::User, hart.privilege_mode());
        assert_eq!(RAM_BASE + 0x40, hart.registers().pc());
        // Now mret from U-mode is illegal.
        assert_eq!(
            Err(Exception::IllegalInstruction(None)),
            execute_raw(&mut hart, 0x3020_0073)
        );
    }

    #[test]
    fn test_ecall_reports_current_mode() {
        let mut hart = test_hart();
        assert_eq!(
            Err(Exception::EnvironmentCallFromMMode),
            execute_raw(&mut hart, 0x0000_0073)
        );
    }

    #[test]
    fn test_sfence_vma_illegal_in_user_mode() {
        let mut hart = test_hart();
        hart.write_csr(csr::MEPC, PrivilegeLevel::Machine, RAM_BASE, !0)
            .unwrap();
        execute_raw(&mut hart, 0x3020_0073).unwrap(); // mret to U-mode
        assert_eq!(
            Err(Exception::IllegalInstruction(None)),
            execute_raw(&mut hart, 0x1200_0073)
        );
    }
}
