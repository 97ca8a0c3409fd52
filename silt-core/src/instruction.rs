use crate::hart::csr::CsrSpecifier;
use crate::registers::Specifier;
use log::trace;
use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
///
/// Compressed (16-bit) instructions decode to the same variants as the 32-bit instruction they
/// expand to; only the fetch unit needs to remember the encoded length.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    },
    Auipc {
        dest: Specifier,
        immediate: i32,
    },
    Lui {
        dest: Specifier,
        immediate: i32,
    },
    Amo {
        op: AmoOp,
        aq: bool,
        rl: bool,
        src: Specifier,
        addr: Specifier,
        dest: Specifier,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i32,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    Fence,
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Wfi,
    SfenceVma {
        vaddr: Specifier,
        asid: Specifier,
    },
    Csr {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    },
    Csri {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoOp {
    Lr,
    Sc,
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    /// Atomic Read/Write CSR.
    ReadWrite,
    /// Atomic Read and Set Bits in CSR.
    ReadSet,
    /// Atomic Read and Clear Bits in CSR.
    ReadClear,
}

/// Returns `true` if the 16-bit parcel starts a compressed instruction rather than the low half
/// of a 32-bit one.
pub fn is_compressed(first_parcel: u16) -> bool {
    first_parcel & 0b11 != 0b11
}

impl Instruction {
    pub fn decode(raw_instruction: u32) -> Result<Self, DecodeError> {
        trace!("Decoding instruction {raw_instruction:#010x}");
        match opcode(raw_instruction).ok_or(DecodeError::UnsupportedOpcode)? {
            Opcode::OpImm => match i_funct(raw_instruction) {
                Some(op) => Ok(Self::OpImm {
                    op,
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate: i_imm(raw_instruction),
                }),
                None => match i_shfunct(raw_instruction) {
                    Some(op) => Ok(Self::OpShiftImm {
                        op,
                        dest: rd(raw_instruction),
                        src: rs1(raw_instruction),
                        shift_amount_u5: shamt(raw_instruction),
                    }),
                    None => Err(DecodeError::IllegalInstruction),
                },
            },
            Opcode::Auipc => Ok(Self::Auipc {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Lui => Ok(Self::Lui {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Amo => match amo_op(raw_instruction) {
                Some(op) => Ok(Self::Amo {
                    op,
                    aq: amo_aq(raw_instruction),
                    rl: amo_rl(raw_instruction),
                    src: rs2(raw_instruction),
                    addr: rs1(raw_instruction),
                    dest: rd(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Op => match r_funct(raw_instruction) {
                Some(op) => Ok(Self::Op {
                    op,
                    dest: rd(raw_instruction),
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Jal => Ok(Self::Jal {
                dest: rd(raw_instruction),
                offset: j_imm(raw_instruction),
            }),
            Opcode::Jalr => Ok(Self::Jalr {
                dest: rd(raw_instruction),
                base: rs1(raw_instruction),
                offset: i_imm(raw_instruction),
            }),
            Opcode::Branch => match b_funct(raw_instruction) {
                Some(condition) => Ok(Self::Branch {
                    condition,
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                    offset: b_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Load => match i_width(raw_instruction) {
                Some(width) => Ok(Self::Load {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Store => match s_width(raw_instruction) {
                Some(width) => Ok(Self::Store {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::MiscMem => {
                match funct3(raw_instruction) {
                    // All unused fields in the FENCE encoding (fm, predecessor, successor, rs1,
                    // rd) are reserved for future use and must be treated as a normal fence for
                    // forward compatibility. Ordering is a decode-level no-op for this machine,
                    // so the fields are not even extracted.
                    0b000 => Ok(Self::Fence),
                    _ => Err(DecodeError::IllegalInstruction),
                }
            }
            Opcode::System => match i_sys(raw_instruction) {
                Some(sys) => match sys {
                    SysFunct::Priv => match sys_priv(raw_instruction) {
                        Some(sys_priv) => Ok(match sys_priv {
                            SysPriv::Ecall => Self::Ecall,
                            SysPriv::Ebreak => Self::Ebreak,
                            SysPriv::Sret => Self::Sret,
                            SysPriv::Mret => Self::Mret,
                            SysPriv::Wfi => Self::Wfi,
                            SysPriv::SfenceVma => Self::SfenceVma {
                                vaddr: rs1(raw_instruction),
                                asid: rs2(raw_instruction),
                            },
                        }),
                        None => Err(DecodeError::IllegalInstruction),
                    },
                    SysFunct::Csrrw | SysFunct::Csrrs | SysFunct::Csrrc => {
                        Ok(Instruction::Csr {
                            op: match sys {
                                SysFunct::Csrrw => CsrOp::ReadWrite,
                                SysFunct::Csrrs => CsrOp::ReadSet,
                                SysFunct::Csrrc => CsrOp::ReadClear,
                                _ => unreachable!(), // Already checked in outer match
                            },
                            dest: rd(raw_instruction),
                            csr: csr(raw_instruction),
                            src: rs1(raw_instruction),
                        })
                    }
                    SysFunct::Csrrwi | SysFunct::Csrrsi | SysFunct::Csrrci => {
                        Ok(Instruction::Csri {
                            op: match sys {
                                SysFunct::Csrrwi => CsrOp::ReadWrite,
                                SysFunct::Csrrsi => CsrOp::ReadSet,
                                SysFunct::Csrrci => CsrOp::ReadClear,
                                _ => unreachable!(), // Already checked in outer match
                            },
                            dest: rd(raw_instruction),
                            csr: csr(raw_instruction),
                            immediate: u32::from(rs1(raw_instruction)),
                        })
                    }
                },
                None => Err(DecodeError::IllegalInstruction),
            },
        }
    }

    /// Decodes a 16-bit compressed instruction into the 32-bit instruction it expands to.
    ///
    /// All RV32C encodings are supported. Floating-point forms (C.FLW and friends) and RV64-only
    /// forms decode as illegal, as do the encodings the C extension reserves (including the
    /// all-zero parcel).
    pub fn decode_compressed(raw_instruction: u16) -> Result<Self, DecodeError> {
        trace!("Decoding compressed instruction {raw_instruction:#06x}");
        let quadrant = raw_instruction & 0b11;
        let funct3 = (raw_instruction >> 13) & 0b111;
        match (quadrant, funct3) {
            (0b00, 0b000) => {
                // C.ADDI4SPN. The all-zero parcel falls in here and is caught by the zero
                // immediate check.
                let uimm = c_addi4spn_imm(raw_instruction);
                if uimm == 0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                Ok(Self::OpImm {
                    op: RegImmOp::Addi,
                    dest: c_rd_short(raw_instruction),
                    src: Specifier::X2,
                    immediate: uimm as i32,
                })
            }
            (0b00, 0b010) => Ok(Self::Load {
                // C.LW
                width: LoadWidth::Lw,
                dest: c_rd_short(raw_instruction),
                base: c_rs1_short(raw_instruction),
                offset: c_mem_imm(raw_instruction) as i32,
            }),
            (0b00, 0b110) => Ok(Self::Store {
                // C.SW
                width: StoreWidth::Sw,
                src: c_rd_short(raw_instruction),
                base: c_rs1_short(raw_instruction),
                offset: c_mem_imm(raw_instruction) as i32,
            }),
            (0b01, 0b000) => Ok(Self::OpImm {
                // C.ADDI (and C.NOP when rd is x0)
                op: RegImmOp::Addi,
                dest: c_rd_full(raw_instruction),
                src: c_rd_full(raw_instruction),
                immediate: c_imm6(raw_instruction),
            }),
            (0b01, 0b001) => Ok(Self::Jal {
                // C.JAL (RV32 only)
                dest: Specifier::X1,
                offset: c_j_imm(raw_instruction),
            }),
            (0b01, 0b010) => Ok(Self::OpImm {
                // C.LI
                op: RegImmOp::Addi,
                dest: c_rd_full(raw_instruction),
                src: Specifier::X0,
                immediate: c_imm6(raw_instruction),
            }),
            (0b01, 0b011) => {
                let dest = c_rd_full(raw_instruction);
                if dest == Specifier::X2 {
                    // C.ADDI16SP
                    let immediate = c_addi16sp_imm(raw_instruction);
                    if immediate == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::OpImm {
                        op: RegImmOp::Addi,
                        dest: Specifier::X2,
                        src: Specifier::X2,
                        immediate,
                    })
                } else {
                    // C.LUI
                    let immediate = c_lui_imm(raw_instruction);
                    if immediate == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::Lui { dest, immediate })
                }
            }
            (0b01, 0b100) => {
                let dest = c_rs1_short(raw_instruction);
                match (raw_instruction >> 10) & 0b11 {
                    0b00 | 0b01 => {
                        // C.SRLI / C.SRAI. Shift amounts of 32 and up (bit 12 set) are reserved
                        // on RV32.
                        if raw_instruction & 0x1000 != 0 {
                            return Err(DecodeError::IllegalInstruction);
                        }
                        Ok(Self::OpShiftImm {
                            op: match (raw_instruction >> 10) & 0b11 {
                                0b00 => RegShiftImmOp::Srli,
                                _ => RegShiftImmOp::Srai,
                            },
                            dest,
                            src: dest,
                            shift_amount_u5: u32::from((raw_instruction >> 2) & 0x1F),
                        })
                    }
                    0b10 => Ok(Self::OpImm {
                        // C.ANDI
                        op: RegImmOp::Andi,
                        dest,
                        src: dest,
                        immediate: c_imm6(raw_instruction),
                    }),
                    _ => {
                        if raw_instruction & 0x1000 != 0 {
                            // C.SUBW/C.ADDW are RV64-only.
                            return Err(DecodeError::IllegalInstruction);
                        }
                        Ok(Self::Op {
                            op: match (raw_instruction >> 5) & 0b11 {
                                0b00 => RegRegOp::Sub,
                                0b01 => RegRegOp::Xor,
                                0b10 => RegRegOp::Or,
                                _ => RegRegOp::And,
                            },
                            dest,
                            src1: dest,
                            src2: c_rd_short(raw_instruction),
                        })
                    }
                }
            }
            (0b01, 0b101) => Ok(Self::Jal {
                // C.J
                dest: Specifier::X0,
                offset: c_j_imm(raw_instruction),
            }),
            (0b01, 0b110) => Ok(Self::Branch {
                // C.BEQZ
                condition: BranchCondition::Beq,
                src1: c_rs1_short(raw_instruction),
                src2: Specifier::X0,
                offset: c_b_imm(raw_instruction),
            }),
            (0b01, 0b111) => Ok(Self::Branch {
                // C.BNEZ
                condition: BranchCondition::Bne,
                src1: c_rs1_short(raw_instruction),
                src2: Specifier::X0,
                offset: c_b_imm(raw_instruction),
            }),
            (0b10, 0b000) => {
                // C.SLLI. Same RV32 reservation of bit 12 as C.SRLI.
                if raw_instruction & 0x1000 != 0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                let dest = c_rd_full(raw_instruction);
                Ok(Self::OpShiftImm {
                    op: RegShiftImmOp::Slli,
                    dest,
                    src: dest,
                    shift_amount_u5: u32::from((raw_instruction >> 2) & 0x1F),
                })
            }
            (0b10, 0b010) => {
                // C.LWSP
                let dest = c_rd_full(raw_instruction);
                if dest == Specifier::X0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                Ok(Self::Load {
                    width: LoadWidth::Lw,
                    dest,
                    base: Specifier::X2,
                    offset: c_lwsp_imm(raw_instruction) as i32,
                })
            }
            (0b10, 0b100) => {
                let rs1 = c_rd_full(raw_instruction);
                let rs2 = c_rs2_full(raw_instruction);
                match (raw_instruction & 0x1000 != 0, rs1, rs2) {
                    (false, base, Specifier::X0) => {
                        // C.JR
                        if base == Specifier::X0 {
                            return Err(DecodeError::IllegalInstruction);
                        }
                        Ok(Self::Jalr {
                            dest: Specifier::X0,
                            base,
                            offset: 0,
                        })
                    }
                    (false, dest, src2) => Ok(Self::Op {
                        // C.MV
                        op: RegRegOp::Add,
                        dest,
                        src1: Specifier::X0,
                        src2,
                    }),
                    (true, Specifier::X0, Specifier::X0) => Ok(Self::Ebreak),
                    (true, base, Specifier::X0) => Ok(Self::Jalr {
                        // C.JALR
                        dest: Specifier::X1,
                        base,
                        offset: 0,
                    }),
                    (true, dest, src2) => Ok(Self::Op {
                        // C.ADD
                        op: RegRegOp::Add,
                        dest,
                        src1: dest,
                        src2,
                    }),
                }
            }
            (0b10, 0b110) => Ok(Self::Store {
                // C.SWSP
                width: StoreWidth::Sw,
                src: c_rs2_full(raw_instruction),
                base: Specifier::X2,
                offset: c_swsp_imm(raw_instruction) as i32,
            }),
            // The remaining encodings are floating-point load/stores, which are not part of this
            // machine's ISA.
            _ => Err(DecodeError::IllegalInstruction),
        }
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("instruction has unsupported opcode")]
    UnsupportedOpcode,
    #[error("illegal instruction")]
    IllegalInstruction,
}

/// Returns the 7-bit *opcode* value of the instruction, or `None` if it isn't supported.
fn opcode(raw_instruction: u32) -> Option<Opcode> {
    #[allow(clippy::unusual_byte_groupings)]
    match raw_instruction & 0x7F {
        0b00_000_11 => Some(Opcode::Load),
        // LoadFp = 0b00_001_11,
        // custom-0
        0b00_011_11 => Some(Opcode::MiscMem),
        0b00_100_11 => Some(Opcode::OpImm),
        0b00_101_11 => Some(Opcode::Auipc),
        // OP-IMM-32
        // 48b
        0b01_000_11 => Some(Opcode::Store),
        // StoreFp = 0b01_001_11,
        // custom-1
        0b01_011_11 => Some(Opcode::Amo),
        0b01_100_11 => Some(Opcode::Op),
        0b01_101_11 => Some(Opcode::Lui),
        // OP-32
        // 64b
        0b11_000_11 => Some(Opcode::Branch),
        0b11_001_11 => Some(Opcode::Jalr),
        // reserved
        0b11_011_11 => Some(Opcode::Jal),
        0b11_100_11 => Some(Opcode::System),
        // reserved
        // custom-3/rv128
        // >= 80b
        _ => None,
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
fn rd(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
fn rs1(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 15) & 0x1F) as u8)
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
fn rs2(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 20) & 0x1F) as u8)
}

fn csr(raw_instruction: u32) -> CsrSpecifier {
    (raw_instruction >> 20) as u16
}

fn i_funct(raw_instruction: u32) -> Option<RegImmOp> {
    match funct3(raw_instruction) {
        0b000 => Some(RegImmOp::Addi),
        0b010 => Some(RegImmOp::Slti),
        0b011 => Some(RegImmOp::Sltiu),
        0b100 => Some(RegImmOp::Xori),
        0b110 => Some(RegImmOp::Ori),
        0b111 => Some(RegImmOp::Andi),
        _ => None,
    }
}

fn i_shfunct(raw_instruction: u32) -> Option<RegShiftImmOp> {
    let bit30 = (raw_instruction >> 30) & 1;
    match (bit30, funct3(raw_instruction)) {
        (0, 0b001) => Some(RegShiftImmOp::Slli),
        (0, 0b101) => Some(RegShiftImmOp::Srli),
        (1, 0b101) => Some(RegShiftImmOp::Srai),
        _ => None,
    }
}

fn i_sys(raw_instruction: u32) -> Option<SysFunct> {
    match funct3(raw_instruction) {
        0b000 => Some(SysFunct::Priv),
        0b001 => Some(SysFunct::Csrrw),
        0b010 => Some(SysFunct::Csrrs),
        0b011 => Some(SysFunct::Csrrc),
        0b101 => Some(SysFunct::Csrrwi),
        0b110 => Some(SysFunct::Csrrsi),
        0b111 => Some(SysFunct::Csrrci),
        _ => None,
    }
}

fn sys_priv(raw_instruction: u32) -> Option<SysPriv> {
    if u8::from(rd(raw_instruction)) != 0 {
        return None;
    }
    if funct7(raw_instruction) == 0b0001001 {
        return Some(SysPriv::SfenceVma);
    }
    if u8::from(rs1(raw_instruction)) != 0 {
        return None;
    }
    let funct = funct12(raw_instruction);
    if funct >> 11 != 0 {
        // Custom SYSTEM instruction, but none are supported.
        return None;
    }
    match funct {
        0 => Some(SysPriv::Ecall),
        1 => Some(SysPriv::Ebreak),
        _ => match (funct7(raw_instruction), u8::from(rs2(raw_instruction))) {
            (0b0001000, 2) => Some(SysPriv::Sret),
            (0b0011000, 2) => Some(SysPriv::Mret),
            (0b0001000, 5) => Some(SysPriv::Wfi),
            _ => None,
        },
    }
}

fn i_width(raw_instruction: u32) -> Option<LoadWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(LoadWidth::Lb),
        0b001 => Some(LoadWidth::Lh),
        0b010 => Some(LoadWidth::Lw),
        0b100 => Some(LoadWidth::Lbu),
        0b101 => Some(LoadWidth::Lhu),
        _ => None,
    }
}

fn s_width(raw_instruction: u32) -> Option<StoreWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(StoreWidth::Sb),
        0b001 => Some(StoreWidth::Sh),
        0b010 => Some(StoreWidth::Sw),
        _ => None,
    }
}

fn r_funct(raw_instruction: u32) -> Option<RegRegOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b000) => Some(RegRegOp::Add),
        (0b0000000, 0b001) => Some(RegRegOp::Sll),
        (0b0000000, 0b010) => Some(RegRegOp::Slt),
        (0b0000000, 0b011) => Some(RegRegOp::Sltu),
        (0b0000000, 0b100) => Some(RegRegOp::Xor),
        (0b0000000, 0b101) => Some(RegRegOp::Srl),
        (0b0000000, 0b110) => Some(RegRegOp::Or),
        (0b0000000, 0b111) => Some(RegRegOp::And),
        (0b0100000, 0b000) => Some(RegRegOp::Sub),
        (0b0100000, 0b101) => Some(RegRegOp::Sra),
        // funct7 == MULDIV
        (0b0000001, 0b000) => Some(RegRegOp::Mul),
        (0b0000001, 0b001) => Some(RegRegOp::Mulh),
        (0b0000001, 0b010) => Some(RegRegOp::Mulhsu),
        (0b0000001, 0b011) => Some(RegRegOp::Mulhu),
        (0b0000001, 0b100) => Some(RegRegOp::Div),
        (0b0000001, 0b101) => Some(RegRegOp::Divu),
        (0b0000001, 0b110) => Some(RegRegOp::Rem),
        (0b0000001, 0b111) => Some(RegRegOp::Remu),
        _ => None,
    }
}

fn b_funct(raw_instruction: u32) -> Option<BranchCondition> {
    match funct3(raw_instruction) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

fn amo_op(raw_instruction: u32) -> Option<AmoOp> {
    if funct3(raw_instruction) != 0b010 {
        return None;
    }
    match funct7(raw_instruction) >> 2 {
        0b00010 => (rs2(raw_instruction) == Specifier::X0).then_some(AmoOp::Lr),
        0b00011 => Some(AmoOp::Sc),
        0b00001 => Some(AmoOp::Swap),
        0b00000 => Some(AmoOp::Add),
        0b00100 => Some(AmoOp::Xor),
        0b01100 => Some(AmoOp::And),
        0b01000 => Some(AmoOp::Or),
        0b10000 => Some(AmoOp::Min),
        0b10100 => Some(AmoOp::Max),
        0b11000 => Some(AmoOp::Minu),
        0b11100 => Some(AmoOp::Maxu),
        _ => None,
    }
}

fn amo_rl(raw_instruction: u32) -> bool {
    (raw_instruction >> 25) & 0b1 == 1
}

fn amo_aq(raw_instruction: u32) -> bool {
    (raw_instruction >> 26) & 0b1 == 1
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
fn funct3(raw_instruction: u32) -> u8 {
    ((raw_instruction >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
fn funct7(raw_instruction: u32) -> u8 {
    (raw_instruction >> 25) as u8
}

/// Returns the 5-bit *shamt* value for I-type shift instructions.
fn shamt(raw_instruction: u32) -> u32 {
    (raw_instruction >> 20) & 0x1F
}

/// Returns the 12-bit I-immediate sign-extended to 32 bits.
fn i_imm(raw_instruction: u32) -> i32 {
    raw_instruction as i32 >> 20
}

/// Returns the 12-bit I-immediate zero-extended to 32 bits.
fn funct12(raw_instruction: u32) -> u32 {
    raw_instruction >> 20
}

/// Returns the 12-bit S-immediate sign-extended to 32 bits.
fn s_imm(raw_instruction: u32) -> i32 {
    let imm_11_5 = raw_instruction & 0xFE00_0000;
    let imm_4_0 = raw_instruction & 0x0000_0F80;
    (imm_11_5 | (imm_4_0 << 13)) as i32 >> 20
}

/// Returns the 13-bit B-immediate sign-extended to 32 bits.
fn b_imm(raw_instruction: u32) -> i32 {
    let imm_12 = raw_instruction & 0x8000_0000;
    let imm_10_5 = raw_instruction & 0x7E00_0000;
    let imm_4_1 = raw_instruction & 0x0000_0F00;
    let imm_11 = raw_instruction & 0x0000_0080;
    (imm_12 | (imm_11 << 23) | (imm_10_5 >> 1) | (imm_4_1 << 12)) as i32 >> 19
}

/// Returns the signed 32-bit U-immediate.
fn u_imm(raw_instruction: u32) -> i32 {
    (raw_instruction & 0xFFFF_F000) as i32
}

/// Returns the 21-bit J-immediate sign-extended to 32 bits.
fn j_imm(raw_instruction: u32) -> i32 {
    let imm_20 = raw_instruction & 0x8000_0000;
    let imm_10_1 = raw_instruction & 0x7FE0_0000;
    let imm_11 = raw_instruction & 0x0010_0000;
    let imm_19_12 = raw_instruction & 0x000F_F000;
    (imm_20 | (imm_19_12 << 11) | (imm_11 << 2) | (imm_10_1 >> 9)) as i32 >> 11
}

//
// Compressed-form field extraction. Immediate scrambles follow the RVC instruction table;
// comments give the mapping as `instruction bit -> immediate bit`.
//

/// The full 5-bit *rd/rs1* field at bits `11:7` of a compressed instruction.
fn c_rd_full(raw_instruction: u16) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// The full 5-bit *rs2* field at bits `6:2` of a compressed instruction.
fn c_rs2_full(raw_instruction: u16) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 2) & 0x1F) as u8)
}

/// The 3-bit *rd'/rs2'* field at bits `4:2`, naming one of `x8..=x15`.
fn c_rd_short(raw_instruction: u16) -> Specifier {
    Specifier::from_c3(((raw_instruction >> 2) & 0b111) as u8)
}

/// The 3-bit *rs1'* field at bits `9:7`, naming one of `x8..=x15`.
fn c_rs1_short(raw_instruction: u16) -> Specifier {
    Specifier::from_c3(((raw_instruction >> 7) & 0b111) as u8)
}

/// The 6-bit immediate of C.ADDI/C.LI/C.ANDI (`12 -> 5`, `6:2 -> 4:0`), sign-extended.
fn c_imm6(raw_instruction: u16) -> i32 {
    let raw = u32::from(raw_instruction);
    let imm = ((raw >> 7) & 0x20) | ((raw >> 2) & 0x1F);
    ((imm as i32) << 26) >> 26
}

/// The zero-extended C.ADDI4SPN immediate (`12:11 -> 5:4`, `10:7 -> 9:6`, `6 -> 2`, `5 -> 3`).
fn c_addi4spn_imm(raw_instruction: u16) -> u32 {
    let raw = u32::from(raw_instruction);
    ((raw >> 7) & 0x30) | ((raw >> 1) & 0x3C0) | ((raw >> 4) & 0x4) | ((raw >> 2) & 0x8)
}

/// The sign-extended C.ADDI16SP immediate (`12 -> 9`, `6 -> 4`, `5 -> 6`, `4:3 -> 8:7`, `2 -> 5`).
fn c_addi16sp_imm(raw_instruction: u16) -> i32 {
    let raw = u32::from(raw_instruction);
    let imm = ((raw >> 3) & 0x200)
        | ((raw >> 2) & 0x10)
        | ((raw << 1) & 0x40)
        | ((raw << 4) & 0x180)
        | ((raw << 3) & 0x20);
    ((imm as i32) << 22) >> 22
}

/// The sign-extended C.LUI immediate (`12 -> 17`, `6:2 -> 16:12`), already shifted into place.
fn c_lui_imm(raw_instruction: u16) -> i32 {
    let raw = u32::from(raw_instruction);
    let imm = (((raw >> 12) & 0x1) << 17) | (((raw >> 2) & 0x1F) << 12);
    ((imm as i32) << 14) >> 14
}

/// The zero-extended word offset of C.LW/C.SW (`12:10 -> 5:3`, `6 -> 2`, `5 -> 6`).
fn c_mem_imm(raw_instruction: u16) -> u32 {
    let raw = u32::from(raw_instruction);
    ((raw >> 7) & 0x38) | ((raw >> 4) & 0x4) | ((raw << 1) & 0x40)
}

/// The zero-extended word offset of C.LWSP (`12 -> 5`, `6:4 -> 4:2`, `3:2 -> 7:6`).
fn c_lwsp_imm(raw_instruction: u16) -> u32 {
    let raw = u32::from(raw_instruction);
    ((raw >> 7) & 0x20) | ((raw >> 2) & 0x1C) | ((raw << 4) & 0xC0)
}

/// The zero-extended word offset of C.SWSP (`12:9 -> 5:2`, `8:7 -> 7:6`).
fn c_swsp_imm(raw_instruction: u16) -> u32 {
    let raw = u32::from(raw_instruction);
    ((raw >> 7) & 0x3C) | ((raw >> 1) & 0xC0)
}

/// The sign-extended jump offset of C.J/C.JAL
/// (`12 -> 11`, `11 -> 4`, `10:9 -> 9:8`, `8 -> 10`, `7 -> 6`, `6 -> 7`, `5:3 -> 3:1`, `2 -> 5`).
fn c_j_imm(raw_instruction: u16) -> i32 {
    let raw = u32::from(raw_instruction);
    let imm = ((raw >> 1) & 0x800)
        | ((raw >> 7) & 0x10)
        | ((raw >> 1) & 0x300)
        | ((raw << 2) & 0x400)
        | ((raw >> 1) & 0x40)
        | ((raw << 1) & 0x80)
        | ((raw >> 2) & 0xE)
        | ((raw << 3) & 0x20);
    ((imm as i32) << 20) >> 20
}

/// The sign-extended branch offset of C.BEQZ/C.BNEZ
/// (`12 -> 8`, `11:10 -> 4:3`, `6:5 -> 7:6`, `4:3 -> 2:1`, `2 -> 5`).
fn c_b_imm(raw_instruction: u16) -> i32 {
    let raw = u32::from(raw_instruction);
    let imm = ((raw >> 4) & 0x100)
        | ((raw >> 7) & 0x18)
        | ((raw << 1) & 0xC0)
        | ((raw >> 2) & 0x6)
        | ((raw << 3) & 0x20);
    ((imm as i32) << 23) >> 23
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    OpImm,
    Auipc,
    Lui,
    Amo,
    Op,
    Jal,
    Jalr,
    Branch,
    Load,
    Store,
    MiscMem,
    System,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SysFunct {
    Priv,
    Csrrw,
    Csrrs,
    Csrrc,
    Csrrwi,
    Csrrsi,
    Csrrci,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SysPriv {
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Wfi,
    SfenceVma,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    #[test]
    fn test_i_imm() {
        assert_eq!(0, i_imm(0x0000_0000));
        assert_eq!(-1, i_imm(0xFFF0_0000));
        assert_eq!(2047, i_imm(2047 << 20));
        assert_eq!(-2048, i_imm(0x8000_0000));
        assert_eq!(-42, i_imm((-42_i32 << 20) as u32));
        // Check other bits are ignored
        assert_eq!(0, i_imm(0x000F_FFFF));
        assert_eq!(-1, i_imm(0xFFF1_2345));
        assert_eq!(1209, i_imm((1209 << 20) | 0x000C_D10A));
    }

    #[test]
    fn test_decode_base_encodings() {
        // Encodings taken from the RV32I instruction listing.
        let table: &[(u32, Instruction)] = &[
            // addi x1, x0, 42
            (
                0x02A0_0093,
                Instruction::OpImm {
                    op: RegImmOp::Addi,
                    dest: x(1),
                    src: x(0),
                    immediate: 42,
                },
            ),
            // lui x5, 0x80001
            (
                0x8000_12B7,
                Instruction::Lui {
                    dest: x(5),
                    immediate: 0x8000_1000_u32 as i32,
                },
            ),
            // sw x2, 0(x1)
            (
                0x0020_A023,
                Instruction::Store {
                    width: StoreWidth::Sw,
                    src: x(2),
                    base: x(1),
                    offset: 0,
                },
            ),
            // lw x3, 0(x1)
            (
                0x0000_A183,
                Instruction::Load {
                    width: LoadWidth::Lw,
                    dest: x(3),
                    base: x(1),
                    offset: 0,
                },
            ),
            // beq x1, x2, -4
            (
                0xFE20_8EE3,
                Instruction::Branch {
                    condition: BranchCondition::Beq,
                    src1: x(1),
                    src2: x(2),
                    offset: -4,
                },
            ),
            // jal x1, 2048
            (
                0x0010_00EF,
                Instruction::Jal {
                    dest: x(1),
                    offset: 2048,
                },
            ),
            // div x1, x2, x0
            (
                0x0201_40B3,
                Instruction::Op {
                    op: RegRegOp::Div,
                    dest: x(1),
                    src1: x(2),
                    src2: x(0),
                },
            ),
            // csrrs x10, mhartid, x0
            (
                0xF140_2573,
                Instruction::Csr {
                    op: CsrOp::ReadSet,
                    dest: x(10),
                    csr: 0xF14,
                    src: x(0),
                },
            ),
            (0x0000_0073, Instruction::Ecall),
            (0x0010_0073, Instruction::Ebreak),
            (0x1020_0073, Instruction::Sret),
            (0x3020_0073, Instruction::Mret),
            (0x1050_0073, Instruction::Wfi),
            (
                0x1200_0073,
                Instruction::SfenceVma {
                    vaddr: x(0),
                    asid: x(0),
                },
            ),
        ];
        for &(raw, expected) in table {
            assert_eq!(Ok(expected), Instruction::decode(raw), "raw = {raw:#010x}");
        }
    }

    #[test]
    fn test_decode_amo_encodings() {
        // lr.w x2, (x1)
        assert_eq!(
            Ok(Instruction::Amo {
                op: AmoOp::Lr,
                aq: false,
                rl: false,
                src: x(0),
                addr: x(1),
                dest: x(2),
            }),
            Instruction::decode(0x1000_A12F)
        );
        // sc.w x3, x2, (x1)
        assert_eq!(
            Ok(Instruction::Amo {
                op: AmoOp::Sc,
                aq: false,
                rl: false,
                src: x(2),
                addr: x(1),
                dest: x(3),
            }),
            Instruction::decode(0x1820_A1AF)
        );
        // amoadd.w x4, x2, (x1) with aq and rl set
        assert_eq!(
            Ok(Instruction::Amo {
                op: AmoOp::Add,
                aq: true,
                rl: true,
                src: x(2),
                addr: x(1),
                dest: x(4),
            }),
            Instruction::decode(0x0620_A22F)
        );
        // lr.w with a non-zero rs2 field is reserved
        assert!(Instruction::decode(0x1020_A12F).is_err());
    }

    #[test]
    fn test_decode_illegal() {
        assert!(Instruction::decode(0x0000_0000).is_err());
        assert!(Instruction::decode(0xFFFF_FFFF).is_err());
        // Unsupported (floating-point) opcode
        assert!(Instruction::decode(0x0000_0007).is_err());
    }

    #[test]
    fn test_uret_is_illegal_without_user_traps() {
        // URET belongs to the N extension (user-level traps). With N absent from misa there
        // is no user trap-register file to return from, so the encoding must raise an illegal
        // instruction rather than decode.
        assert!(Instruction::decode(0x0020_0073).is_err());
    }

    #[test]
    fn test_compressed_parcel_detection() {
        assert!(is_compressed(0x0001));
        assert!(is_compressed(0x4581));
        assert!(!is_compressed(0x0093));
    }

    #[test]
    fn test_decode_compressed_encodings() {
        let table: &[(u16, Instruction)] = &[
            // c.li x5, 7
            (
                0x429D,
                Instruction::OpImm {
                    op: RegImmOp::Addi,
                    dest: x(5),
                    src: x(0),
                    immediate: 7,
                },
            ),
            // c.add x5, x5
            (
                0x9296,
                Instruction::Op {
                    op: RegRegOp::Add,
                    dest: x(5),
                    src1: x(5),
                    src2: x(5),
                },
            ),
            // c.addi x8, -1
            (
                0x147D,
                Instruction::OpImm {
                    op: RegImmOp::Addi,
                    dest: x(8),
                    src: x(8),
                    immediate: -1,
                },
            ),
            // c.addi4spn x8, sp, 16
            (
                0x0800,
                Instruction::OpImm {
                    op: RegImmOp::Addi,
                    dest: x(8),
                    src: x(2),
                    immediate: 16,
                },
            ),
            // c.addi16sp sp, -64
            (
                0x7139,
                Instruction::OpImm {
                    op: RegImmOp::Addi,
                    dest: x(2),
                    src: x(2),
                    immediate: -64,
                },
            ),
            // c.lui x10, 0x1f
            (
                0x657D,
                Instruction::Lui {
                    dest: x(10),
                    immediate: 0x1F000,
                },
            ),
            // c.lw x9, 4(x8)
            (
                0x4044,
                Instruction::Load {
                    width: LoadWidth::Lw,
                    dest: x(9),
                    base: x(8),
                    offset: 4,
                },
            ),
            // c.sw x9, 4(x8)
            (
                0xC044,
                Instruction::Store {
                    width: StoreWidth::Sw,
                    src: x(9),
                    base: x(8),
                    offset: 4,
                },
            ),
            // c.lwsp x1, 12(sp)
            (
                0x40B2,
                Instruction::Load {
                    width: LoadWidth::Lw,
                    dest: x(1),
                    base: x(2),
                    offset: 12,
                },
            ),
            // c.swsp x1, 12(sp)
            (
                0xC606,
                Instruction::Store {
                    width: StoreWidth::Sw,
                    src: x(1),
                    base: x(2),
                    offset: 12,
                },
            ),
            // c.mv x10, x11
            (
                0x852E,
                Instruction::Op {
                    op: RegRegOp::Add,
                    dest: x(10),
                    src1: x(0),
                    src2: x(11),
                },
            ),
            // c.jr x1
            (
                0x8082,
                Instruction::Jalr {
                    dest: x(0),
                    base: x(1),
                    offset: 0,
                },
            ),
            // c.jalr x5
            (
                0x9282,
                Instruction::Jalr {
                    dest: x(1),
                    base: x(5),
                    offset: 0,
                },
            ),
            // c.j -4 (from the jump itself)
            (
                0xBFF5,
                Instruction::Jal {
                    dest: x(0),
                    offset: -4,
                },
            ),
            // c.jal 16
            (
                0x2801,
                Instruction::Jal {
                    dest: x(1),
                    offset: 16,
                },
            ),
            // c.beqz x8, 8
            (
                0xC401,
                Instruction::Branch {
                    condition: BranchCondition::Beq,
                    src1: x(8),
                    src2: x(0),
                    offset: 8,
                },
            ),
            // c.bnez x8, -8
            (
                0xFC65,
                Instruction::Branch {
                    condition: BranchCondition::Bne,
                    src1: x(8),
                    src2: x(0),
                    offset: -8,
                },
            ),
            // c.slli x5, 3
            (
                0x028E,
                Instruction::OpShiftImm {
                    op: RegShiftImmOp::Slli,
                    dest: x(5),
                    src: x(5),
                    shift_amount_u5: 3,
                },
            ),
            // c.srli x8, 3
            (
                0x800D,
                Instruction::OpShiftImm {
                    op: RegShiftImmOp::Srli,
                    dest: x(8),
                    src: x(8),
                    shift_amount_u5: 3,
                },
            ),
            // c.srai x8, 3
            (
                0x840D,
                Instruction::OpShiftImm {
                    op: RegShiftImmOp::Srai,
                    dest: x(8),
                    src: x(8),
                    shift_amount_u5: 3,
                },
            ),
            // c.andi x8, 5
            (
                0x8815,
                Instruction::OpImm {
                    op: RegImmOp::Andi,
                    dest: x(8),
                    src: x(8),
                    immediate: 5,
                },
            ),
            // c.sub x8, x9
            (
                0x8C05,
                Instruction::Op {
                    op: RegRegOp::Sub,
                    dest: x(8),
                    src1: x(8),
                    src2: x(9),
                },
            ),
            // c.xor x8, x9
            (
                0x8C25,
                Instruction::Op {
                    op: RegRegOp::Xor,
                    dest: x(8),
                    src1: x(8),
                    src2: x(9),
                },
            ),
            // c.or x8, x9
            (
                0x8C45,
                Instruction::Op {
                    op: RegRegOp::Or,
                    dest: x(8),
                    src1: x(8),
                    src2: x(9),
                },
            ),
            // c.and x8, x9
            (
                0x8C65,
                Instruction::Op {
                    op: RegRegOp::And,
                    dest: x(8),
                    src1: x(8),
                    src2: x(9),
                },
            ),
            // c.nop
            (
                0x0001,
                Instruction::OpImm {
                    op: RegImmOp::Addi,
                    dest: x(0),
                    src: x(0),
                    immediate: 0,
                },
            ),
            // c.ebreak
            (0x9002, Instruction::Ebreak),
        ];
        for &(raw, expected) in table {
            assert_eq!(
                Ok(expected),
                Instruction::decode_compressed(raw),
                "raw = {raw:#06x}"
            );
        }
    }

    #[test]
    fn test_decode_compressed_illegal() {
        // The all-zero parcel is defined to be illegal.
        assert!(Instruction::decode_compressed(0x0000).is_err());
        // c.addi16sp with a zero immediate is reserved.
        assert!(Instruction::decode_compressed(0x6101).is_err());
        // c.lui with a zero immediate is reserved.
        assert!(Instruction::decode_compressed(0x6281).is_err());
        // c.lwsp with rd = x0 is reserved.
        assert!(Instruction::decode_compressed(0x4002).is_err());
        // c.jr with rs1 = x0 is reserved.
        assert!(Instruction::decode_compressed(0x8002).is_err());
        // Shift amounts of 32 and up are reserved on RV32.
        assert!(Instruction::decode_compressed(0x1082).is_err());
        // c.flw is not supported (no floating point).
        assert!(Instruction::decode_compressed(0x6000).is_err());
    }
}
