//! Bytecode decoder. Exact left inverse of the encoder; used by the CLI
//! `--disasm` mode and by tests as the readable view of emitted code.

use crate::bytecode::encode::decode_varint;
use crate::bytecode::module::ModuleDesc;
use crate::bytecode::opcode::{FunctionId, Opcode, OperandKind};

/// Decodes a module's bytecode into `(offset, line)` pairs. Decoding
/// never fails: bad constant indices render as `INVALID_REFERENCE`,
/// unbound labels as `UNDEFINED`, and an unknown opcode stops the walk
/// (operand widths past it are unknowable).
pub fn disassemble(module: &ModuleDesc) -> Vec<(u64, String)> {
    let bytes = &module.bytecode;
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let offset = pos as u64;
        let (raw, next) = match decode_varint(bytes, pos) {
            Some(decoded) => decoded,
            None => {
                out.push((offset, "truncated opcode".to_string()));
                return out;
            }
        };
        let op = match Opcode::from_u64(raw) {
            Some(op) => op,
            None => {
                out.push((offset, format!("UNKNOWN OPCODE {}", raw)));
                return out;
            }
        };
        pos = next;

        let line = match op.operand_kind() {
            OperandKind::None => op.mnemonic().to_string(),
            OperandKind::Varint => {
                let (operand, next) = match decode_varint(bytes, pos) {
                    Some(decoded) => decoded,
                    None => {
                        out.push((offset, format!("{} <truncated operand>", op.mnemonic())));
                        return out;
                    }
                };
                pos = next;
                format_varint_op(module, op, operand)
            }
            OperandKind::FnByte => {
                let Some(byte) = bytes.get(pos).copied() else {
                    out.push((offset, format!("{} <truncated operand>", op.mnemonic())));
                    return out;
                };
                pos += 1;
                match FunctionId::from_byte(byte) {
                    Some(id) => format!("{} {}", op.mnemonic(), id.name()),
                    None => format!("{} {} ; INVALID_REFERENCE", op.mnemonic(), byte),
                }
            }
        };
        out.push((offset, line));
    }
    out
}

fn format_varint_op(module: &ModuleDesc, op: Opcode, operand: u64) -> String {
    if op.operand_is_label() {
        return match module.labels.offset_of(operand) {
            Some(_) => format!("{} L{}", op.mnemonic(), operand),
            None => format!("{} L{} ; UNDEFINED", op.mnemonic(), operand),
        };
    }
    if op.operand_is_constant_index() {
        return match module.constant(operand) {
            Some(name) => format!("{} {} ; {}", op.mnemonic(), operand, name),
            None => format!("{} {} ; INVALID_REFERENCE", op.mnemonic(), operand),
        };
    }
    format!("{} {}", op.mnemonic(), operand)
}

/// One line per instruction, offsets left-padded, as printed by the CLI.
pub fn disassemble_to_string(module: &ModuleDesc) -> String {
    let mut out = String::new();
    for (offset, line) in disassemble(module) {
        out.push_str(&format!("{:6}  {}\n", offset, line));
    }
    out
}
