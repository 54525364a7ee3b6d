//! Variable-length big-endian base-128 integer coding. Both opcodes and
//! their varint operands use it, so the whole stream is self-describing.

use crate::bytecode::module::ModuleDesc;
use crate::bytecode::opcode::{FunctionId, Opcode};

/// Appends `value` as 7-bit groups, most significant first. Every group
/// except the last carries the continuation bit.
pub fn encode_varint(value: u64, out: &mut Vec<u8>) {
    let mut groups = 1;
    while groups < 10 && (value >> (7 * groups)) != 0 {
        groups += 1;
    }
    for i in (0..groups).rev() {
        let mut byte = ((value >> (7 * i)) & 0x7F) as u8;
        if i != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Reads one varint starting at `pos`. Returns the value and the offset
/// one past its last byte, or `None` if the stream ends mid-number.
pub fn decode_varint(bytes: &[u8], mut pos: usize) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    loop {
        let byte = *bytes.get(pos)?;
        pos += 1;
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Some((value, pos));
        }
    }
}

impl ModuleDesc {
    pub fn emit_opcode(&mut self, op: Opcode) {
        encode_varint(op as u64, &mut self.bytecode);
    }

    pub fn emit_with_varint(&mut self, op: Opcode, operand: u64) {
        self.emit_opcode(op);
        encode_varint(operand, &mut self.bytecode);
    }

    pub fn emit_function_call(&mut self, id: FunctionId) {
        self.emit_opcode(Opcode::FunctionCall);
        self.bytecode.push(id as u8);
    }
}
