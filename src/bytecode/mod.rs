pub mod disasm;
pub mod encode;
pub mod labels;
pub mod module;
pub mod opcode;
