/// The closed opcode list. Discriminants are the wire values; they are
/// encoded with the same base-128 scheme as operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    // no operand
    ClearStack = 0,
    Return = 1,
    PushTrue = 2,
    PushFalse = 3,
    PopScope = 4,
    IndexCall = 5,
    SetInterfaceInputSize = 6,
    SetInterfaceOutputSize = 7,
    PushFnArgsSentinel = 8,
    PushVecArgsSentinel = 9,
    PushModuleArgsSentinel = 10,
    PushArrSentinel = 11,

    // operators, no operand
    Add = 12,
    Subtract = 13,
    Multiply = 14,
    Divide = 15,
    Assign = 16,
    GetField = 17,
    UnaryNegate = 18,
    BinaryNot = 19,
    BinaryAnd = 20,
    BinaryXor = 21,
    BinaryOr = 22,
    RangeDesc = 23,
    CmpLt = 24,
    CmpLe = 25,
    CmpGt = 26,
    CmpGe = 27,
    CmpEq = 28,
    CmpNe = 29,

    // one varint operand (constant index, literal value, or label id)
    PushLocal = 30,
    PushInRef = 31,
    PushOutRef = 32,
    PushUinteger = 33,
    PushBitLiteral = 34,
    PushString = 35,
    PushNewLocalInteger = 36,
    PushNewLocalUinteger = 37,
    PushNewLocalString = 38,
    PushNewLocalVector = 39,
    PushNewLocalAny = 40,
    PushNewLocalRef = 41,
    PushNewLocalModule = 42,
    ModuleCall = 43,
    Jump = 44,
    JumpIfTrue = 45,
    JumpIfFalse = 46,

    // one function-id byte
    FunctionCall = 47,
}

/// Shape of the bytes following an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Varint,
    FnByte,
}

pub const ALL_OPCODES: [Opcode; 48] = [
    Opcode::ClearStack,
    Opcode::Return,
    Opcode::PushTrue,
    Opcode::PushFalse,
    Opcode::PopScope,
    Opcode::IndexCall,
    Opcode::SetInterfaceInputSize,
    Opcode::SetInterfaceOutputSize,
    Opcode::PushFnArgsSentinel,
    Opcode::PushVecArgsSentinel,
    Opcode::PushModuleArgsSentinel,
    Opcode::PushArrSentinel,
    Opcode::Add,
    Opcode::Subtract,
    Opcode::Multiply,
    Opcode::Divide,
    Opcode::Assign,
    Opcode::GetField,
    Opcode::UnaryNegate,
    Opcode::BinaryNot,
    Opcode::BinaryAnd,
    Opcode::BinaryXor,
    Opcode::BinaryOr,
    Opcode::RangeDesc,
    Opcode::CmpLt,
    Opcode::CmpLe,
    Opcode::CmpGt,
    Opcode::CmpGe,
    Opcode::CmpEq,
    Opcode::CmpNe,
    Opcode::PushLocal,
    Opcode::PushInRef,
    Opcode::PushOutRef,
    Opcode::PushUinteger,
    Opcode::PushBitLiteral,
    Opcode::PushString,
    Opcode::PushNewLocalInteger,
    Opcode::PushNewLocalUinteger,
    Opcode::PushNewLocalString,
    Opcode::PushNewLocalVector,
    Opcode::PushNewLocalAny,
    Opcode::PushNewLocalRef,
    Opcode::PushNewLocalModule,
    Opcode::ModuleCall,
    Opcode::Jump,
    Opcode::JumpIfTrue,
    Opcode::JumpIfFalse,
    Opcode::FunctionCall,
];

impl Opcode {
    pub fn from_u64(value: u64) -> Option<Opcode> {
        ALL_OPCODES.iter().copied().find(|op| *op as u64 == value)
    }

    pub fn operand_kind(self) -> OperandKind {
        match self {
            Opcode::PushLocal
            | Opcode::PushInRef
            | Opcode::PushOutRef
            | Opcode::PushUinteger
            | Opcode::PushBitLiteral
            | Opcode::PushString
            | Opcode::PushNewLocalInteger
            | Opcode::PushNewLocalUinteger
            | Opcode::PushNewLocalString
            | Opcode::PushNewLocalVector
            | Opcode::PushNewLocalAny
            | Opcode::PushNewLocalRef
            | Opcode::PushNewLocalModule
            | Opcode::ModuleCall
            | Opcode::Jump
            | Opcode::JumpIfTrue
            | Opcode::JumpIfFalse => OperandKind::Varint,
            Opcode::FunctionCall => OperandKind::FnByte,
            _ => OperandKind::None,
        }
    }

    /// Operand references `constants` and must stay inside its bounds.
    pub fn operand_is_constant_index(self) -> bool {
        matches!(
            self,
            Opcode::PushLocal
                | Opcode::PushInRef
                | Opcode::PushOutRef
                | Opcode::PushString
                | Opcode::PushNewLocalInteger
                | Opcode::PushNewLocalUinteger
                | Opcode::PushNewLocalString
                | Opcode::PushNewLocalVector
                | Opcode::PushNewLocalAny
                | Opcode::PushNewLocalRef
                | Opcode::PushNewLocalModule
                | Opcode::ModuleCall
        )
    }

    pub fn operand_is_label(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::ClearStack => "clear_stack",
            Opcode::Return => "return",
            Opcode::PushTrue => "push_true",
            Opcode::PushFalse => "push_false",
            Opcode::PopScope => "pop_scope",
            Opcode::IndexCall => "index_call",
            Opcode::SetInterfaceInputSize => "set_interface_input_size",
            Opcode::SetInterfaceOutputSize => "set_interface_output_size",
            Opcode::PushFnArgsSentinel => "push_fn_args_sentinel",
            Opcode::PushVecArgsSentinel => "push_vec_args_sentinel",
            Opcode::PushModuleArgsSentinel => "push_module_args_sentinel",
            Opcode::PushArrSentinel => "push_arr_sentinel",
            Opcode::Add => "add",
            Opcode::Subtract => "sub",
            Opcode::Multiply => "mul",
            Opcode::Divide => "div",
            Opcode::Assign => "assign",
            Opcode::GetField => "get_field",
            Opcode::UnaryNegate => "unary_negate",
            Opcode::BinaryNot => "binary_not",
            Opcode::BinaryAnd => "binary_and",
            Opcode::BinaryXor => "binary_xor",
            Opcode::BinaryOr => "binary_or",
            Opcode::RangeDesc => "range_desc",
            Opcode::CmpLt => "cmp_lt",
            Opcode::CmpLe => "cmp_le",
            Opcode::CmpGt => "cmp_gt",
            Opcode::CmpGe => "cmp_ge",
            Opcode::CmpEq => "cmp_eq",
            Opcode::CmpNe => "cmp_ne",
            Opcode::PushLocal => "push_local",
            Opcode::PushInRef => "push_in_ref",
            Opcode::PushOutRef => "push_out_ref",
            Opcode::PushUinteger => "push_uinteger",
            Opcode::PushBitLiteral => "push_bit_literal",
            Opcode::PushString => "push_string",
            Opcode::PushNewLocalInteger => "push_new_local_integer",
            Opcode::PushNewLocalUinteger => "push_new_local_uinteger",
            Opcode::PushNewLocalString => "push_new_local_string",
            Opcode::PushNewLocalVector => "push_new_local_vector",
            Opcode::PushNewLocalAny => "push_new_local_any",
            Opcode::PushNewLocalRef => "push_new_local_ref",
            Opcode::PushNewLocalModule => "push_new_local_module",
            Opcode::ModuleCall => "module_call",
            Opcode::Jump => "jump",
            Opcode::JumpIfTrue => "jump_if_true",
            Opcode::JumpIfFalse => "jump_if_false",
            Opcode::FunctionCall => "function_call",
        }
    }
}

/// Builtin functions dispatched through `function_call`'s id byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionId {
    Print = 0,
    Println = 1,
    Min = 2,
    Max = 3,
    Vector = 4,
}

impl FunctionId {
    pub fn from_byte(byte: u8) -> Option<FunctionId> {
        match byte {
            0 => Some(FunctionId::Print),
            1 => Some(FunctionId::Println),
            2 => Some(FunctionId::Min),
            3 => Some(FunctionId::Max),
            4 => Some(FunctionId::Vector),
            _ => None,
        }
    }

    pub fn from_source_name(name: &str) -> Option<FunctionId> {
        match name {
            "print" => Some(FunctionId::Print),
            "println" => Some(FunctionId::Println),
            "min" => Some(FunctionId::Min),
            "max" => Some(FunctionId::Max),
            "vector" => Some(FunctionId::Vector),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FunctionId::Print => "print",
            FunctionId::Println => "println",
            FunctionId::Min => "min",
            FunctionId::Max => "max",
            FunctionId::Vector => "vector",
        }
    }
}
