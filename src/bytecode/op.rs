// =============================================================================
// OP - Bytecode instructions
// =============================================================================

/// Opcodes of the Cinder VM. Every instruction carries two generic u32
/// operands (`a`, `b`); which of them an opcode reads is noted below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // Stack
    /// Push constant `a` from the pool.
    PushConst,
    /// Discard top of stack.
    Pop,

    // Variables
    /// Push local slot `a` of the current frame.
    LoadLocal,
    /// Pop into local slot `a`.
    StoreLocal,
    /// Push global slot `a`.
    LoadGlobal,
    /// Pop into global slot `a`, growing the globals vector on demand.
    StoreGlobal,

    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,
    Not,

    // Comparison
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Logical (both operands evaluated; short-circuiting is an
    // emission choice, not a VM behavior)
    And,
    Or,

    // Control flow
    /// `pc <- a`.
    Jump,
    /// Pop; `pc <- a` when falsy.
    JumpIfFalse,
    /// Pop; `pc <- a` when truthy.
    JumpIfTrue,

    // Functions
    /// Call function ordinal `a` with `b` arguments.
    Call,
    /// Pop the return value, tear the frame down, push the value back.
    Return,
    /// Stop; exit code from top-of-stack if numeric.
    Halt,
    /// Dispatch builtin id `a` with `b` arguments.
    CallBuiltin,

    // Conversions
    ToInt,
    ToFloat,
    ToString,
    /// Concatenate the displayed forms of the two top values.
    Concat,

    // Arrays (reserved; the runtime reports them as not implemented)
    ArrayNew,
    ArrayGet,
    ArraySet,
    ArrayLen,
}

impl Op {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::PushConst => "PUSH_CONST",
            Op::Pop => "POP",
            Op::LoadLocal => "LOAD_LOCAL",
            Op::StoreLocal => "STORE_LOCAL",
            Op::LoadGlobal => "LOAD_GLOBAL",
            Op::StoreGlobal => "STORE_GLOBAL",
            Op::Add => "ADD",
            Op::Subtract => "SUBTRACT",
            Op::Multiply => "MULTIPLY",
            Op::Divide => "DIVIDE",
            Op::Modulo => "MODULO",
            Op::Negate => "NEGATE",
            Op::Not => "NOT",
            Op::Equal => "EQUAL",
            Op::NotEqual => "NOT_EQUAL",
            Op::Less => "LESS",
            Op::LessEqual => "LESS_EQUAL",
            Op::Greater => "GREATER",
            Op::GreaterEqual => "GREATER_EQUAL",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Jump => "JUMP",
            Op::JumpIfFalse => "JUMP_IF_FALSE",
            Op::JumpIfTrue => "JUMP_IF_TRUE",
            Op::Call => "CALL",
            Op::Return => "RETURN",
            Op::Halt => "HALT",
            Op::CallBuiltin => "CALL_BUILTIN",
            Op::ToInt => "TO_INT",
            Op::ToFloat => "TO_FLOAT",
            Op::ToString => "TO_STRING",
            Op::Concat => "CONCAT",
            Op::ArrayNew => "ARRAY_NEW",
            Op::ArrayGet => "ARRAY_GET",
            Op::ArraySet => "ARRAY_SET",
            Op::ArrayLen => "ARRAY_LEN",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}
