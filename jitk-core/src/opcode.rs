use core::fmt::{Display, Formatter};

/// Operation of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opcode {
    // Binary elementwise
    /// a + b
    Add,
    /// a - b
    Subtract,
    /// a * b
    Multiply,
    /// a / b, signed integers round toward negative infinity
    Divide,
    /// a to the power of b
    Power,
    /// C remainder (fmod for floats)
    Mod,
    /// Remainder with the sign of the divisor
    Remainder,
    /// max(a, b)
    Maximum,
    /// min(a, b)
    Minimum,
    /// a & b
    BitwiseAnd,
    /// a | b
    BitwiseOr,
    /// a ^ b
    BitwiseXor,
    /// a << b
    LeftShift,
    /// a >> b
    RightShift,
    /// a == b
    Equal,
    /// a != b
    NotEqual,
    /// a > b
    Greater,
    /// a >= b
    GreaterEqual,
    /// a < b
    Less,
    /// a <= b
    LessEqual,
    /// a && b
    LogicalAnd,
    /// a || b
    LogicalOr,
    /// !a != !b
    LogicalXor,
    /// atan2(a, b)
    Arctan2,
    // Unary elementwise
    /// Copy with cast
    Identity,
    /// |a|
    Absolute,
    /// !a
    LogicalNot,
    /// ~a, logical not for bools
    Invert,
    /// sin
    Sin,
    /// cos
    Cos,
    /// tan
    Tan,
    /// sinh
    Sinh,
    /// cosh
    Cosh,
    /// tanh
    Tanh,
    /// asin
    Arcsin,
    /// acos
    Arccos,
    /// atan
    Arctan,
    /// e^a
    Exp,
    /// 2^a
    Exp2,
    /// e^a - 1
    Expm1,
    /// natural logarithm
    Log,
    /// base 2 logarithm
    Log2,
    /// base 10 logarithm
    Log10,
    /// ln(1 + a)
    Log1p,
    /// square root
    Sqrt,
    /// ceil
    Ceil,
    /// floor
    Floor,
    /// round to nearest even
    Rint,
    /// round toward zero
    Trunc,
    /// -1, 0 or 1
    Sign,
    /// is not a number
    Isnan,
    /// is infinite
    Isinf,
    /// is finite
    Isfinite,
    // Reductions, axis is the constant
    /// sum over axis
    AddReduce,
    /// product over axis
    MultiplyReduce,
    /// minimum over axis
    MinimumReduce,
    /// maximum over axis
    MaximumReduce,
    /// all over axis
    LogicalAndReduce,
    /// any over axis
    LogicalOrReduce,
    /// xor over axis
    LogicalXorReduce,
    /// bitwise and over axis
    BitwiseAndReduce,
    /// bitwise or over axis
    BitwiseOrReduce,
    /// bitwise xor over axis
    BitwiseXorReduce,
    // Accumulates, axis is the constant
    /// running sum over axis
    AddAccumulate,
    /// running product over axis
    MultiplyAccumulate,
    // Data movement
    /// out = in1[in1.start + in2]
    Gather,
    /// out[out.start + in2] = in1
    Scatter,
    /// if cond: out[out.start + in2] = in1
    CondScatter,
    /// out = flat index
    Range,
    /// out = random123(start, key, flat index)
    Random,
    // System
    /// Frees the base of the only operand
    Free,
    /// No operation
    None,
    /// Synchronize the base of the only operand with the host
    Sync,
    /// Extension method registered in the engine
    ExtMethod(u32),
}

impl Opcode {
    /// System opcodes do not compute anything
    pub const fn is_system(self) -> bool {
        matches!(self, Opcode::Free | Opcode::None | Opcode::Sync)
    }

    /// Reduction over the axis given by the constant
    pub const fn is_reduction(self) -> bool {
        matches!(
            self,
            Opcode::AddReduce
                | Opcode::MultiplyReduce
                | Opcode::MinimumReduce
                | Opcode::MaximumReduce
                | Opcode::LogicalAndReduce
                | Opcode::LogicalOrReduce
                | Opcode::LogicalXorReduce
                | Opcode::BitwiseAndReduce
                | Opcode::BitwiseOrReduce
                | Opcode::BitwiseXorReduce
        )
    }

    /// Scan over the axis given by the constant
    pub const fn is_accumulate(self) -> bool {
        matches!(self, Opcode::AddAccumulate | Opcode::MultiplyAccumulate)
    }

    /// Reduction or accumulate
    pub const fn is_sweep(self) -> bool {
        self.is_reduction() || self.is_accumulate()
    }

    /// Extension method
    pub const fn is_extension(self) -> bool {
        matches!(self, Opcode::ExtMethod(_))
    }

    /// Gather, scatter and conditional scatter address arrays by value
    pub const fn is_indirect(self) -> bool {
        matches!(self, Opcode::Gather | Opcode::Scatter | Opcode::CondScatter)
    }

    /// One output element per iteration, computed from the same position of the inputs
    pub const fn is_elementwise(self) -> bool {
        !self.is_system() && !self.is_sweep() && !self.is_extension() && !self.is_indirect()
    }

    /// Can the iteration space be reshaped without changing the result
    pub const fn is_reshapable(self) -> bool {
        self.is_elementwise()
    }

    /// Number of operands including output and constant
    pub const fn nop(self) -> usize {
        match self {
            Opcode::None => 0,
            Opcode::Free | Opcode::Sync | Opcode::Range => 1,
            Opcode::Random
            | Opcode::Identity
            | Opcode::Absolute
            | Opcode::LogicalNot
            | Opcode::Invert
            | Opcode::Sin
            | Opcode::Cos
            | Opcode::Tan
            | Opcode::Sinh
            | Opcode::Cosh
            | Opcode::Tanh
            | Opcode::Arcsin
            | Opcode::Arccos
            | Opcode::Arctan
            | Opcode::Exp
            | Opcode::Exp2
            | Opcode::Expm1
            | Opcode::Log
            | Opcode::Log2
            | Opcode::Log10
            | Opcode::Log1p
            | Opcode::Sqrt
            | Opcode::Ceil
            | Opcode::Floor
            | Opcode::Rint
            | Opcode::Trunc
            | Opcode::Sign
            | Opcode::Isnan
            | Opcode::Isinf
            | Opcode::Isfinite => 2,
            Opcode::CondScatter => 4,
            _ => 3,
        }
    }

    /// Name of the opcode
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Subtract => "SUBTRACT",
            Opcode::Multiply => "MULTIPLY",
            Opcode::Divide => "DIVIDE",
            Opcode::Power => "POWER",
            Opcode::Mod => "MOD",
            Opcode::Remainder => "REMAINDER",
            Opcode::Maximum => "MAXIMUM",
            Opcode::Minimum => "MINIMUM",
            Opcode::BitwiseAnd => "BITWISE_AND",
            Opcode::BitwiseOr => "BITWISE_OR",
            Opcode::BitwiseXor => "BITWISE_XOR",
            Opcode::LeftShift => "LEFT_SHIFT",
            Opcode::RightShift => "RIGHT_SHIFT",
            Opcode::Equal => "EQUAL",
            Opcode::NotEqual => "NOT_EQUAL",
            Opcode::Greater => "GREATER",
            Opcode::GreaterEqual => "GREATER_EQUAL",
            Opcode::Less => "LESS",
            Opcode::LessEqual => "LESS_EQUAL",
            Opcode::LogicalAnd => "LOGICAL_AND",
            Opcode::LogicalOr => "LOGICAL_OR",
            Opcode::LogicalXor => "LOGICAL_XOR",
            Opcode::Arctan2 => "ARCTAN2",
            Opcode::Identity => "IDENTITY",
            Opcode::Absolute => "ABSOLUTE",
            Opcode::LogicalNot => "LOGICAL_NOT",
            Opcode::Invert => "INVERT",
            Opcode::Sin => "SIN",
            Opcode::Cos => "COS",
            Opcode::Tan => "TAN",
            Opcode::Sinh => "SINH",
            Opcode::Cosh => "COSH",
            Opcode::Tanh => "TANH",
            Opcode::Arcsin => "ARCSIN",
            Opcode::Arccos => "ARCCOS",
            Opcode::Arctan => "ARCTAN",
            Opcode::Exp => "EXP",
            Opcode::Exp2 => "EXP2",
            Opcode::Expm1 => "EXPM1",
            Opcode::Log => "LOG",
            Opcode::Log2 => "LOG2",
            Opcode::Log10 => "LOG10",
            Opcode::Log1p => "LOG1P",
            Opcode::Sqrt => "SQRT",
            Opcode::Ceil => "CEIL",
            Opcode::Floor => "FLOOR",
            Opcode::Rint => "RINT",
            Opcode::Trunc => "TRUNC",
            Opcode::Sign => "SIGN",
            Opcode::Isnan => "ISNAN",
            Opcode::Isinf => "ISINF",
            Opcode::Isfinite => "ISFINITE",
            Opcode::AddReduce => "ADD_REDUCE",
            Opcode::MultiplyReduce => "MULTIPLY_REDUCE",
            Opcode::MinimumReduce => "MINIMUM_REDUCE",
            Opcode::MaximumReduce => "MAXIMUM_REDUCE",
            Opcode::LogicalAndReduce => "LOGICAL_AND_REDUCE",
            Opcode::LogicalOrReduce => "LOGICAL_OR_REDUCE",
            Opcode::LogicalXorReduce => "LOGICAL_XOR_REDUCE",
            Opcode::BitwiseAndReduce => "BITWISE_AND_REDUCE",
            Opcode::BitwiseOrReduce => "BITWISE_OR_REDUCE",
            Opcode::BitwiseXorReduce => "BITWISE_XOR_REDUCE",
            Opcode::AddAccumulate => "ADD_ACCUMULATE",
            Opcode::MultiplyAccumulate => "MULTIPLY_ACCUMULATE",
            Opcode::Gather => "GATHER",
            Opcode::Scatter => "SCATTER",
            Opcode::CondScatter => "COND_SCATTER",
            Opcode::Range => "RANGE",
            Opcode::Random => "RANDOM",
            Opcode::Free => "FREE",
            Opcode::None => "NONE",
            Opcode::Sync => "SYNC",
            Opcode::ExtMethod(_) => "EXT_METHOD",
        }
    }

    /// Elementwise opcode applied by a reduction or accumulate
    pub const fn sweep_operation(self) -> Option<Opcode> {
        Some(match self {
            Opcode::AddReduce | Opcode::AddAccumulate => Opcode::Add,
            Opcode::MultiplyReduce | Opcode::MultiplyAccumulate => Opcode::Multiply,
            Opcode::MinimumReduce => Opcode::Minimum,
            Opcode::MaximumReduce => Opcode::Maximum,
            Opcode::LogicalAndReduce => Opcode::LogicalAnd,
            Opcode::LogicalOrReduce => Opcode::LogicalOr,
            Opcode::LogicalXorReduce => Opcode::LogicalXor,
            Opcode::BitwiseAndReduce => Opcode::BitwiseAnd,
            Opcode::BitwiseOrReduce => Opcode::BitwiseOr,
            Opcode::BitwiseXorReduce => Opcode::BitwiseXor,
            _ => return Option::None,
        })
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Opcode::ExtMethod(id) => f.write_fmt(format_args!("EXT_METHOD({id})")),
            op => f.write_str(op.name()),
        }
    }
}

#[test]
fn opcode_classes() {
    assert!(Opcode::AddReduce.is_sweep());
    assert!(Opcode::AddAccumulate.is_sweep());
    assert!(!Opcode::Gather.is_reshapable());
    assert!(Opcode::Range.is_reshapable());
    assert!(Opcode::Free.is_system());
    assert!(!Opcode::ExtMethod(3).is_elementwise());
    assert_eq!(Opcode::MaximumReduce.sweep_operation(), Some(Opcode::Maximum));
    assert_eq!(Opcode::ExtMethod(3).to_string(), "EXT_METHOD(3)");
}
