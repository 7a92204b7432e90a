use crate::dtype::DType;
use core::fmt::{Display, Formatter};

/// Constant embedded in an instruction.
/// Floats are stored as bit patterns, so constants have a total order
/// and can be used as keys of ordered maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constant {
    /// Boolean constant
    Bool(bool),
    /// i8 constant
    I8(i8),
    /// i16 constant
    I16(i16),
    /// i32 constant
    I32(i32),
    /// i64 constant
    I64(i64),
    /// u8 constant
    U8(u8),
    /// u16 constant
    U16(u16),
    /// u32 constant
    U32(u32),
    /// u64 constant
    U64(u64),
    /// f16 constant, bits
    F16(u16),
    /// f32 constant, bits
    F32(u32),
    /// f64 constant, bits
    F64(u64),
    /// complex64 constant, bits of real and imaginary part
    C64(u32, u32),
    /// complex128 constant, bits of real and imaginary part
    C128(u64, u64),
    /// Random123 parameters
    R123 {
        /// Counter start
        start: u64,
        /// Key
        key: u64,
    },
}

impl Constant {
    /// f32 constant
    pub fn f32(x: f32) -> Self {
        Self::F32(x.to_bits())
    }

    /// f64 constant
    pub fn f64(x: f64) -> Self {
        Self::F64(x.to_bits())
    }

    /// f16 constant
    pub fn f16(x: half::f16) -> Self {
        Self::F16(x.to_bits())
    }

    /// Zero of given dtype
    pub fn zero(dtype: DType) -> Self {
        Self::from_i64(dtype, 0)
    }

    /// Convert integer value into constant of given dtype.
    /// Integer types wrap, floats round.
    pub fn from_i64(dtype: DType, x: i64) -> Self {
        match dtype {
            DType::Bool => Self::Bool(x != 0),
            DType::Int8 => Self::I8(x as i8),
            DType::Int16 => Self::I16(x as i16),
            DType::Int32 => Self::I32(x as i32),
            DType::Int64 => Self::I64(x),
            DType::UInt8 => Self::U8(x as u8),
            DType::UInt16 => Self::U16(x as u16),
            DType::UInt32 => Self::U32(x as u32),
            DType::UInt64 => Self::U64(x as u64),
            DType::Float16 => Self::f16(half::f16::from_f64(x as f64)),
            DType::Float32 => Self::f32(x as f32),
            DType::Float64 => Self::f64(x as f64),
            DType::Complex64 => Self::C64((x as f32).to_bits(), 0),
            DType::Complex128 => Self::C128((x as f64).to_bits(), 0),
            DType::R123 => Self::R123 { start: x as u64, key: 0 },
        }
    }

    /// Convert float value into constant of given dtype
    pub fn from_f64(dtype: DType, x: f64) -> Self {
        match dtype {
            DType::Float16 => Self::f16(half::f16::from_f64(x)),
            DType::Float32 => Self::f32(x as f32),
            DType::Float64 => Self::f64(x),
            DType::Complex64 => Self::C64((x as f32).to_bits(), 0),
            DType::Complex128 => Self::C128(x.to_bits(), 0),
            DType::Bool => Self::Bool(x != 0.0),
            _ => Self::from_i64(dtype, x as i64),
        }
    }

    /// Get dtype of constant
    pub fn dtype(&self) -> DType {
        match self {
            Constant::Bool(_) => DType::Bool,
            Constant::I8(_) => DType::Int8,
            Constant::I16(_) => DType::Int16,
            Constant::I32(_) => DType::Int32,
            Constant::I64(_) => DType::Int64,
            Constant::U8(_) => DType::UInt8,
            Constant::U16(_) => DType::UInt16,
            Constant::U32(_) => DType::UInt32,
            Constant::U64(_) => DType::UInt64,
            Constant::F16(_) => DType::Float16,
            Constant::F32(_) => DType::Float32,
            Constant::F64(_) => DType::Float64,
            Constant::C64(..) => DType::Complex64,
            Constant::C128(..) => DType::Complex128,
            Constant::R123 { .. } => DType::R123,
        }
    }

    /// Value as i64, floats truncate, complex numbers use the real part
    pub fn as_i64(&self) -> i64 {
        match *self {
            Constant::Bool(x) => x as i64,
            Constant::I8(x) => x as i64,
            Constant::I16(x) => x as i64,
            Constant::I32(x) => x as i64,
            Constant::I64(x) => x,
            Constant::U8(x) => x as i64,
            Constant::U16(x) => x as i64,
            Constant::U32(x) => x as i64,
            Constant::U64(x) => x as i64,
            Constant::R123 { start, .. } => start as i64,
            _ => self.as_f64() as i64,
        }
    }

    /// Value as f64, complex numbers use the real part
    pub fn as_f64(&self) -> f64 {
        match *self {
            Constant::F16(x) => half::f16::from_bits(x).to_f64(),
            Constant::F32(x) => f32::from_bits(x) as f64,
            Constant::F64(x) => f64::from_bits(x),
            Constant::C64(re, _) => f32::from_bits(re) as f64,
            Constant::C128(re, _) => f64::from_bits(re),
            _ => self.as_i64() as f64,
        }
    }

    /// Value as bool, nonzero is true
    pub fn as_bool(&self) -> bool {
        match self {
            Constant::Bool(x) => *x,
            Constant::F16(_) | Constant::F32(_) | Constant::F64(_) | Constant::C64(..) | Constant::C128(..) => {
                self.as_f64() != 0.0
            }
            _ => self.as_i64() != 0,
        }
    }
}

/// Float literal, non finite values use the C99 macros
fn float_literal(x: f64, suffix: &str) -> alloc::string::String {
    if x.is_nan() {
        "NAN".into()
    } else if x.is_infinite() {
        if x > 0.0 { "INFINITY".into() } else { "(-INFINITY)".into() }
    } else {
        alloc::format!("{x:?}{suffix}")
    }
}

impl Display for Constant {
    /// Renders the constant as a C literal
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match *self {
            Constant::Bool(x) => f.write_fmt(format_args!("{}", x as u8)),
            Constant::I8(x) => f.write_fmt(format_args!("{x}")),
            Constant::I16(x) => f.write_fmt(format_args!("{x}")),
            Constant::I32(x) => f.write_fmt(format_args!("{x}")),
            Constant::I64(x) => f.write_fmt(format_args!("{x}l")),
            Constant::U8(x) => f.write_fmt(format_args!("{x}u")),
            Constant::U16(x) => f.write_fmt(format_args!("{x}u")),
            Constant::U32(x) => f.write_fmt(format_args!("{x}u")),
            Constant::U64(x) => f.write_fmt(format_args!("{x}ul")),
            Constant::F16(x) => f.write_str(&float_literal(half::f16::from_bits(x).to_f64(), "f")),
            Constant::F32(x) => f.write_str(&float_literal(f32::from_bits(x) as f64, "f")),
            Constant::F64(x) => f.write_str(&float_literal(f64::from_bits(x), "")),
            Constant::C64(re, im) => f.write_fmt(format_args!(
                "({} + {}*I)",
                float_literal(f32::from_bits(re) as f64, "f"),
                float_literal(f32::from_bits(im) as f64, "f")
            )),
            Constant::C128(re, im) => f.write_fmt(format_args!(
                "({} + {}*I)",
                float_literal(f64::from_bits(re), ""),
                float_literal(f64::from_bits(im), "")
            )),
            Constant::R123 { start, key } => f.write_fmt(format_args!("{{{start}ul, {key}ul}}")),
        }
    }
}

#[test]
fn constant_float_order() {
    let a = Constant::f32(1.5);
    let b = Constant::f32(1.5);
    assert_eq!(a, b);
    assert_eq!(a.as_f64(), 1.5);
    assert_eq!(a.to_string(), "1.5f");
    assert_eq!(Constant::from_i64(DType::Float64, 3).to_string(), "3.0");
    assert_eq!(Constant::from_i64(DType::Int8, 300), Constant::I8(44));
    assert!(Constant::Bool(true).as_bool());
}
