//! Expression table shared by the C99, OpenCL and CUDA writers

use alloc::{format, string::String};
use jitk_core::{dtype::DType, opcode::Opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CDialect {
    C99,
    OpenCl,
    Cuda,
}

pub(super) fn type_name(dialect: CDialect, dtype: DType) -> Option<&'static str> {
    Some(match (dialect, dtype) {
        (CDialect::C99, DType::Bool) => "bool",
        (CDialect::C99, DType::Int8) => "int8_t",
        (CDialect::C99, DType::Int16) => "int16_t",
        (CDialect::C99, DType::Int32) => "int32_t",
        (CDialect::C99, DType::Int64) => "int64_t",
        (CDialect::C99, DType::UInt8) => "uint8_t",
        (CDialect::C99, DType::UInt16) => "uint16_t",
        (CDialect::C99, DType::UInt32) => "uint32_t",
        (CDialect::C99, DType::UInt64) => "uint64_t",
        (CDialect::C99, DType::Complex64) => "float complex",
        (CDialect::C99, DType::Complex128) => "double complex",
        (CDialect::C99, DType::Float16) => return None,
        (CDialect::OpenCl, DType::Bool) => "uchar",
        (CDialect::OpenCl, DType::Int8) => "char",
        (CDialect::OpenCl, DType::Int16) => "short",
        (CDialect::OpenCl, DType::Int32) => "int",
        (CDialect::OpenCl, DType::Int64) => "long",
        (CDialect::OpenCl, DType::UInt8) => "uchar",
        (CDialect::OpenCl, DType::UInt16) => "ushort",
        (CDialect::OpenCl, DType::UInt32) => "uint",
        (CDialect::OpenCl, DType::UInt64) => "ulong",
        (CDialect::Cuda, DType::Bool) => "bool",
        (CDialect::Cuda, DType::Int8) => "signed char",
        (CDialect::Cuda, DType::Int16) => "short",
        (CDialect::Cuda, DType::Int32) => "int",
        (CDialect::Cuda, DType::Int64) => "long long",
        (CDialect::Cuda, DType::UInt8) => "unsigned char",
        (CDialect::Cuda, DType::UInt16) => "unsigned short",
        (CDialect::Cuda, DType::UInt32) => "unsigned int",
        (CDialect::Cuda, DType::UInt64) => "unsigned long long",
        (_, DType::Float16) => "half",
        (_, DType::Float32) => "float",
        (_, DType::Float64) => "double",
        (_, DType::Complex64 | DType::Complex128 | DType::R123) => return None,
    })
}

pub(super) fn index_type(dialect: CDialect) -> &'static str {
    match dialect {
        CDialect::C99 => "int64_t",
        CDialect::OpenCl => "long",
        CDialect::Cuda => "long long",
    }
}

/// Integer power and the philox2x32-10 generator
pub(super) fn helpers(dialect: CDialect, random: bool) -> String {
    let (prefix, i64t, u64t, u32t) = match dialect {
        CDialect::C99 => ("static inline ", "int64_t", "uint64_t", "uint32_t"),
        CDialect::OpenCl => ("inline ", "long", "ulong", "uint"),
        CDialect::Cuda => ("__device__ inline ", "long long", "unsigned long long", "unsigned int"),
    };
    let mut res = format!(
        "{prefix}{i64t} jitk_ipow({i64t} b, {i64t} e) {{
    if (e < 0) return b == 1 ? 1 : (b == -1 ? ((e & 1) ? -1 : 1) : 0);
    {i64t} r = 1;
    while (e) {{
        if (e & 1) r *= b;
        b *= b;
        e >>= 1;
    }}
    return r;
}}

"
    );
    if random {
        res.push_str(&format!(
            "{prefix}{u64t} random123({u64t} start, {u64t} key, {u64t} index) {{
    {u64t} ctr = start + index;
    {u32t} c0 = ({u32t})ctr, c1 = ({u32t})(ctr >> 32), k = ({u32t})key;
    for (int r = 0; r < 10; ++r) {{
        {u64t} prod = ({u64t})0xD256D193u * c0;
        {u32t} hi = ({u32t})(prod >> 32), lo = ({u32t})prod;
        c0 = hi ^ k ^ c1;
        c1 = lo;
        k += 0x9E3779B9u;
    }}
    return (({u64t})c1 << 32) | c0;
}}

"
        ));
    }
    res
}

fn math(dialect: CDialect, dtype: DType, name: &str) -> String {
    match (dialect, dtype) {
        (CDialect::C99, DType::Float32) => format!("{name}f"),
        (CDialect::C99, DType::Complex64) => format!("c{name}f"),
        (CDialect::C99, DType::Complex128) => format!("c{name}"),
        _ => name.into(),
    }
}

/// One C statement for opcode, `ops[0]` is the output
pub(super) fn operation(dialect: CDialect, op: Opcode, types: &[DType], ops: &[String]) -> Option<String> {
    let out = ops.first()?;
    let out_type = *types.first()?;
    let t = types.get(1).copied().unwrap_or(out_type);
    let a = ops.get(1).map_or("", String::as_str);
    let b = ops.get(2).map_or("", String::as_str);
    let cplx = t.is_complex() || out_type.is_complex();
    if type_name(dialect, t).is_none() || type_name(dialect, out_type).is_none() {
        return None;
    }
    let float_math = |name: &str| -> Option<String> {
        (t.is_float() || t.is_complex()).then(|| format!("{}({a})", math(dialect, t, name)))
    };
    let real_math = |name: &str| -> Option<String> { t.is_float().then(|| format!("{}({a})", math(dialect, t, name))) };
    let expr = match op {
        Opcode::Add => format!("{a} + {b}"),
        Opcode::Subtract => format!("{a} - {b}"),
        Opcode::Multiply => format!("{a} * {b}"),
        Opcode::Divide if t.is_signed_integer() => {
            format!("(({a} > 0) != ({b} > 0) && ({a} % {b}) != 0) ? ({a} / {b} - 1) : ({a} / {b})")
        }
        Opcode::Divide => format!("{a} / {b}"),
        Opcode::Power if t.is_integer() => format!("jitk_ipow({a}, {b})"),
        Opcode::Power if t.is_float() || cplx => format!("{}({a}, {b})", math(dialect, t, "pow")),
        Opcode::Mod if t.is_integer() => format!("{a} % {b}"),
        Opcode::Mod if t.is_float() => format!("{}({a}, {b})", math(dialect, t, "fmod")),
        Opcode::Remainder if t.is_signed_integer() => {
            format!("(({a} % {b}) != 0 && (({a} % {b}) < 0) != ({b} < 0)) ? ({a} % {b} + {b}) : ({a} % {b})")
        }
        Opcode::Remainder if t.is_unsigned_integer() => format!("{a} % {b}"),
        Opcode::Remainder if t.is_float() => format!("{a} - {}({a} / {b}) * {b}", math(dialect, t, "floor")),
        Opcode::Maximum if !cplx => format!("{a} > {b} ? {a} : {b}"),
        Opcode::Minimum if !cplx => format!("{a} < {b} ? {a} : {b}"),
        Opcode::BitwiseAnd if t.is_integer() || t == DType::Bool => format!("{a} & {b}"),
        Opcode::BitwiseOr if t.is_integer() || t == DType::Bool => format!("{a} | {b}"),
        Opcode::BitwiseXor if t.is_integer() || t == DType::Bool => format!("{a} ^ {b}"),
        Opcode::LeftShift if t.is_integer() => format!("{a} << {b}"),
        Opcode::RightShift if t.is_integer() => format!("{a} >> {b}"),
        Opcode::Equal => format!("{a} == {b}"),
        Opcode::NotEqual => format!("{a} != {b}"),
        Opcode::Greater if !cplx => format!("{a} > {b}"),
        Opcode::GreaterEqual if !cplx => format!("{a} >= {b}"),
        Opcode::Less if !cplx => format!("{a} < {b}"),
        Opcode::LessEqual if !cplx => format!("{a} <= {b}"),
        Opcode::LogicalAnd if !cplx => format!("{a} && {b}"),
        Opcode::LogicalOr if !cplx => format!("{a} || {b}"),
        Opcode::LogicalXor if !cplx => format!("!{a} != !{b}"),
        Opcode::Arctan2 if t.is_float() => format!("{}({a}, {b})", math(dialect, t, "atan2")),
        Opcode::Identity if out_type == DType::Bool && t != DType::Bool => format!("({a} == 0 ? 0 : 1)"),
        Opcode::Identity if t.is_complex() && !out_type.is_complex() => return None,
        Opcode::Identity => a.into(),
        Opcode::Absolute if t.is_signed_integer() => format!("{a} < 0 ? -{a} : {a}"),
        Opcode::Absolute if t.is_float() => format!("{}({a})", math(dialect, t, "fabs")),
        Opcode::Absolute if t.is_complex() => format!("{}({a})", math(dialect, t, "abs")),
        Opcode::Absolute => a.into(),
        Opcode::LogicalNot if !cplx => format!("!{a}"),
        Opcode::Invert if t == DType::Bool => format!("!{a}"),
        Opcode::Invert if t.is_integer() => format!("~{a}"),
        Opcode::Sin => float_math("sin")?,
        Opcode::Cos => float_math("cos")?,
        Opcode::Tan => float_math("tan")?,
        Opcode::Sinh => float_math("sinh")?,
        Opcode::Cosh => float_math("cosh")?,
        Opcode::Tanh => float_math("tanh")?,
        Opcode::Arcsin => float_math("asin")?,
        Opcode::Arccos => float_math("acos")?,
        Opcode::Arctan => float_math("atan")?,
        Opcode::Exp => float_math("exp")?,
        Opcode::Log => float_math("log")?,
        Opcode::Sqrt => float_math("sqrt")?,
        Opcode::Exp2 => real_math("exp2")?,
        Opcode::Expm1 => real_math("expm1")?,
        Opcode::Log2 => real_math("log2")?,
        Opcode::Log10 => real_math("log10")?,
        Opcode::Log1p => real_math("log1p")?,
        Opcode::Ceil => real_math("ceil")?,
        Opcode::Floor => real_math("floor")?,
        Opcode::Rint => real_math("rint")?,
        Opcode::Trunc => real_math("trunc")?,
        Opcode::Sign if !cplx => format!("({a} > 0) - ({a} < 0)"),
        Opcode::Isnan if t.is_float() => format!("isnan({a})"),
        Opcode::Isinf if t.is_float() => format!("isinf({a})"),
        Opcode::Isfinite if t.is_float() => format!("isfinite({a})"),
        Opcode::Isnan | Opcode::Isinf if !t.is_complex() => "0".into(),
        Opcode::Isfinite if !t.is_complex() => "1".into(),
        _ => return None,
    };
    Some(format!("{out} = {expr}"))
}
