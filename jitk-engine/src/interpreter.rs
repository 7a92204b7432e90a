//! Reference interpreter of fused block trees.
//!
//! Loops are walked the way generated kernels run them: a loop with sweeps executes
//! its first iteration separately, where sweeps over its axis copy their input,
//! and continues from index 1. Arithmetic follows the expressions emitted by the
//! C like writers.

use crate::backend::{Backend, Launch};
use jitk_compiler::{
    block::{Block, LoopB},
    writer::Target,
};
use jitk_core::{
    base::{Bases, Buffer},
    constant::Constant,
    dtype::DType,
    error::JitError,
    instruction::Instruction,
    opcode::Opcode,
    view::contiguous_stride,
};

/// Value of one element during interpretation
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    I(i64),
    U(u64),
    F(f64),
}

impl Scalar {
    fn read(buffer: &Buffer, i: usize) -> Option<Scalar> {
        let dtype = buffer.dtype();
        Some(if dtype.is_float() {
            Scalar::F(buffer.get_f64(i)?)
        } else if dtype.is_unsigned_integer() {
            Scalar::U(buffer.get_i64(i)? as u64)
        } else {
            Scalar::I(buffer.get_i64(i)?)
        })
    }

    fn from_constant(c: &Constant) -> Scalar {
        let dtype = c.dtype();
        if dtype.is_float() {
            Scalar::F(c.as_f64())
        } else if dtype.is_unsigned_integer() {
            Scalar::U(c.as_i64() as u64)
        } else {
            Scalar::I(c.as_i64())
        }
    }

    fn write(self, buffer: &mut Buffer, i: usize) -> Result<(), JitError> {
        match self {
            Scalar::I(x) => buffer.set_i64(i, x),
            Scalar::U(x) if buffer.dtype().is_float() => buffer.set_f64(i, x as f64),
            Scalar::U(x) => buffer.set_i64(i, x as i64),
            Scalar::F(x) => buffer.set_f64(i, x),
        }
    }

    fn i64(self) -> i64 {
        match self {
            Scalar::I(x) => x,
            Scalar::U(x) => x as i64,
            Scalar::F(x) => x as i64,
        }
    }

    fn u64(self) -> u64 {
        match self {
            Scalar::I(x) => x as u64,
            Scalar::U(x) => x,
            Scalar::F(x) => x as u64,
        }
    }

    fn f64(self) -> f64 {
        match self {
            Scalar::I(x) => x as f64,
            Scalar::U(x) => x as f64,
            Scalar::F(x) => x,
        }
    }

    fn is_true(self) -> bool {
        match self {
            Scalar::I(x) => x != 0,
            Scalar::U(x) => x != 0,
            Scalar::F(x) => x != 0.0,
        }
    }
}

fn supported(dtype: DType) -> bool {
    !matches!(dtype, DType::Float16 | DType::Complex64 | DType::Complex128 | DType::R123)
}

/// Integer power, negative exponents follow integer division
fn ipow(mut b: i64, mut e: i64) -> i64 {
    if e < 0 {
        return match b {
            1 => 1,
            -1 if e & 1 == 1 => -1,
            -1 => 1,
            _ => 0,
        };
    }
    let mut r: i64 = 1;
    while e != 0 {
        if e & 1 == 1 {
            r = r.wrapping_mul(b);
        }
        b = b.wrapping_mul(b);
        e >>= 1;
    }
    r
}

/// philox2x32-10 counter based generator
pub fn random123(start: u64, key: u64, index: u64) -> u64 {
    let ctr = start.wrapping_add(index);
    let (mut c0, mut c1, mut k) = (ctr as u32, (ctr >> 32) as u32, key as u32);
    for _ in 0..10 {
        let prod = 0xD256_D193u64 * c0 as u64;
        let (hi, lo) = ((prod >> 32) as u32, prod as u32);
        c0 = hi ^ k ^ c1;
        c1 = lo;
        k = k.wrapping_add(0x9E37_79B9);
    }
    ((c1 as u64) << 32) | c0 as u64
}

macro_rules! compare {
    ($op: expr, $x: expr, $y: expr) => {
        match $op {
            Opcode::Equal => Some($x == $y),
            Opcode::NotEqual => Some($x != $y),
            Opcode::Greater => Some($x > $y),
            Opcode::GreaterEqual => Some($x >= $y),
            Opcode::Less => Some($x < $y),
            Opcode::LessEqual => Some($x <= $y),
            _ => None,
        }
    };
}

macro_rules! integer_op {
    ($op: expr, $x: expr, $y: expr, $variant: ident, $t: ty, $div: expr, $rem: expr) => {{
        let (x, y) = ($x, $y);
        let by_zero = || JitError::invalid_argument(format!("integer division by zero in {}", $op));
        Scalar::$variant(match $op {
            Opcode::Add => x.wrapping_add(y),
            Opcode::Subtract => x.wrapping_sub(y),
            Opcode::Multiply => x.wrapping_mul(y),
            Opcode::Divide if y == 0 => return Err(by_zero()),
            Opcode::Divide => $div(x, y),
            Opcode::Mod | Opcode::Remainder if y == 0 => return Err(by_zero()),
            Opcode::Mod => x.wrapping_rem(y),
            Opcode::Remainder => $rem(x, y),
            Opcode::Power => ipow(x as i64, y as i64) as $t,
            Opcode::Maximum => if x > y { x } else { y },
            Opcode::Minimum => if x < y { x } else { y },
            Opcode::BitwiseAnd => x & y,
            Opcode::BitwiseOr => x | y,
            Opcode::BitwiseXor => x ^ y,
            Opcode::LeftShift => x.wrapping_shl(y as u32),
            Opcode::RightShift => x.wrapping_shr(y as u32),
            _ => return Ok(None),
        })
    }};
}

fn floor_div(x: i64, y: i64) -> i64 {
    if (x > 0) != (y > 0) && x.wrapping_rem(y) != 0 {
        x.wrapping_div(y) - 1
    } else {
        x.wrapping_div(y)
    }
}

fn signed_remainder(x: i64, y: i64) -> i64 {
    let r = x.wrapping_rem(y);
    if r != 0 && (r < 0) != (y < 0) {
        r + y
    } else {
        r
    }
}

/// Binary operation computed in type `t`, None if not defined for it
fn binary(op: Opcode, t: DType, a: Scalar, b: Scalar) -> Result<Option<Scalar>, JitError> {
    match op {
        Opcode::LogicalAnd => return Ok(Some(Scalar::I((a.is_true() && b.is_true()) as i64))),
        Opcode::LogicalOr => return Ok(Some(Scalar::I((a.is_true() || b.is_true()) as i64))),
        Opcode::LogicalXor => return Ok(Some(Scalar::I((a.is_true() != b.is_true()) as i64))),
        _ => {}
    }
    if t.is_float() {
        let (x, y) = (a.f64(), b.f64());
        if let Some(c) = compare!(op, x, y) {
            return Ok(Some(Scalar::I(c as i64)));
        }
        let r = match op {
            Opcode::Add => x + y,
            Opcode::Subtract => x - y,
            Opcode::Multiply => x * y,
            Opcode::Divide => x / y,
            Opcode::Power => x.powf(y),
            Opcode::Mod => x % y,
            Opcode::Remainder => x - (x / y).floor() * y,
            Opcode::Maximum => if x > y { x } else { y },
            Opcode::Minimum => if x < y { x } else { y },
            Opcode::Arctan2 => x.atan2(y),
            _ => return Ok(None),
        };
        Ok(Some(Scalar::F(round_to(t, r))))
    } else if t.is_unsigned_integer() {
        let (x, y) = (a.u64(), b.u64());
        if let Some(c) = compare!(op, x, y) {
            return Ok(Some(Scalar::I(c as i64)));
        }
        Ok(Some(integer_op!(op, x, y, U, u64, |x: u64, y: u64| x / y, |x: u64, y: u64| x % y)))
    } else {
        let (x, y) = (a.i64(), b.i64());
        if let Some(c) = compare!(op, x, y) {
            return Ok(Some(Scalar::I(c as i64)));
        }
        Ok(Some(integer_op!(op, x, y, I, i64, floor_div, signed_remainder)))
    }
}

fn round_to(t: DType, x: f64) -> f64 {
    if t == DType::Float32 {
        x as f32 as f64
    } else {
        x
    }
}

/// Unary operation of input type `t` into `out`, None if not defined for it
fn unary(op: Opcode, out: DType, t: DType, a: Scalar) -> Option<Scalar> {
    let float = |f: fn(f64) -> f64| t.is_float().then(|| Scalar::F(round_to(t, f(a.f64()))));
    Some(match op {
        Opcode::Identity if out == DType::Bool => Scalar::I(a.is_true() as i64),
        Opcode::Identity => a,
        Opcode::Absolute => match a {
            Scalar::I(x) => Scalar::I(x.wrapping_abs()),
            Scalar::F(x) => Scalar::F(x.abs()),
            u => u,
        },
        Opcode::LogicalNot => Scalar::I(!a.is_true() as i64),
        Opcode::Invert if t == DType::Bool => Scalar::I(!a.is_true() as i64),
        Opcode::Invert => match a {
            Scalar::I(x) => Scalar::I(!x),
            Scalar::U(x) => Scalar::U(!x),
            Scalar::F(_) => return None,
        },
        Opcode::Sin => float(f64::sin)?,
        Opcode::Cos => float(f64::cos)?,
        Opcode::Tan => float(f64::tan)?,
        Opcode::Sinh => float(f64::sinh)?,
        Opcode::Cosh => float(f64::cosh)?,
        Opcode::Tanh => float(f64::tanh)?,
        Opcode::Arcsin => float(f64::asin)?,
        Opcode::Arccos => float(f64::acos)?,
        Opcode::Arctan => float(f64::atan)?,
        Opcode::Exp => float(f64::exp)?,
        Opcode::Exp2 => float(f64::exp2)?,
        Opcode::Expm1 => float(f64::exp_m1)?,
        Opcode::Log => float(f64::ln)?,
        Opcode::Log2 => float(f64::log2)?,
        Opcode::Log10 => float(f64::log10)?,
        Opcode::Log1p => float(f64::ln_1p)?,
        Opcode::Sqrt => float(f64::sqrt)?,
        Opcode::Ceil => float(f64::ceil)?,
        Opcode::Floor => float(f64::floor)?,
        Opcode::Rint => float(f64::round_ties_even)?,
        Opcode::Trunc => float(f64::trunc)?,
        Opcode::Sign => match a {
            Scalar::I(x) => Scalar::I(x.signum()),
            Scalar::U(x) => Scalar::I((x > 0) as i64),
            Scalar::F(x) => Scalar::I((x > 0.0) as i64 - (x < 0.0) as i64),
        },
        Opcode::Isnan => Scalar::I(matches!(a, Scalar::F(x) if x.is_nan()) as i64),
        Opcode::Isinf => Scalar::I(matches!(a, Scalar::F(x) if x.is_infinite()) as i64),
        Opcode::Isfinite => Scalar::I(match a {
            Scalar::F(x) => x.is_finite() as i64,
            _ => 1,
        }),
        _ => return None,
    })
}

/// Executes block trees directly on host buffers
#[derive(Debug, Clone, Copy)]
pub struct InterpreterBackend {
    target: Target,
}

impl Default for InterpreterBackend {
    fn default() -> Self {
        InterpreterBackend::new(Target::OpenMp)
    }
}

impl InterpreterBackend {
    /// Interpreter standing in for target
    pub fn new(target: Target) -> InterpreterBackend {
        InterpreterBackend { target }
    }
}

impl Backend for InterpreterBackend {
    fn target(&self) -> Target {
        self.target
    }

    fn needs_source(&self) -> bool {
        false
    }

    fn execute(&mut self, launch: Launch<'_>, bases: &mut Bases) -> Result<(), JitError> {
        for id in launch.kernel.all_temps() {
            bases.allocate(id)?;
        }
        let mut walk = Walk { bases, idx: Vec::new(), peeled: Vec::new() };
        walk.blocks(&launch.kernel.block_list, launch.kernel.rank)
    }
}

struct Walk<'a> {
    bases: &'a mut Bases,
    // Induction variables by rank
    idx: Vec<i64>,
    peeled: Vec<usize>,
}

impl Walk<'_> {
    fn blocks(&mut self, blocks: &[Block], rank: i32) -> Result<(), JitError> {
        for b in blocks {
            match b {
                Block::Loop(l) => self.loop_block(l)?,
                Block::Instr { instr, .. } => self.instr(instr, rank)?,
            }
        }
        Ok(())
    }

    fn loop_block(&mut self, l: &LoopB) -> Result<(), JitError> {
        if l.size <= 0 || l.rank < 0 {
            return Ok(());
        }
        let rank = l.rank as usize;
        if self.idx.len() <= rank {
            self.idx.resize(rank + 1, 0);
        }
        let mut start = 0;
        if !l.sweeps.is_empty() {
            self.idx[rank] = 0;
            self.peeled.push(rank);
            let res = self.blocks(&l.block_list, l.rank);
            self.peeled.pop();
            res?;
            start = 1;
        }
        for i in start..l.size {
            self.idx[rank] = i;
            self.blocks(&l.block_list, l.rank)?;
        }
        Ok(())
    }

    fn var(&self, axis: usize, rank: i32) -> i64 {
        if (axis as i32) <= rank {
            self.idx.get(axis).copied().unwrap_or(0)
        } else {
            0
        }
    }

    /// Offset of operand within its base, `back` steps one index back along axis
    fn address(&self, instr: &Instruction, i: usize, rank: i32, back: Option<usize>) -> i64 {
        let v = &instr.operand[i];
        let mut res = v.start;
        for axis in 0..instr.ndim() {
            if let Some(va) = instr.operand_axis(i, axis) {
                let var = self.var(axis, rank) - (back == Some(axis)) as i64;
                res += var * v.stride[va];
            }
        }
        res
    }

    fn flat_index(&self, instr: &Instruction, rank: i32) -> i64 {
        let shape = instr.dominating_shape();
        contiguous_stride(shape)
            .iter()
            .enumerate()
            .map(|(axis, st)| self.var(axis, rank) * st)
            .sum()
    }

    fn load(&self, instr: &Instruction, i: usize, offset: i64) -> Result<Scalar, JitError> {
        let v = &instr.operand[i];
        let Some(base) = v.base else {
            return instr
                .constant
                .filter(|_| !instr.opcode.is_sweep())
                .map(|c| Scalar::from_constant(&c))
                .ok_or_else(|| JitError::invalid_argument(format!("operand {i} of {instr} has no value")));
        };
        let buffer = self.bases.buffer(base)?;
        usize::try_from(offset)
            .ok()
            .and_then(|o| Scalar::read(buffer, o))
            .ok_or_else(|| JitError::invalid_argument(format!("element {offset} of {base} out of bounds in {instr}")))
    }

    fn operand(&self, instr: &Instruction, i: usize, rank: i32) -> Result<Scalar, JitError> {
        self.load(instr, i, self.address(instr, i, rank, None))
    }

    fn store(&mut self, instr: &Instruction, offset: i64, value: Scalar) -> Result<(), JitError> {
        let base = instr
            .output_base()
            .ok_or_else(|| JitError::invalid_argument(format!("output of {instr} is a constant")))?;
        let offset = usize::try_from(offset)
            .map_err(|_| JitError::invalid_argument(format!("negative element {offset} of {base} in {instr}")))?;
        value.write(self.bases.buffer_mut(base)?, offset)
    }

    fn instr(&mut self, instr: &Instruction, rank: i32) -> Result<(), JitError> {
        let op = instr.opcode;
        if op.is_system() {
            return Ok(());
        }
        let unsupported = || JitError::unsupported(format!("Instruction {instr} not supported by interpreter"));
        if op.is_extension() || instr.operand.is_empty() {
            return Err(unsupported());
        }
        if instr.operand.iter().any(|v| v.base.is_some() && !supported(v.dtype)) {
            return Err(unsupported());
        }
        let types: Vec<DType> = (0..instr.operand.len()).map(|i| instr.operand_type(i)).collect();
        let out = self.address(instr, 0, rank, None);
        let value = match op {
            op if op.is_sweep() => {
                let axis = instr.sweep_axis().ok_or_else(unsupported)?;
                let input = self.operand(instr, 1, rank)?;
                if self.peeled.contains(&axis) {
                    unary(Opcode::Identity, types[0], types[1], input).ok_or_else(unsupported)?
                } else {
                    let prev = if op.is_accumulate() {
                        self.load(instr, 0, self.address(instr, 0, rank, Some(axis)))?
                    } else {
                        self.load(instr, 0, out)?
                    };
                    let sweep_op = op.sweep_operation().ok_or_else(unsupported)?;
                    binary(sweep_op, types[0], prev, input)?.ok_or_else(unsupported)?
                }
            }
            Opcode::Gather => {
                let index = self.operand(instr, 2, rank)?.i64();
                self.load(instr, 1, instr.operand[1].start + index)?
            }
            Opcode::Scatter | Opcode::CondScatter => {
                if op == Opcode::CondScatter && !self.operand(instr, 3, rank)?.is_true() {
                    return Ok(());
                }
                let index = self.operand(instr, 2, rank)?.i64();
                let value = self.operand(instr, 1, rank)?;
                return self.store(instr, instr.operand[0].start + index, value);
            }
            Opcode::Range => Scalar::I(self.flat_index(instr, rank)),
            Opcode::Random => match instr.constant {
                Some(Constant::R123 { start, key }) => {
                    Scalar::U(random123(start, key, self.flat_index(instr, rank) as u64))
                }
                _ => return Err(unsupported()),
            },
            op if instr.operand.len() == 2 => {
                let a = self.operand(instr, 1, rank)?;
                unary(op, types[0], types[1], a).ok_or_else(unsupported)?
            }
            op => {
                let a = self.operand(instr, 1, rank)?;
                let b = self.operand(instr, 2, rank)?;
                binary(op, types[1], a, b)?.ok_or_else(unsupported)?
            }
        };
        self.store(instr, out, value)
    }
}
