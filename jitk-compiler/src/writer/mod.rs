//! Kernel source writers.
//!
//! Every target implements [Writer]. The loop nest is walked by [write_loop_block],
//! which is shared by all targets, so that writers only differ in syntax.

use crate::{
    block::{Block, LoopB},
    symbols::{OmpProtection, Scope, SymbolTable},
};
use alloc::{format, string::String, vec::Vec};
use core::fmt::{Display, Formatter, Write};
use jitk_core::{
    constant::Constant,
    dtype::DType,
    error::JitError,
    instruction::{InstrPtr, Instruction},
    opcode::Opcode,
    view::View,
};

mod c_like;
mod cuda;
mod fortran;
mod opencl;
mod openmp;

pub use cuda::CudaWriter;
pub use fortran::FortranWriter;
pub use opencl::OpenClWriter;
pub use openmp::OpenMpWriter;

/// Compilation target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    /// C99 with optional OpenMP pragmas
    OpenMp,
    /// OpenCL C
    OpenCl,
    /// CUDA C++
    Cuda,
    /// Fortran 2008 with optional OpenMP directives
    Fortran,
}

impl Target {
    /// Is target executed on a device with hardware threads
    pub const fn is_gpu(self) -> bool {
        matches!(self, Target::OpenCl | Target::Cuda)
    }

    /// Extension of source files
    pub const fn source_extension(self) -> &'static str {
        match self {
            Target::OpenMp => ".c",
            Target::OpenCl => ".cl",
            Target::Cuda => ".cu",
            Target::Fortran => ".f90",
        }
    }

    /// Parse target name as used in configuration
    pub fn parse(name: &str) -> Result<Target, JitError> {
        match name {
            "openmp" => Ok(Target::OpenMp),
            "opencl" => Ok(Target::OpenCl),
            "cuda" => Ok(Target::Cuda),
            "fortran" => Ok(Target::Fortran),
            _ => Err(JitError::parse_error(format!("unknown target {name:?}"))),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Target::OpenMp => "openmp",
            Target::OpenCl => "opencl",
            Target::Cuda => "cuda",
            Target::Fortran => "fortran",
        })
    }
}

/// Emits kernel source for one target
pub trait Writer {
    /// Target of this writer
    fn target(&self) -> Target;

    /// Statement terminator
    fn endl(&self) -> &'static str;

    /// Indentation
    fn spaces(&self, out: &mut String, indent: usize) {
        for _ in 0..indent {
            out.push_str("    ");
        }
    }

    /// Single line comment
    fn comment(&self, out: &mut String, indent: usize, text: &str);

    /// Name of element type, None if the target does not support it
    fn type_name(&self, dtype: DType) -> Option<&'static str>;

    /// Declare scalar variable
    fn declare(&self, out: &mut String, indent: usize, dtype: DType, name: &str) -> Result<(), JitError>;

    /// Declare index variable
    fn declare_index(&self, out: &mut String, indent: usize, name: &str);

    /// Assignment statement
    fn assign(&self, out: &mut String, indent: usize, lhs: &str, rhs: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "{lhs} = {rhs}{}", self.endl());
    }

    /// Open a nested block, declarations may follow
    fn begin_block(&self, out: &mut String, indent: usize, comment: &str);

    /// Close block opened by [Writer::begin_block]
    fn end_block(&self, out: &mut String, indent: usize);

    /// Open scope for declarations of loop body
    fn begin_scope(&self, _out: &mut String, _indent: usize) {}

    /// Close scope opened by [Writer::begin_scope]
    fn end_scope(&self, _out: &mut String, _indent: usize) {}

    /// Set induction variable of loop with given rank outside of the loop
    fn set_loop_var(&self, out: &mut String, indent: usize, rank: usize, value: &str);

    /// Loop over `start..size`
    fn loop_head_writer(&self, out: &mut String, indent: usize, rank: usize, start: i64, size: i64);

    /// Close loop opened by [Writer::loop_head_writer]
    fn end_loop(&self, out: &mut String, indent: usize);

    /// Parallelization annotations of loop, returns views whose updates need protection
    fn write_header(
        &self,
        _scope: &Scope,
        _l: &LoopB,
        _scalar_reductions: &[InstrPtr],
        _out: &mut String,
        _indent: usize,
    ) -> Vec<(View, OmpProtection)> {
        Vec::new()
    }

    /// Sizes of leading loops of kernel mapped to hardware threads
    fn threads(&self, _kernel: &LoopB) -> Vec<i64> {
        Vec::new()
    }

    /// Open block executed by one hardware thread per iteration of loop with given rank
    fn write_threaded_head(&self, _out: &mut String, _indent: usize, rank: usize, _size: i64) -> Result<(), JitError> {
        Err(JitError::unsupported(format!(
            "{} writer can not map loop of rank {rank} to hardware threads",
            self.target()
        )))
    }

    /// Element of array
    fn array_element(&self, name: &str, index: &str) -> String;

    /// Constant as operand
    fn write_constant(&self, scope: &Scope, c: &Constant) -> String;

    /// Conditional statement
    fn write_if(&self, cond: &str, stmt: &str) -> String;

    /// Random number of counter `flat`, None if not supported
    fn write_random(&self, scope: &Scope, instr: &Instruction, flat: &str) -> Option<String>;

    /// Statement protected against concurrent updates
    fn write_protected(&self, out: &mut String, indent: usize, _protection: OmpProtection, stmt: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "{stmt}{}", self.endl());
    }

    /// One statement for opcode, `ops[0]` is the output.
    /// Returns None if the opcode is not supported for given types.
    fn write_operation(&self, op: Opcode, types: &[DType], ops: &[String]) -> Option<String>;

    /// Flattened offset of operand `i` of instruction within its base.
    /// Offset and strides are either literals or kernel parameters.
    /// `axis_offset` shifts the induction variable of one axis.
    fn write_array_index(&self, scope: &Scope, instr: &Instruction, i: usize, axis_offset: Option<(usize, i64)>) -> String {
        let v = &instr.operand[i];
        let symbols = scope.symbols();
        let as_var = symbols.has_offset_strides(v);
        let vid = symbols.view_id(v);
        let mut res = if as_var { format!("vo{vid}") } else { format!("{}", v.start) };
        for axis in 0..instr.ndim() {
            let Some(va) = instr.operand_axis(i, axis) else { continue };
            if !as_var && v.stride[va] == 0 {
                continue;
            }
            let var = match axis_offset {
                Some((a, off)) if a == axis => format!("(i{axis}{off:+})"),
                _ => format!("i{axis}"),
            };
            if as_var {
                let _ = write!(res, " +{var}*vs{vid}_{va}");
            } else if v.stride[va] < 0 {
                let _ = write!(res, " +{var}*({})", v.stride[va]);
            } else {
                let _ = write!(res, " +{var}*{}", v.stride[va]);
            }
        }
        res
    }

    /// Operand `i` of instruction as expression: scalar, constant or array element
    fn write_array_subscription(&self, scope: &Scope, instr: &Instruction, i: usize) -> String {
        let v = &instr.operand[i];
        let symbols = scope.symbols();
        let Some(base) = v.base else {
            return match instr.constant {
                Some(c) if !instr.opcode.is_sweep() => self.write_constant(scope, &c),
                _ => String::new(),
            };
        };
        if scope.is_scalar_temp(base) {
            return format!("t{}", symbols.base_id(base));
        }
        if scope.is_scalar_replaced(v) {
            return format!("s{}", symbols.view_id(v));
        }
        let name = format!("a{}", symbols.base_id(base));
        if instr.indirect_operand(i) {
            return name;
        }
        let index = self.write_array_index(scope, instr, i, None);
        match scope.index_var(&index) {
            Some(var) => self.array_element(&name, var),
            None => self.array_element(&name, &index),
        }
    }

    /// Statement of one instruction. Within the peeled first iteration of a loop
    /// sweeps over its axis copy their input.
    fn write_instr(
        &self,
        scope: &Scope,
        instr: &Instruction,
        out: &mut String,
        indent: usize,
    ) -> Result<(), JitError> {
        let unsupported = || JitError::unsupported(format!("Instruction {instr} not supported by {} writer", self.target()));
        let symbols = scope.symbols();
        let types: Vec<DType> = (0..instr.operand.len()).map(|i| instr.operand_type(i)).collect();
        let ops: Vec<String> = (0..instr.operand.len())
            .map(|i| self.write_array_subscription(scope, instr, i))
            .collect();
        let offset = |i: usize| {
            let v = &instr.operand[i];
            if symbols.has_offset_strides(v) {
                format!("vo{}", symbols.view_id(v))
            } else {
                format!("{}", v.start)
            }
        };
        let stmt = match instr.opcode {
            op if op.is_sweep() => {
                let axis = instr.sweep_axis().ok_or_else(unsupported)?;
                if scope.is_peeled(axis) {
                    self.write_operation(Opcode::Identity, &types[..2], &ops[..2])
                } else {
                    let sweep_op = op.sweep_operation().ok_or_else(unsupported)?;
                    let prev = if op.is_accumulate() {
                        let index = self.write_array_index(scope, instr, 0, Some((axis, -1)));
                        self.array_element(&format!("a{}", symbols.base_id(instr.output_base().ok_or_else(unsupported)?)), &index)
                    } else {
                        ops[0].clone()
                    };
                    self.write_operation(
                        sweep_op,
                        &[types[0], types[0], types[1]],
                        &[ops[0].clone(), prev, ops[1].clone()],
                    )
                }
            }
            Opcode::Gather => {
                let src = self.array_element(&ops[1], &format!("{} + {}", offset(1), ops[2]));
                Some(format!("{} = {src}", ops[0]))
            }
            Opcode::Scatter => {
                let dst = self.array_element(&ops[0], &format!("{} + {}", offset(0), ops[2]));
                Some(format!("{dst} = {}", ops[1]))
            }
            Opcode::CondScatter => {
                let dst = self.array_element(&ops[0], &format!("{} + {}", offset(0), ops[2]));
                Some(self.write_if(&ops[3], &format!("{dst} = {}", ops[1])))
            }
            Opcode::Range => Some(format!("{} = {}", ops[0], flat_index(instr))),
            Opcode::Random => self
                .write_random(scope, instr, &flat_index(instr))
                .map(|r| format!("{} = {r}", ops[0])),
            op if op.is_system() || op.is_extension() => return Ok(()),
            op => self.write_operation(op, &types, &ops),
        }
        .ok_or_else(unsupported)?;
        match instr.operand.first().and_then(|v| scope.omp_protection(v)) {
            Some(protection) if instr.opcode.is_reduction() => self.write_protected(out, indent, protection, &stmt),
            _ => {
                self.spaces(out, indent);
                let _ = writeln!(out, "{stmt}{}", self.endl());
            }
        }
        Ok(())
    }

    /// Complete kernel source
    fn write_kernel(&self, kernel: &LoopB, symbols: &SymbolTable) -> Result<String, JitError>;
}

/// Row major position within the iteration space
fn flat_index(instr: &Instruction) -> String {
    let shape = instr.dominating_shape();
    let stride = jitk_core::view::contiguous_stride(shape);
    let terms: Vec<String> = stride
        .iter()
        .zip(shape)
        .enumerate()
        .filter(|(_, (_, sh))| **sh > 1)
        .map(|(a, (st, _))| if *st == 1 { format!("i{a}") } else { format!("i{a}*{st}") })
        .collect();
    if terms.is_empty() {
        "0".into()
    } else {
        format!("({})", terms.join(" + "))
    }
}

/// Sizes of leading loops mapped to hardware threads
pub fn thread_stack(kernel: &LoopB, max_depth: usize) -> Vec<i64> {
    let mut res = Vec::new();
    let mut blocks = kernel.block_list.as_slice();
    while let [Block::Loop(l)] = blocks {
        if !l.sweeps.is_empty() || res.len() >= max_depth {
            break;
        }
        res.push(l.size);
        blocks = l.block_list.as_slice();
    }
    res
}

/// Reductions of loop accumulated in scalars while the loop runs
pub fn scalar_reductions(scope: &Scope, l: &LoopB) -> Vec<InstrPtr> {
    let local = l.local_instr();
    l.sweeps
        .iter()
        .filter(|s| s.opcode.is_reduction())
        .filter(|s| local.iter().any(|i| alloc::sync::Arc::ptr_eq(i, s)))
        .filter(|s| s.output_base().is_some_and(|b| !scope.is_scalar_temp(b)))
        .cloned()
        .collect()
}

fn needs_index(scope: &Scope, instr: &Instruction, i: usize) -> bool {
    let v = &instr.operand[i];
    match v.base {
        None => false,
        Some(base) => !scope.is_scalar_temp(base) && !scope.is_scalar_replaced(v) && !instr.indirect_operand(i),
    }
}

fn write_body<W: Writer + ?Sized>(
    w: &W,
    scope: &mut Scope,
    l: &LoopB,
    out: &mut String,
    indent: usize,
) -> Result<(), JitError> {
    let symbols = scope.symbols();
    let temps = symbols.scalar_temps_of(l.id);
    let mut index_decls: Vec<(String, String)> = Vec::new();
    if symbols.config.index_as_var {
        for instr in l.local_instr() {
            for i in 0..instr.operand.len() {
                if !needs_index(scope, &instr, i) {
                    continue;
                }
                let expr = w.write_array_index(scope, &instr, i, None);
                if scope.index_var(&expr).is_none() {
                    let name = scope.insert_index_var(expr.clone());
                    index_decls.push((name, expr));
                }
            }
        }
    }
    let scoped = !temps.is_empty() || !index_decls.is_empty();
    if scoped {
        w.begin_scope(out, indent);
    }
    for t in &temps {
        w.declare(out, indent, symbols.dtype(*t), &format!("t{}", symbols.base_id(*t)))?;
    }
    for (name, _) in &index_decls {
        w.declare_index(out, indent, name);
    }
    for (name, expr) in &index_decls {
        w.assign(out, indent, name, expr);
    }
    for b in &l.block_list {
        match b {
            Block::Instr { instr, .. } => w.write_instr(scope, instr, out, indent)?,
            Block::Loop(sub) => write_loop_block(w, scope, sub, out, indent)?,
        }
    }
    if scoped {
        w.end_scope(out, indent);
    }
    Ok(())
}

fn loop_scope<'a>(
    scope: &'a Scope<'a>,
    rank: i32,
    reductions: &[InstrPtr],
    protected: &[(View, OmpProtection)],
) -> Scope<'a> {
    let mut body = scope.child(rank);
    for r in reductions {
        body.insert_scalar_replaced(r.operand[0].clone());
    }
    for (v, p) in protected {
        body.insert_omp_protected(v.clone(), *p);
    }
    body
}

/// Write loop and its subtree.
/// Loops with sweeps execute their first iteration separately, sweeps over the loop axis
/// copy their input there and the loop continues from index 1.
/// Reductions local to the loop accumulate in scalars that are written back after the loop.
pub fn write_loop_block<W: Writer + ?Sized>(
    w: &W,
    scope: &Scope,
    l: &LoopB,
    out: &mut String,
    indent: usize,
) -> Result<(), JitError> {
    if l.size <= 0 || l.all_instr().is_empty() || l.rank < 0 {
        return Ok(());
    }
    let rank = l.rank as usize;
    let symbols = scope.symbols();
    if rank < scope.threaded_ranks() {
        w.write_threaded_head(out, indent, rank, l.size)?;
        let mut body = scope.child(l.rank);
        write_body(w, &mut body, l, out, indent + 1)?;
        w.end_block(out, indent);
        return Ok(());
    }

    let reductions = scalar_reductions(scope, l);
    let mut indent = indent;
    if !reductions.is_empty() {
        w.begin_block(out, indent, "Scalar replaced reductions");
        indent += 1;
        for r in &reductions {
            w.declare(out, indent, r.operand_type(0), &format!("s{}", symbols.view_id(&r.operand[0])))?;
        }
    }
    let start = if l.sweeps.is_empty() {
        0
    } else {
        w.begin_block(out, indent, "Peeled loop, 1. sweep iteration");
        w.set_loop_var(out, indent + 1, rank, "0");
        let mut body = loop_scope(scope, l.rank, &reductions, &[]);
        body.set_peeled_axis(rank);
        write_body(w, &mut body, l, out, indent + 1)?;
        w.end_block(out, indent);
        1
    };
    if start < l.size {
        let protected = w.write_header(scope, l, &reductions, out, indent);
        let mut body = loop_scope(scope, l.rank, &reductions, &protected);
        w.loop_head_writer(out, indent, rank, start, l.size);
        write_body(w, &mut body, l, out, indent + 1)?;
        w.end_loop(out, indent);
    }
    if !reductions.is_empty() {
        for r in &reductions {
            let target = w.write_array_subscription(scope, r, 0);
            w.assign(out, indent, &target, &format!("s{}", symbols.view_id(&r.operand[0])));
        }
        indent -= 1;
        w.end_block(out, indent);
    }
    Ok(())
}

/// Write all blocks of kernel
pub fn write_kernel_body<W: Writer + ?Sized>(
    w: &W,
    scope: &Scope,
    kernel: &LoopB,
    out: &mut String,
    indent: usize,
) -> Result<(), JitError> {
    let symbols = scope.symbols();
    for t in symbols.scalar_temps_of(kernel.id) {
        w.declare(out, indent, symbols.dtype(t), &format!("t{}", symbols.base_id(t)))?;
    }
    for b in &kernel.block_list {
        match b {
            Block::Loop(l) => write_loop_block(w, scope, l, out, indent)?,
            Block::Instr { instr, .. } => w.write_instr(scope, instr, out, indent)?,
        }
    }
    Ok(())
}

/// Highest rank of loops in kernel plus one
pub fn loop_depth(kernel: &LoopB) -> usize {
    kernel
        .all_sub_blocks()
        .iter()
        .map(|l| l.rank as usize + 1)
        .max()
        .unwrap_or(0)
}

/// Does the kernel use given dtype
pub fn uses_dtype(symbols: &SymbolTable, dtype: DType) -> bool {
    symbols.bases().iter().any(|b| symbols.dtype(*b) == dtype) || symbols.constants().iter().any(|c| c.dtype() == dtype)
}

#[cfg(test)]
mod tests;
