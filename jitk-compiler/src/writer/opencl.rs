use super::{
    c_like::{self, CDialect},
    thread_stack, uses_dtype, write_kernel_body, Target, Writer,
};
use crate::{
    block::LoopB,
    symbols::{Scope, SymbolTable},
};
use alloc::{format, string::String, vec::Vec};
use core::fmt::Write;
use jitk_core::{constant::Constant, dtype::DType, error::JitError, instruction::Instruction, opcode::Opcode};

/// OpenCL C writer
#[derive(Debug, Clone, Copy)]
pub struct OpenClWriter {
    /// Number of leading loops mapped to work items
    pub max_threaded_ranks: usize,
}

impl Default for OpenClWriter {
    fn default() -> Self {
        OpenClWriter { max_threaded_ranks: 3 }
    }
}

/// Parameter list shared by the OpenCL and CUDA kernels
pub(super) fn gpu_params<W: Writer + ?Sized>(
    w: &W,
    symbols: &SymbolTable,
    global: &str,
    index_t: &str,
) -> Result<Vec<String>, JitError> {
    if !symbols.array_temps().is_empty() {
        return Err(JitError::unsupported(format!(
            "{} writer can not allocate temporary arrays, pass them as parameters",
            w.target()
        )));
    }
    let unsupported = |dtype: DType| JitError::unsupported(format!("{dtype} not supported by {} writer", w.target()));
    let mut params = Vec::new();
    for base in symbols.params() {
        let dtype = symbols.dtype(*base);
        let t = w.type_name(dtype).ok_or_else(|| unsupported(dtype))?;
        params.push(format!("{global}{t} *a{}", symbols.base_id(*base)));
    }
    for v in symbols.offset_strides() {
        let vid = symbols.view_id(v);
        params.push(format!("const {index_t} vo{vid}"));
        for axis in 0..v.ndim() {
            params.push(format!("const {index_t} vs{vid}_{axis}"));
        }
    }
    if symbols.config.const_as_var {
        for c in symbols.constants() {
            let id = symbols.const_id(c);
            if let Constant::R123 { .. } = c {
                params.push(format!("const {} c{id}_start", w.type_name(DType::UInt64).unwrap_or("ulong")));
                params.push(format!("const {} c{id}_key", w.type_name(DType::UInt64).unwrap_or("ulong")));
            } else {
                let t = w.type_name(c.dtype()).ok_or_else(|| unsupported(c.dtype()))?;
                params.push(format!("const {t} c{id}"));
            }
        }
    }
    Ok(params)
}

pub(super) fn gpu_random(scope: &Scope, instr: &Instruction, flat: &str) -> Option<String> {
    let Some(c @ Constant::R123 { start, key }) = instr.constant else { return None };
    let symbols = scope.symbols();
    Some(if symbols.config.const_as_var {
        let id = symbols.const_id(&c);
        format!("random123(c{id}_start, c{id}_key, {flat})")
    } else {
        format!("random123({start}ul, {key}ul, {flat})")
    })
}

pub(super) fn gpu_constant(scope: &Scope, c: &Constant) -> String {
    let symbols = scope.symbols();
    if symbols.config.const_as_var {
        format!("c{}", symbols.const_id(c))
    } else {
        format!("{c}")
    }
}

impl Writer for OpenClWriter {
    fn target(&self) -> Target {
        Target::OpenCl
    }

    fn endl(&self) -> &'static str {
        ";"
    }

    fn comment(&self, out: &mut String, indent: usize, text: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "// {text}");
    }

    fn type_name(&self, dtype: DType) -> Option<&'static str> {
        c_like::type_name(CDialect::OpenCl, dtype)
    }

    fn declare(&self, out: &mut String, indent: usize, dtype: DType, name: &str) -> Result<(), JitError> {
        let t = self
            .type_name(dtype)
            .ok_or_else(|| JitError::unsupported(format!("{dtype} not supported by opencl writer")))?;
        self.spaces(out, indent);
        let _ = writeln!(out, "{t} {name};");
        Ok(())
    }

    fn declare_index(&self, out: &mut String, indent: usize, name: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "{} {name};", c_like::index_type(CDialect::OpenCl));
    }

    fn begin_block(&self, out: &mut String, indent: usize, comment: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "{{ // {comment}");
    }

    fn end_block(&self, out: &mut String, indent: usize) {
        self.spaces(out, indent);
        out.push_str("}\n");
    }

    fn set_loop_var(&self, out: &mut String, indent: usize, rank: usize, value: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "const {} i{rank} = {value};", c_like::index_type(CDialect::OpenCl));
    }

    fn loop_head_writer(&self, out: &mut String, indent: usize, rank: usize, start: i64, size: i64) {
        self.spaces(out, indent);
        let t = c_like::index_type(CDialect::OpenCl);
        let _ = writeln!(out, "for({t} i{rank} = {start}; i{rank} < {size}; ++i{rank}) {{");
    }

    fn end_loop(&self, out: &mut String, indent: usize) {
        self.end_block(out, indent);
    }

    fn threads(&self, kernel: &LoopB) -> Vec<i64> {
        thread_stack(kernel, self.max_threaded_ranks)
    }

    fn write_threaded_head(&self, out: &mut String, indent: usize, rank: usize, size: i64) -> Result<(), JitError> {
        self.begin_block(out, indent, &format!("Threaded block (ID i{rank})"));
        self.spaces(out, indent + 1);
        let _ = writeln!(out, "const {} i{rank} = get_global_id({rank});", c_like::index_type(CDialect::OpenCl));
        self.spaces(out, indent + 1);
        let _ = writeln!(out, "if (i{rank} >= {size}) return;");
        Ok(())
    }

    fn array_element(&self, name: &str, index: &str) -> String {
        format!("{name}[{index}]")
    }

    fn write_constant(&self, scope: &Scope, c: &Constant) -> String {
        gpu_constant(scope, c)
    }

    fn write_if(&self, cond: &str, stmt: &str) -> String {
        format!("if ({cond}) {stmt}")
    }

    fn write_random(&self, scope: &Scope, instr: &Instruction, flat: &str) -> Option<String> {
        gpu_random(scope, instr, flat)
    }

    fn write_operation(&self, op: Opcode, types: &[DType], ops: &[String]) -> Option<String> {
        c_like::operation(CDialect::OpenCl, op, types, ops)
    }

    fn write_kernel(&self, kernel: &LoopB, symbols: &SymbolTable) -> Result<String, JitError> {
        let threads = self.threads(kernel);
        let mut res = String::new();
        if uses_dtype(symbols, DType::Float64) {
            res.push_str("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n");
        }
        if uses_dtype(symbols, DType::Float16) {
            res.push_str("#pragma OPENCL EXTENSION cl_khr_fp16 : enable\n");
        }
        if !res.is_empty() {
            res.push('\n');
        }
        res.push_str(&c_like::helpers(CDialect::OpenCl, symbols.use_random()));
        let params = gpu_params(self, symbols, "__global ", c_like::index_type(CDialect::OpenCl))?;
        let _ = writeln!(res, "__kernel void execute_{:x}({}) {{", symbols.codegen_hash(), params.join(", "));
        let scope = Scope::root(symbols, threads.len());
        write_kernel_body(self, &scope, kernel, &mut res, 1)?;
        res.push_str("}\n");
        Ok(res)
    }
}
