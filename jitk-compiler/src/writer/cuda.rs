use super::{
    c_like::{self, CDialect},
    opencl::{gpu_constant, gpu_params, gpu_random},
    thread_stack, uses_dtype, write_kernel_body, Target, Writer,
};
use crate::{
    block::LoopB,
    symbols::{Scope, SymbolTable},
};
use alloc::{format, string::String, vec::Vec};
use core::fmt::Write;
use jitk_core::{constant::Constant, dtype::DType, error::JitError, instruction::Instruction, opcode::Opcode};

/// CUDA C++ writer
#[derive(Debug, Clone, Copy)]
pub struct CudaWriter {
    /// Number of leading loops mapped to threads
    pub max_threaded_ranks: usize,
}

impl Default for CudaWriter {
    fn default() -> Self {
        CudaWriter { max_threaded_ranks: 3 }
    }
}

const THREAD_DIMS: [char; 3] = ['x', 'y', 'z'];

impl Writer for CudaWriter {
    fn target(&self) -> Target {
        Target::Cuda
    }

    fn endl(&self) -> &'static str {
        ";"
    }

    fn comment(&self, out: &mut String, indent: usize, text: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "// {text}");
    }

    fn type_name(&self, dtype: DType) -> Option<&'static str> {
        c_like::type_name(CDialect::Cuda, dtype)
    }

    fn declare(&self, out: &mut String, indent: usize, dtype: DType, name: &str) -> Result<(), JitError> {
        let t = self
            .type_name(dtype)
            .ok_or_else(|| JitError::unsupported(format!("{dtype} not supported by cuda writer")))?;
        self.spaces(out, indent);
        let _ = writeln!(out, "{t} {name};");
        Ok(())
    }

    fn declare_index(&self, out: &mut String, indent: usize, name: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "{} {name};", c_like::index_type(CDialect::Cuda));
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
        let _ = writeln!(out, "const {} i{rank} = {value};", c_like::index_type(CDialect::Cuda));
    }

    fn loop_head_writer(&self, out: &mut String, indent: usize, rank: usize, start: i64, size: i64) {
        self.spaces(out, indent);
        let t = c_like::index_type(CDialect::Cuda);
        let _ = writeln!(out, "for({t} i{rank} = {start}; i{rank} < {size}; ++i{rank}) {{");
    }

    fn end_loop(&self, out: &mut String, indent: usize) {
        self.end_block(out, indent);
    }

    fn threads(&self, kernel: &LoopB) -> Vec<i64> {
        thread_stack(kernel, self.max_threaded_ranks.min(THREAD_DIMS.len()))
    }

    fn write_threaded_head(&self, out: &mut String, indent: usize, rank: usize, size: i64) -> Result<(), JitError> {
        let Some(d) = THREAD_DIMS.get(rank) else {
            return Err(JitError::unsupported(format!("cuda writer has no thread dimension for rank {rank}")));
        };
        self.begin_block(out, indent, &format!("Threaded block (ID i{rank})"));
        self.spaces(out, indent + 1);
        let t = c_like::index_type(CDialect::Cuda);
        let _ = writeln!(out, "const {t} i{rank} = ({t})blockIdx.{d}*blockDim.{d}+threadIdx.{d};");
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
        c_like::operation(CDialect::Cuda, op, types, ops)
    }

    fn write_kernel(&self, kernel: &LoopB, symbols: &SymbolTable) -> Result<String, JitError> {
        let threads = self.threads(kernel);
        let mut res = String::new();
        if uses_dtype(symbols, DType::Float16) {
            res.push_str("#include <cuda_fp16.h>\n\n");
        }
        res.push_str(&c_like::helpers(CDialect::Cuda, symbols.use_random()));
        let params = gpu_params(self, symbols, "", c_like::index_type(CDialect::Cuda))?;
        let _ = writeln!(
            res,
            "extern \"C\" __global__ void execute_{:x}({}) {{",
            symbols.codegen_hash(),
            params.join(", ")
        );
        let scope = Scope::root(symbols, threads.len());
        write_kernel_body(self, &scope, kernel, &mut res, 1)?;
        res.push_str("}\n");
        Ok(res)
    }
}
