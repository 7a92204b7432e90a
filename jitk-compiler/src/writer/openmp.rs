use super::{
    c_like::{self, CDialect},
    uses_dtype, write_kernel_body, Target, Writer,
};
use crate::{
    block::LoopB,
    symbols::{OmpProtection, Scope, SymbolTable},
};
use alloc::{format, string::String, vec::Vec};
use core::fmt::Write;
use jitk_core::{
    constant::Constant,
    dtype::DType,
    error::JitError,
    instruction::{InstrPtr, Instruction},
    opcode::Opcode,
    view::View,
};

/// C99 writer, loops are optionally annotated with OpenMP pragmas
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenMpWriter {
    /// Parallelize outermost loops
    pub openmp: bool,
    /// Vectorize innermost loops
    pub openmp_simd: bool,
    /// Scalars are declared volatile
    pub use_volatile: bool,
}

fn reduction_clause(op: Opcode) -> Option<&'static str> {
    Some(match op.sweep_operation()? {
        Opcode::Add => "+",
        Opcode::Multiply => "*",
        Opcode::Maximum => "max",
        Opcode::Minimum => "min",
        Opcode::BitwiseAnd => "&",
        Opcode::BitwiseOr => "|",
        Opcode::BitwiseXor => "^",
        Opcode::LogicalAnd => "&&",
        Opcode::LogicalOr => "||",
        _ => return None,
    })
}

fn protection(instr: &Instruction) -> OmpProtection {
    let dtype = instr.operand_type(0);
    let atomic_op = matches!(
        instr.opcode.sweep_operation(),
        Some(Opcode::Add | Opcode::Multiply | Opcode::BitwiseAnd | Opcode::BitwiseOr | Opcode::BitwiseXor)
    );
    if atomic_op && !dtype.is_complex() && dtype != DType::Bool {
        OmpProtection::Atomic
    } else {
        OmpProtection::Critical
    }
}

impl Writer for OpenMpWriter {
    fn target(&self) -> Target {
        Target::OpenMp
    }

    fn endl(&self) -> &'static str {
        ";"
    }

    fn comment(&self, out: &mut String, indent: usize, text: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "// {text}");
    }

    fn type_name(&self, dtype: DType) -> Option<&'static str> {
        c_like::type_name(CDialect::C99, dtype)
    }

    fn declare(&self, out: &mut String, indent: usize, dtype: DType, name: &str) -> Result<(), JitError> {
        let t = self
            .type_name(dtype)
            .ok_or_else(|| JitError::unsupported(format!("{dtype} not supported by openmp writer")))?;
        self.spaces(out, indent);
        let volatile = if self.use_volatile { "volatile " } else { "" };
        let _ = writeln!(out, "{volatile}{t} {name};");
        Ok(())
    }

    fn declare_index(&self, out: &mut String, indent: usize, name: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "int64_t {name};");
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
        let _ = writeln!(out, "const int64_t i{rank} = {value};");
    }

    fn loop_head_writer(&self, out: &mut String, indent: usize, rank: usize, start: i64, size: i64) {
        self.spaces(out, indent);
        let _ = writeln!(out, "for(int64_t i{rank} = {start}; i{rank} < {size}; ++i{rank}) {{");
    }

    fn end_loop(&self, out: &mut String, indent: usize) {
        self.end_block(out, indent);
    }

    fn write_header(
        &self,
        scope: &Scope,
        l: &LoopB,
        scalar_reductions: &[InstrPtr],
        out: &mut String,
        indent: usize,
    ) -> Vec<(View, OmpProtection)> {
        let mut protected = Vec::new();
        let simd = self.openmp_simd && l.is_innermost() && l.sweeps.is_empty();
        let mut parallel = self.openmp && l.rank == 0 && !l.sweeps.iter().any(|s| s.opcode.is_accumulate());
        let mut clauses = String::new();
        if parallel {
            for r in scalar_reductions {
                match reduction_clause(r.opcode) {
                    Some(op) if !r.operand_type(0).is_complex() => {
                        let _ = write!(clauses, " reduction({op}:s{})", scope.symbols().view_id(&r.operand[0]));
                    }
                    _ => parallel = false,
                }
            }
        }
        if parallel {
            for s in &l.sweeps {
                if s.opcode.is_reduction() && !scalar_reductions.iter().any(|r| alloc::sync::Arc::ptr_eq(r, s)) {
                    protected.push((s.operand[0].clone(), protection(s)));
                }
            }
        }
        match (parallel, simd) {
            (true, true) => {
                self.spaces(out, indent);
                let _ = writeln!(out, "#pragma omp parallel for simd{clauses}");
            }
            (true, false) => {
                self.spaces(out, indent);
                let _ = writeln!(out, "#pragma omp parallel for{clauses}");
            }
            (false, true) => {
                self.spaces(out, indent);
                out.push_str("#pragma omp simd\n");
            }
            (false, false) => {}
        }
        protected
    }

    fn array_element(&self, name: &str, index: &str) -> String {
        format!("{name}[{index}]")
    }

    fn write_constant(&self, scope: &Scope, c: &Constant) -> String {
        let symbols = scope.symbols();
        if symbols.config.const_as_var {
            format!("c{}.{}", symbols.const_id(c), c.dtype().union_member())
        } else {
            format!("{c}")
        }
    }

    fn write_if(&self, cond: &str, stmt: &str) -> String {
        format!("if ({cond}) {stmt}")
    }

    fn write_random(&self, scope: &Scope, instr: &Instruction, flat: &str) -> Option<String> {
        let Some(c @ Constant::R123 { start, key }) = instr.constant else { return None };
        let symbols = scope.symbols();
        Some(if symbols.config.const_as_var {
            let id = symbols.const_id(&c);
            format!("random123(c{id}.r123.start, c{id}.r123.key, {flat})")
        } else {
            format!("random123({start}ul, {key}ul, {flat})")
        })
    }

    fn write_protected(&self, out: &mut String, indent: usize, protection: OmpProtection, stmt: &str) {
        self.spaces(out, indent);
        match protection {
            OmpProtection::Atomic => out.push_str("#pragma omp atomic\n"),
            OmpProtection::Critical => out.push_str("#pragma omp critical\n"),
        }
        self.spaces(out, indent);
        let _ = writeln!(out, "{stmt};");
    }

    fn write_operation(&self, op: Opcode, types: &[DType], ops: &[String]) -> Option<String> {
        c_like::operation(CDialect::C99, op, types, ops)
    }

    fn write_kernel(&self, kernel: &LoopB, symbols: &SymbolTable) -> Result<String, JitError> {
        if uses_dtype(symbols, DType::Float16) {
            return Err(JitError::unsupported("FLOAT16 not supported by openmp writer"));
        }
        let mut res = String::from(
            "#include <stdint.h>\n#include <stdlib.h>\n#include <stdbool.h>\n#include <complex.h>\n#include <math.h>\n\n",
        );
        res.push_str("union dtype {\n");
        for dtype in DType::all().filter(|d| !matches!(d, DType::Float16 | DType::R123)) {
            if let Some(t) = self.type_name(dtype) {
                let _ = writeln!(res, "    {t} {};", dtype.union_member());
            }
        }
        res.push_str("    struct { uint64_t start, key; } r123;\n};\n\n");
        res.push_str(&c_like::helpers(CDialect::C99, symbols.use_random()));

        let mut params: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        let mut bindings = String::new();
        for (i, base) in symbols.params().iter().enumerate() {
            let id = symbols.base_id(*base);
            let t = self.declare_type(symbols.dtype(*base))?;
            params.push(format!("{t} *a{id}"));
            args.push(format!("a{id}"));
            let _ = writeln!(bindings, "    {t} *a{id} = data_list[{i}];");
        }
        let mut k = 0;
        for v in symbols.offset_strides() {
            let vid = symbols.view_id(v);
            params.push(format!("const int64_t vo{vid}"));
            args.push(format!("offset_strides[{k}]"));
            k += 1;
            for axis in 0..v.ndim() {
                params.push(format!("const int64_t vs{vid}_{axis}"));
                args.push(format!("offset_strides[{k}]"));
                k += 1;
            }
        }
        if symbols.config.const_as_var {
            for (i, c) in symbols.constants().iter().enumerate() {
                params.push(format!("union dtype c{}", symbols.const_id(c)));
                args.push(format!("constants[{i}]"));
            }
        }

        let _ = writeln!(res, "void execute({}) {{", params.join(", "));
        for base in symbols.array_temps() {
            let t = self.declare_type(symbols.dtype(*base))?;
            let id = symbols.base_id(*base);
            let _ = writeln!(res, "    {t} *a{id} = malloc({} * sizeof({t}));", symbols.extent(*base).max(1));
        }
        let scope = Scope::root(symbols, 0);
        write_kernel_body(self, &scope, kernel, &mut res, 1)?;
        for base in symbols.array_temps() {
            let _ = writeln!(res, "    free(a{});", symbols.base_id(*base));
        }
        res.push_str("}\n\n");
        res.push_str("void launcher(void* data_list[], int64_t offset_strides[], union dtype constants[]) {\n");
        res.push_str(&bindings);
        let _ = writeln!(res, "    execute({});", args.join(", "));
        res.push_str("}\n");
        Ok(res)
    }
}

impl OpenMpWriter {
    fn declare_type(&self, dtype: DType) -> Result<&'static str, JitError> {
        self.type_name(dtype)
            .ok_or_else(|| JitError::unsupported(format!("{dtype} not supported by openmp writer")))
    }
}
