use super::{loop_depth, write_kernel_body, Target, Writer};
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

/// Fortran 2008 writer, loops are optionally annotated with OpenMP directives.
/// Booleans are stored as `integer(c_int8_t)` holding 0 or 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct FortranWriter {
    /// Parallelize outermost loops
    pub openmp: bool,
    /// Vectorize innermost loops
    pub openmp_simd: bool,
}

fn kind(dtype: DType) -> Option<&'static str> {
    Some(match dtype {
        DType::Bool | DType::Int8 => "c_int8_t",
        DType::Int16 => "c_int16_t",
        DType::Int32 => "c_int32_t",
        DType::Int64 => "c_int64_t",
        DType::Float32 => "c_float",
        DType::Float64 => "c_double",
        _ => return None,
    })
}

fn reduction_clause(op: Opcode) -> Option<&'static str> {
    Some(match op.sweep_operation()? {
        Opcode::Add => "+",
        Opcode::Multiply => "*",
        Opcode::Maximum => "MAX",
        Opcode::Minimum => "MIN",
        Opcode::BitwiseAnd => "IAND",
        Opcode::BitwiseOr => "IOR",
        Opcode::BitwiseXor => "IEOR",
        _ => return None,
    })
}

fn flag(cond: &str) -> String {
    format!("MERGE(1, 0, {cond})")
}

fn operation(op: Opcode, types: &[DType], ops: &[String]) -> Option<String> {
    let out = ops.first()?;
    let out_type = *types.first()?;
    let t = types.get(1).copied().unwrap_or(out_type);
    kind(t)?;
    kind(out_type)?;
    let a = ops.get(1).map_or("", String::as_str);
    let b = ops.get(2).map_or("", String::as_str);
    let int = t.is_integer() || t == DType::Bool;
    let intrinsic = |name: &str| t.is_float().then(|| format!("{name}({a})"));
    let expr = match op {
        Opcode::Add => format!("{a} + {b}"),
        Opcode::Subtract => format!("{a} - {b}"),
        Opcode::Multiply => format!("{a} * {b}"),
        Opcode::Divide if int => format!("({a} - MODULO({a}, {b})) / {b}"),
        Opcode::Divide => format!("{a} / {b}"),
        Opcode::Power => format!("{a} ** {b}"),
        Opcode::Mod => format!("MOD({a}, {b})"),
        Opcode::Remainder => format!("MODULO({a}, {b})"),
        Opcode::Maximum => format!("MERGE({a}, {b}, {a} > {b})"),
        Opcode::Minimum => format!("MERGE({a}, {b}, {a} < {b})"),
        Opcode::BitwiseAnd if int => format!("IAND({a}, {b})"),
        Opcode::BitwiseOr if int => format!("IOR({a}, {b})"),
        Opcode::BitwiseXor if int => format!("IEOR({a}, {b})"),
        Opcode::LeftShift if int => format!("SHIFTL({a}, INT({b}))"),
        Opcode::RightShift if int => format!("SHIFTA({a}, INT({b}))"),
        Opcode::Equal => flag(&format!("{a} == {b}")),
        Opcode::NotEqual => flag(&format!("{a} /= {b}")),
        Opcode::Greater => flag(&format!("{a} > {b}")),
        Opcode::GreaterEqual => flag(&format!("{a} >= {b}")),
        Opcode::Less => flag(&format!("{a} < {b}")),
        Opcode::LessEqual => flag(&format!("{a} <= {b}")),
        Opcode::LogicalAnd => flag(&format!("{a} /= 0 .AND. {b} /= 0")),
        Opcode::LogicalOr => flag(&format!("{a} /= 0 .OR. {b} /= 0")),
        Opcode::LogicalXor => flag(&format!("({a} /= 0) .NEQV. ({b} /= 0)")),
        Opcode::LogicalNot => flag(&format!("{a} == 0")),
        Opcode::Invert if t == DType::Bool => format!("1 - {a}"),
        Opcode::Invert if int => format!("NOT({a})"),
        Opcode::Arctan2 if t.is_float() => format!("ATAN2({a}, {b})"),
        Opcode::Identity if out_type == DType::Bool && t != DType::Bool => flag(&format!("{a} /= 0")),
        Opcode::Identity if t.is_float() && !out_type.is_float() => format!("INT({a}, {})", kind(out_type)?),
        Opcode::Identity => a.into(),
        Opcode::Absolute => format!("ABS({a})"),
        Opcode::Sin => intrinsic("SIN")?,
        Opcode::Cos => intrinsic("COS")?,
        Opcode::Tan => intrinsic("TAN")?,
        Opcode::Sinh => intrinsic("SINH")?,
        Opcode::Cosh => intrinsic("COSH")?,
        Opcode::Tanh => intrinsic("TANH")?,
        Opcode::Arcsin => intrinsic("ASIN")?,
        Opcode::Arccos => intrinsic("ACOS")?,
        Opcode::Arctan => intrinsic("ATAN")?,
        Opcode::Exp => intrinsic("EXP")?,
        Opcode::Log => intrinsic("LOG")?,
        Opcode::Log10 => intrinsic("LOG10")?,
        Opcode::Sqrt => intrinsic("SQRT")?,
        Opcode::Trunc => intrinsic("AINT")?,
        Opcode::Ceil if t.is_float() => format!("MERGE(AINT({a}) + 1, AINT({a}), {a} > AINT({a}))"),
        Opcode::Floor if t.is_float() => format!("MERGE(AINT({a}) - 1, AINT({a}), {a} < AINT({a}))"),
        Opcode::Sign => format!("{} - {}", flag(&format!("{a} > 0")), flag(&format!("{a} < 0"))),
        Opcode::Isnan if t.is_float() => flag(&format!("IEEE_IS_NAN({a})")),
        Opcode::Isinf if t.is_float() => flag(&format!(".NOT. IEEE_IS_FINITE({a}) .AND. .NOT. IEEE_IS_NAN({a})")),
        Opcode::Isfinite if t.is_float() => flag(&format!("IEEE_IS_FINITE({a})")),
        Opcode::Isnan | Opcode::Isinf => "0".into(),
        Opcode::Isfinite => "1".into(),
        _ => return None,
    };
    Some(format!("{out} = {expr}"))
}

fn literal(c: &Constant) -> Option<String> {
    let k = kind(c.dtype())?;
    Some(match c {
        Constant::Bool(_) | Constant::I8(_) | Constant::I16(_) | Constant::I32(_) | Constant::I64(_) => {
            format!("{}_{k}", c.as_i64())
        }
        _ => {
            let x = c.as_f64();
            if x.is_nan() {
                format!("IEEE_VALUE(1.0_{k}, IEEE_QUIET_NAN)")
            } else if x.is_infinite() {
                let class = if x > 0.0 { "IEEE_POSITIVE_INF" } else { "IEEE_NEGATIVE_INF" };
                format!("IEEE_VALUE(1.0_{k}, {class})")
            } else {
                format!("{x:?}_{k}")
            }
        }
    })
}

impl Writer for FortranWriter {
    fn target(&self) -> Target {
        Target::Fortran
    }

    fn endl(&self) -> &'static str {
        ""
    }

    fn comment(&self, out: &mut String, indent: usize, text: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "! {text}");
    }

    fn type_name(&self, dtype: DType) -> Option<&'static str> {
        Some(match dtype {
            DType::Bool | DType::Int8 => "integer(c_int8_t)",
            DType::Int16 => "integer(c_int16_t)",
            DType::Int32 => "integer(c_int32_t)",
            DType::Int64 => "integer(c_int64_t)",
            DType::Float32 => "real(c_float)",
            DType::Float64 => "real(c_double)",
            _ => return None,
        })
    }

    fn declare(&self, out: &mut String, indent: usize, dtype: DType, name: &str) -> Result<(), JitError> {
        let t = self
            .type_name(dtype)
            .ok_or_else(|| JitError::unsupported(format!("{dtype} not supported by fortran writer")))?;
        self.spaces(out, indent);
        let _ = writeln!(out, "{t} :: {name}");
        Ok(())
    }

    fn declare_index(&self, out: &mut String, indent: usize, name: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "integer(c_int64_t) :: {name}");
    }

    fn begin_block(&self, out: &mut String, indent: usize, comment: &str) {
        self.spaces(out, indent);
        let _ = writeln!(out, "BLOCK ! {comment}");
    }

    fn end_block(&self, out: &mut String, indent: usize) {
        self.spaces(out, indent);
        out.push_str("END BLOCK\n");
    }

    fn begin_scope(&self, out: &mut String, indent: usize) {
        self.spaces(out, indent);
        out.push_str("BLOCK\n");
    }

    fn end_scope(&self, out: &mut String, indent: usize) {
        self.end_block(out, indent);
    }

    fn set_loop_var(&self, out: &mut String, indent: usize, rank: usize, value: &str) {
        self.assign(out, indent, &format!("i{rank}"), value);
    }

    fn loop_head_writer(&self, out: &mut String, indent: usize, rank: usize, start: i64, size: i64) {
        self.spaces(out, indent);
        let _ = writeln!(out, "DO i{rank} = {start}, {}", size - 1);
    }

    fn end_loop(&self, out: &mut String, indent: usize) {
        self.spaces(out, indent);
        out.push_str("END DO\n");
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
        let inner_ranks: alloc::collections::BTreeSet<i32> = l.all_sub_blocks().iter().map(|b| b.rank).collect();
        if !inner_ranks.is_empty() {
            let vars: Vec<String> = inner_ranks.iter().map(|r| format!("i{r}")).collect();
            let _ = write!(clauses, " PRIVATE({})", vars.join(", "));
        }
        for r in scalar_reductions {
            match reduction_clause(r.opcode) {
                Some(op) => {
                    let _ = write!(clauses, " REDUCTION({op}:s{})", scope.symbols().view_id(&r.operand[0]));
                }
                None => parallel = false,
            }
        }
        if parallel {
            for s in &l.sweeps {
                if s.opcode.is_reduction() && !scalar_reductions.iter().any(|r| alloc::sync::Arc::ptr_eq(r, s)) {
                    let atomic = matches!(
                        s.opcode.sweep_operation(),
                        Some(Opcode::Add | Opcode::Multiply | Opcode::BitwiseAnd | Opcode::BitwiseOr | Opcode::BitwiseXor)
                    );
                    let p = if atomic { OmpProtection::Atomic } else { OmpProtection::Critical };
                    protected.push((s.operand[0].clone(), p));
                }
            }
            self.spaces(out, indent);
            let simd = if simd { " SIMD" } else { "" };
            let _ = writeln!(out, "!$OMP PARALLEL DO{simd}{clauses}");
        } else if simd {
            self.spaces(out, indent);
            out.push_str("!$OMP SIMD\n");
        }
        protected
    }

    fn array_element(&self, name: &str, index: &str) -> String {
        format!("{name}(1 + {index})")
    }

    fn write_constant(&self, scope: &Scope, c: &Constant) -> String {
        let symbols = scope.symbols();
        if symbols.config.const_as_var {
            format!("c{}", symbols.const_id(c))
        } else {
            // Unsupported constant types are rejected when the kernel declares its operands
            literal(c).unwrap_or_default()
        }
    }

    fn write_if(&self, cond: &str, stmt: &str) -> String {
        format!("IF ({cond} /= 0) {stmt}")
    }

    fn write_random(&self, _scope: &Scope, _instr: &Instruction, _flat: &str) -> Option<String> {
        None
    }

    fn write_protected(&self, out: &mut String, indent: usize, protection: OmpProtection, stmt: &str) {
        self.spaces(out, indent);
        match protection {
            OmpProtection::Atomic => {
                out.push_str("!$OMP ATOMIC\n");
                self.spaces(out, indent);
                let _ = writeln!(out, "{stmt}");
            }
            OmpProtection::Critical => {
                out.push_str("!$OMP CRITICAL\n");
                self.spaces(out, indent);
                let _ = writeln!(out, "{stmt}");
                self.spaces(out, indent);
                out.push_str("!$OMP END CRITICAL\n");
            }
        }
    }

    fn write_operation(&self, op: Opcode, types: &[DType], ops: &[String]) -> Option<String> {
        operation(op, types, ops)
    }

    fn write_kernel(&self, kernel: &LoopB, symbols: &SymbolTable) -> Result<String, JitError> {
        let unsupported = |dtype: DType| JitError::unsupported(format!("{dtype} not supported by fortran writer"));
        let mut res = String::from(
            "subroutine launcher(data_list, offset_strides, constants) bind(C, name=\"launcher\")
    use, intrinsic :: iso_c_binding
    use, intrinsic :: ieee_arithmetic
    implicit none
    type(c_ptr), intent(in) :: data_list(*)
    integer(c_int64_t), intent(in) :: offset_strides(*)
    integer(c_int64_t), intent(in) :: constants(2, *)
",
        );
        let mut init = String::new();
        for (i, base) in symbols.params().iter().enumerate() {
            let dtype = symbols.dtype(*base);
            let t = self.type_name(dtype).ok_or_else(|| unsupported(dtype))?;
            let id = symbols.base_id(*base);
            let _ = writeln!(res, "    {t}, pointer :: a{id}(:)");
            let _ = writeln!(
                init,
                "    call c_f_pointer(data_list({}), a{id}, [{}_c_int64_t])",
                i + 1,
                symbols.extent(*base).max(1)
            );
        }
        for base in symbols.array_temps() {
            let dtype = symbols.dtype(*base);
            let t = self.type_name(dtype).ok_or_else(|| unsupported(dtype))?;
            let id = symbols.base_id(*base);
            let _ = writeln!(res, "    {t}, allocatable :: a{id}(:)");
            let _ = writeln!(init, "    allocate(a{id}({}))", symbols.extent(*base).max(1));
        }
        let mut k = 1;
        for v in symbols.offset_strides() {
            let vid = symbols.view_id(v);
            let _ = writeln!(res, "    integer(c_int64_t) :: vo{vid}");
            let _ = writeln!(init, "    vo{vid} = offset_strides({k})");
            k += 1;
            for axis in 0..v.ndim() {
                let _ = writeln!(res, "    integer(c_int64_t) :: vs{vid}_{axis}");
                let _ = writeln!(init, "    vs{vid}_{axis} = offset_strides({k})");
                k += 1;
            }
        }
        if symbols.config.const_as_var {
            for (i, c) in symbols.constants().iter().enumerate() {
                let t = self.type_name(c.dtype()).ok_or_else(|| unsupported(c.dtype()))?;
                let id = symbols.const_id(c);
                let _ = writeln!(res, "    {t} :: c{id}");
                let _ = writeln!(init, "    c{id} = TRANSFER(constants(:, {}), c{id})", i + 1);
            }
        } else if let Some(c) = symbols.constants().iter().find(|c| kind(c.dtype()).is_none()) {
            return Err(unsupported(c.dtype()));
        }
        let depth = loop_depth(kernel);
        if depth > 0 {
            let vars: Vec<String> = (0..depth).map(|r| format!("i{r}")).collect();
            let _ = writeln!(res, "    integer(c_int64_t) :: {}", vars.join(", "));
        }
        res.push_str(&init);
        self.begin_scope(&mut res, 1);
        let scope = Scope::root(symbols, 0);
        write_kernel_body(self, &scope, kernel, &mut res, 2)?;
        self.end_scope(&mut res, 1);
        for base in symbols.array_temps() {
            let _ = writeln!(res, "    deallocate(a{})", symbols.base_id(*base));
        }
        res.push_str("end subroutine launcher\n");
        Ok(res)
    }
}
