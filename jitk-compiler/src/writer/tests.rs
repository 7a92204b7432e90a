use super::*;
use crate::{
    block::{create_nested_block, BlockIdAlloc},
    symbols::SymbolConfig,
};
use alloc::{collections::BTreeSet, sync::Arc, vec};
use jitk_core::base::BaseId;

fn view(base: u32, dtype: DType, start: i64, shape: &[i64]) -> View {
    let stride = jitk_core::view::contiguous_stride(shape);
    View::from_parts(BaseId::from(base), dtype, start, shape.into(), stride).unwrap()
}

fn f32_view(base: u32, shape: &[i64]) -> View {
    view(base, DType::Float32, 0, shape)
}

fn kernel_of(instrs: &[Instruction]) -> LoopB {
    let mut alloc = BlockIdAlloc::new();
    let instrs: Vec<InstrPtr> = instrs.iter().cloned().map(Arc::new).collect();
    let b = create_nested_block(&mut alloc, &instrs, 0, BTreeSet::new());
    LoopB::kernel(&mut alloc, vec![Block::Loop(b)])
}

fn source(w: &impl Writer, instrs: &[Instruction], config: SymbolConfig) -> Result<String, JitError> {
    let kernel = kernel_of(instrs);
    let symbols = SymbolTable::new(&kernel, config);
    w.write_kernel(&kernel, &symbols)
}

fn add(out: View, a: View, b: View) -> Instruction {
    Instruction::new(Opcode::Add, vec![out, a, b], None)
}

#[test]
fn openmp_scalar_reduction_is_peeled() -> Result<(), JitError> {
    let reduce = Instruction::sweep(Opcode::AddReduce, f32_view(0, &[1]), f32_view(1, &[5]), 0);
    let src = source(&OpenMpWriter::default(), &[reduce], SymbolConfig::default())?;
    assert!(src.contains("{ // Scalar replaced reductions"));
    assert!(src.contains("float s0;"));
    assert!(src.contains("{ // Peeled loop, 1. sweep iteration"));
    assert!(src.contains("const int64_t i0 = 0;"));
    assert!(src.contains("s0 = a1[idx0_0];"));
    assert!(src.contains("for(int64_t i0 = 1; i0 < 5; ++i0) {"));
    assert!(src.contains("idx0_0 = vo1 +i0*vs1_0;"));
    assert!(src.contains("s0 = s0 + a1[idx0_0];"));
    assert!(src.contains("a0[vo0] = s0;"));
    assert!(src.contains("void launcher(void* data_list[], int64_t offset_strides[], union dtype constants[])"));
    Ok(())
}

#[test]
fn openmp_parallel_reduction_over_outer_axis_is_atomic() -> Result<(), JitError> {
    let reduce = Instruction::sweep(Opcode::AddReduce, f32_view(0, &[4]), f32_view(1, &[3, 4]), 0);
    let w = OpenMpWriter { openmp: true, ..OpenMpWriter::default() };
    let src = source(&w, &[reduce], SymbolConfig::default())?;
    // First row is copied, the remaining rows accumulate from parallel iterations
    assert!(src.contains("a0[idx1_0] = a1[idx1_1];"));
    assert!(src.contains("#pragma omp parallel for\n"));
    assert!(src.contains("for(int64_t i0 = 1; i0 < 3; ++i0) {"));
    assert!(src.contains("#pragma omp atomic\n"));
    assert!(src.contains("a0[idx1_0] = a0[idx1_0] + a1[idx1_1];"));
    Ok(())
}

#[test]
fn accumulate_reads_previous_element() -> Result<(), JitError> {
    let scan = Instruction::sweep(Opcode::AddAccumulate, f32_view(0, &[6]), f32_view(1, &[6]), 0);
    let w = OpenMpWriter { openmp: true, ..OpenMpWriter::default() };
    let src = source(&w, &[scan], SymbolConfig::default())?;
    assert!(src.contains("a0[vo0 +(i0-1)*vs0_0]"));
    assert!(!src.contains("#pragma omp parallel"));
    Ok(())
}

#[test]
fn literal_offsets_and_strides() -> Result<(), JitError> {
    let config = SymbolConfig { strides_as_var: false, index_as_var: false, ..SymbolConfig::default() };
    let instr = add(f32_view(0, &[8]), view(1, DType::Float32, 2, &[8]), f32_view(2, &[8]));
    let src = source(&OpenMpWriter::default(), &[instr], config)?;
    assert!(src.contains("a0[0 +i0*1] = a1[2 +i0*1] + a2[0 +i0*1];"));
    assert!(!src.contains("vo0"));
    Ok(())
}

#[test]
fn constants_are_union_parameters() -> Result<(), JitError> {
    let instr = Instruction::new(
        Opcode::Multiply,
        vec![f32_view(0, &[8]), f32_view(1, &[8]), View::constant(DType::Float32)],
        Some(Constant::f32(2.0)),
    );
    let src = source(&OpenMpWriter::default(), &[instr.clone()], SymbolConfig::default())?;
    assert!(src.contains("union dtype c0"));
    assert!(src.contains("a0[idx0_0] = a1[idx0_1] * c0.float32;"));
    let config = SymbolConfig { const_as_var: false, ..SymbolConfig::default() };
    let src = source(&OpenMpWriter::default(), &[instr], config)?;
    assert!(src.contains("a1[idx0_1] * 2.0f;"));
    Ok(())
}

#[test]
fn signed_division_floors() {
    let ops = [String::from("a"), String::from("b"), String::from("c")];
    let types = [DType::Int32; 3];
    assert_eq!(
        c_like::operation(c_like::CDialect::C99, Opcode::Divide, &types, &ops).as_deref(),
        Some("a = ((b > 0) != (c > 0) && (b % c) != 0) ? (b / c - 1) : (b / c)")
    );
    let types = [DType::Float64; 3];
    assert_eq!(
        c_like::operation(c_like::CDialect::C99, Opcode::Divide, &types, &ops).as_deref(),
        Some("a = b / c")
    );
    let types = [DType::Float32; 2];
    assert_eq!(
        c_like::operation(c_like::CDialect::C99, Opcode::Sqrt, &types, &ops[..2]).as_deref(),
        Some("a = sqrtf(b)")
    );
}

#[test]
fn unsupported_instructions() {
    let random = Instruction::new(
        Opcode::Random,
        vec![view(0, DType::Int64, 0, &[4]), View::constant(DType::R123)],
        Some(Constant::R123 { start: 0, key: 7 }),
    );
    let err = source(&FortranWriter::default(), &[random], SymbolConfig::default());
    assert!(matches!(err, Err(JitError::Unsupported(_))));

    let half = add(view(0, DType::Float16, 0, &[4]), view(1, DType::Float16, 0, &[4]), view(2, DType::Float16, 0, &[4]));
    let err = source(&OpenMpWriter::default(), &[half], SymbolConfig::default());
    assert!(matches!(err, Err(JitError::Unsupported(_))));

    let complex_max = Instruction::new(
        Opcode::Maximum,
        vec![view(0, DType::Complex64, 0, &[4]), view(1, DType::Complex64, 0, &[4]), view(2, DType::Complex64, 0, &[4])],
        None,
    );
    let err = source(&OpenMpWriter::default(), &[complex_max], SymbolConfig::default());
    assert!(matches!(err, Err(JitError::Unsupported(e)) if e.contains("MAXIMUM")));
}

#[test]
fn openmp_random() -> Result<(), JitError> {
    let random = Instruction::new(
        Opcode::Random,
        vec![view(0, DType::UInt64, 0, &[4]), View::constant(DType::R123)],
        Some(Constant::R123 { start: 0, key: 7 }),
    );
    let src = source(&OpenMpWriter::default(), &[random], SymbolConfig::default())?;
    assert!(src.contains("static inline uint64_t random123(uint64_t start, uint64_t key, uint64_t index)"));
    assert!(src.contains("= random123(c0.r123.start, c0.r123.key, (i0));"));
    Ok(())
}

#[test]
fn gather_addresses_by_value() -> Result<(), JitError> {
    let gather = Instruction::new(
        Opcode::Gather,
        vec![f32_view(0, &[4]), f32_view(1, &[16]), view(2, DType::Int64, 0, &[4])],
        None,
    );
    let src = source(&OpenMpWriter::default(), &[gather], SymbolConfig::default())?;
    assert!(src.contains("a0[idx0_0] = a1[vo1 + a2[idx0_1]];"));
    Ok(())
}

#[test]
fn opencl_threaded_blocks() -> Result<(), JitError> {
    let instr = add(f32_view(0, &[4, 8]), f32_view(1, &[4, 8]), f32_view(2, &[4, 8]));
    let kernel = kernel_of(&[instr]);
    assert_eq!(thread_stack(&kernel, 3), [4, 8]);
    let symbols = SymbolTable::new(&kernel, SymbolConfig::default());
    let src = OpenClWriter::default().write_kernel(&kernel, &symbols)?;
    assert!(src.contains(&format!("__kernel void execute_{:x}(__global float *a0", symbols.codegen_hash())));
    assert!(src.contains("{ // Threaded block (ID i0)"));
    assert!(src.contains("const long i0 = get_global_id(0);"));
    assert!(src.contains("if (i0 >= 4) return;"));
    assert!(src.contains("const long i1 = get_global_id(1);"));
    assert!(src.contains("if (i1 >= 8) return;"));
    assert!(!src.contains("for("));

    let src = CudaWriter::default().write_kernel(&kernel, &symbols)?;
    assert!(src.contains("extern \"C\" __global__ void execute_"));
    assert!(src.contains("const long long i1 = (long long)blockIdx.y*blockDim.y+threadIdx.y;"));
    Ok(())
}

#[test]
fn gpu_sweep_loops_use_dialect_index_type() -> Result<(), JitError> {
    let reduce = Instruction::sweep(Opcode::AddReduce, f32_view(0, &[1]), f32_view(1, &[5]), 0);
    let src = source(&OpenClWriter::default(), &[reduce.clone()], SymbolConfig::default())?;
    assert!(src.contains("const long i0 = 0;"));
    assert!(src.contains("for(long i0 = 1; i0 < 5; ++i0) {"));
    assert!(!src.contains("int64_t i0"));

    let src = source(&CudaWriter::default(), &[reduce], SymbolConfig::default())?;
    assert!(src.contains("const long long i0 = 0;"));
    assert!(src.contains("for(long long i0 = 1; i0 < 5; ++i0) {"));
    assert!(src.contains("const long long vo1"));
    Ok(())
}

#[test]
fn opencl_rejects_kernel_temporaries() {
    let t = Instruction::new(Opcode::Identity, vec![f32_view(3, &[4]), f32_view(1, &[4])], None).as_constructor();
    let r = Instruction::new(Opcode::Gather, vec![f32_view(0, &[4]), f32_view(3, &[4]), view(2, DType::Int64, 0, &[4])], None);
    let free = Instruction::free(f32_view(3, &[4]));
    let mut alloc = BlockIdAlloc::new();
    let instrs: Vec<InstrPtr> = [t, r].into_iter().map(Arc::new).collect();
    let frees = [free.operand[0].base.unwrap()].into_iter().collect();
    let b = create_nested_block(&mut alloc, &instrs, 0, frees);
    let kernel = LoopB::kernel(&mut alloc, vec![Block::Loop(b)]);
    let symbols = SymbolTable::new(&kernel, SymbolConfig::default());
    assert_eq!(symbols.array_temps().len(), 1);
    assert!(matches!(OpenClWriter::default().write_kernel(&kernel, &symbols), Err(JitError::Unsupported(_))));
    let config = SymbolConfig { temps_as_params: true, ..SymbolConfig::default() };
    let symbols = SymbolTable::new(&kernel, config);
    assert!(OpenClWriter::default().write_kernel(&kernel, &symbols).is_ok());
}

#[test]
fn fortran_kernel_layout() -> Result<(), JitError> {
    let instr = add(f32_view(0, &[8]), f32_view(1, &[8]), f32_view(2, &[8]));
    let w = FortranWriter { openmp: true, ..FortranWriter::default() };
    let src = source(&w, &[instr], SymbolConfig::default())?;
    assert!(src.starts_with("subroutine launcher(data_list, offset_strides, constants) bind(C, name=\"launcher\")"));
    assert!(src.contains("real(c_float), pointer :: a0(:)"));
    assert!(src.contains("call c_f_pointer(data_list(1), a0, [8_c_int64_t])"));
    assert!(src.contains("vo0 = offset_strides(1)"));
    assert!(src.contains("vs0_0 = offset_strides(2)"));
    assert!(src.contains("!$OMP PARALLEL DO\n"));
    assert!(src.contains("DO i0 = 0, 7"));
    assert!(src.contains("a0(1 + idx0_0) = a1(1 + idx0_1) + a2(1 + idx0_2)"));
    assert!(src.contains("END DO"));
    assert!(src.ends_with("end subroutine launcher\n"));
    Ok(())
}

#[test]
fn writers_agree_on_structure() -> Result<(), JitError> {
    let reduce = Instruction::sweep(Opcode::MaximumReduce, f32_view(0, &[1]), f32_view(1, &[5]), 0);
    for w in [&OpenMpWriter::default() as &dyn Writer, &FortranWriter::default()] {
        let kernel = kernel_of(&[reduce.clone()]);
        let symbols = SymbolTable::new(&kernel, SymbolConfig::default());
        let src = w.write_kernel(&kernel, &symbols)?;
        assert!(src.contains("Peeled loop, 1. sweep iteration"), "{}", w.target());
        assert!(src.contains("Scalar replaced reductions"), "{}", w.target());
    }
    Ok(())
}
