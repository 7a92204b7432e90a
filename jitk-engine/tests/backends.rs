use jitk_compiler::writer::Target;
use jitk_core::{
    base::{Base, BaseId, Bases, Buffer},
    constant::Constant,
    dtype::DType,
    error::JitError,
    instruction::Instruction,
    opcode::Opcode,
    program::Program,
    view::View,
};
use jitk_engine::{
    backend::Launcher,
    compiler::{CommandCompiler, Compiler, DyLibLoader, Loader},
    Backend, DummyBackend, Engine, EngineConfig, HostBackend,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{ffi::c_void, path::Path, sync::Arc};
use tempfile::TempDir;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn values(bases: &Bases, id: BaseId) -> Result<Vec<f64>, JitError> {
    let buffer = bases.buffer(id)?;
    Ok((0..buffer.len()).filter_map(|i| buffer.get_f64(i)).collect())
}

/// y = x * 2 + 1 over a 64x32 matrix, then the sum of every row
fn scale_and_sum(bases: &mut Bases) -> Result<(Program, BaseId, BaseId), JitError> {
    let x = bases.insert(Base::from_buffer((0..64 * 32).map(|i| (i % 7) as f64 - 3.0).collect::<Vec<_>>().into()));
    let t = bases.insert(Base::new(DType::Float64, 64 * 32));
    let y = bases.insert(Base::new(DType::Float64, 64 * 32));
    let s = bases.insert(Base::new(DType::Float64, 64));
    let m = |id| View::from_parts(id, DType::Float64, 0, vec![64, 32], vec![32, 1]);
    let program = Program::new(vec![
        Arc::new(
            Instruction::new(Opcode::Multiply, vec![m(t)?, m(x)?, View::constant(DType::Float64)], Some(Constant::f64(2.0)))
                .as_constructor(),
        ),
        Arc::new(
            Instruction::new(Opcode::Add, vec![m(y)?, m(t)?, View::constant(DType::Float64)], Some(Constant::f64(1.0)))
                .as_constructor(),
        ),
        Arc::new(Instruction::free(m(t)?)),
        Arc::new(Instruction::sweep(Opcode::AddReduce, View::new(s, DType::Float64, 64), m(y)?, 1)),
    ]);
    Ok((program, y, s))
}

#[test]
fn opencl_launch_geometry() -> Result<(), JitError> {
    init();
    let config = EngineConfig::new(Target::OpenCl);
    let mut engine = Engine::new(config.clone(), DummyBackend::new(&config));
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer(vec![1.0f32; 64 * 32].into()));
    let y = bases.insert(Base::new(DType::Float32, 64 * 32));
    let m = |id| View::from_parts(id, DType::Float32, 0, vec![64, 32], vec![32, 1]);
    let add = Instruction::new(Opcode::Add, vec![m(y)?, m(x)?, m(x)?], None);
    engine.execute(&Program::new(vec![Arc::new(add)]), &mut bases)?;

    let records = engine.backend().records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.source.contains(&format!("__kernel void execute_{:x}", record.codegen_hash)));
    assert_eq!(record.thread_stack, [64, 32]);
    assert_eq!(record.global, [64, 32, 1]);
    assert_eq!(record.local, [32, 4, 1]);
    Ok(())
}

#[test]
fn gpu_targets_are_not_run_on_host() {
    let config = EngineConfig::new(Target::Cuda);
    assert!(HostBackend::new(&config).is_err());
}

struct CopyCompiler;

impl Compiler for CopyCompiler {
    fn compile(&mut self, out: &Path, src: &Path) -> Result<(), JitError> {
        std::fs::copy(src, out)?;
        Ok(())
    }
}

struct SourceLoader;

struct NoLaunch;

impl Launcher for NoLaunch {
    unsafe fn launch(&self, _data: &mut [*mut c_void], _offset_strides: &[i64], _constants: &[[u64; 2]]) {}
}

impl Loader for SourceLoader {
    type Module = NoLaunch;

    fn load(&self, path: &Path) -> Result<NoLaunch, JitError> {
        std::fs::read_to_string(path)?;
        Ok(NoLaunch)
    }
}

#[test]
fn repeated_kernels_are_compiled_once() -> Result<(), JitError> {
    init();
    let tmp = tempfile::tempdir()?;
    let mut config = EngineConfig::new(Target::OpenMp);
    config.tmp_dir = Some(tmp.path().to_path_buf());
    let backend = HostBackend::with_collaborators(CopyCompiler, SourceLoader, "test", &config)?;
    let mut engine = Engine::new(config, backend);
    let mut bases = Bases::new();
    let (program, _, _) = scale_and_sum(&mut bases)?;
    engine.execute(&program, &mut bases)?;
    let first = engine.backend().cache_stats();
    engine.execute(&program, &mut bases)?;
    let second = engine.backend().cache_stats();
    assert_eq!(second.compilations, first.compilations);
    assert_eq!(second.lookups, 2 * first.lookups);
    assert!(first.compilations >= 1);
    Ok(())
}

#[test]
fn reversed_view_below_base_is_rejected() -> Result<(), JitError> {
    init();
    let config = EngineConfig::new(Target::OpenMp);
    let backend = HostBackend::with_collaborators(CopyCompiler, SourceLoader, "test", &config)?;
    let mut engine = Engine::new(config, backend);
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer(vec![1.0f32, 2.0, 3.0, 4.0].into()));
    let y = bases.insert(Base::new(DType::Float32, 4));
    let rev = |start| View::from_parts(x, DType::Float32, start, vec![4], vec![-1]);
    let copy = |src: View| Program::new(vec![Arc::new(Instruction::new(Opcode::Identity, vec![View::new(y, DType::Float32, 4), src], None))]);

    let err = engine.execute(&copy(rev(0)?), &mut bases);
    assert!(matches!(err, Err(JitError::InvalidArgument(_))), "{err:?}");
    assert_eq!(engine.backend().cache_stats().lookups, 0);
    engine.execute(&copy(rev(3)?), &mut bases)?;
    assert_eq!(engine.backend().cache_stats().lookups, 1);
    Ok(())
}

type HostEngine = Engine<HostBackend<CommandCompiler, DyLibLoader>>;

/// Engine compiling kernels with cc, None if there is no C compiler
fn host_engine() -> Result<Option<(HostEngine, TempDir)>, JitError> {
    let mut config = EngineConfig::new(Target::OpenMp);
    let Some(cmd) = config.compiler_command() else {
        return Ok(None);
    };
    if !CommandCompiler::new(cmd).is_available() {
        log::warn!("No C compiler, skipping");
        return Ok(None);
    }
    let tmp = tempfile::tempdir()?;
    config.cache_dir = Some(tmp.path().join("cache"));
    let backend = HostBackend::new(&config)?;
    assert_eq!(backend.target(), Target::OpenMp);
    Ok(Some((Engine::new(config, backend), tmp)))
}

#[test]
fn compiled_kernels_match_interpreter() -> Result<(), JitError> {
    init();
    let Some((mut engine, _tmp)) = host_engine()? else {
        return Ok(());
    };

    let mut expected = Bases::new();
    let (program, y, s) = scale_and_sum(&mut expected)?;
    Engine::interpreter(EngineConfig::new(Target::OpenMp)).execute(&program, &mut expected)?;

    let mut bases = Bases::new();
    scale_and_sum(&mut bases)?;
    engine.execute(&program, &mut bases)?;
    assert_eq!(values(&bases, y)?, values(&expected, y)?);
    assert_eq!(values(&bases, s)?, values(&expected, s)?);
    // First row ends with x = -3, -2, -1, 0 after four full cycles
    assert_eq!(values(&bases, s)?[0], 20.0);
    Ok(())
}

const BINARY: [Opcode; 24] = [
    Opcode::Add,
    Opcode::Subtract,
    Opcode::Multiply,
    Opcode::Divide,
    Opcode::Power,
    Opcode::Mod,
    Opcode::Remainder,
    Opcode::Maximum,
    Opcode::Minimum,
    Opcode::BitwiseAnd,
    Opcode::BitwiseOr,
    Opcode::BitwiseXor,
    Opcode::LeftShift,
    Opcode::RightShift,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::Greater,
    Opcode::GreaterEqual,
    Opcode::Less,
    Opcode::LessEqual,
    Opcode::LogicalAnd,
    Opcode::LogicalOr,
    Opcode::LogicalXor,
    Opcode::Arctan2,
];

const UNARY: [Opcode; 29] = [
    Opcode::Identity,
    Opcode::Absolute,
    Opcode::LogicalNot,
    Opcode::Invert,
    Opcode::Sin,
    Opcode::Cos,
    Opcode::Tan,
    Opcode::Sinh,
    Opcode::Cosh,
    Opcode::Tanh,
    Opcode::Arcsin,
    Opcode::Arccos,
    Opcode::Arctan,
    Opcode::Exp,
    Opcode::Exp2,
    Opcode::Expm1,
    Opcode::Log,
    Opcode::Log2,
    Opcode::Log10,
    Opcode::Log1p,
    Opcode::Sqrt,
    Opcode::Ceil,
    Opcode::Floor,
    Opcode::Rint,
    Opcode::Trunc,
    Opcode::Sign,
    Opcode::Isnan,
    Opcode::Isinf,
    Opcode::Isfinite,
];

fn output_dtype(op: Opcode, t: DType) -> DType {
    use Opcode::*;
    match op {
        Equal | NotEqual | Greater | GreaterEqual | Less | LessEqual | LogicalAnd | LogicalOr | LogicalXor
        | LogicalNot | Isnan | Isinf | Isfinite => DType::Bool,
        _ => t,
    }
}

fn buffer(t: DType, values: &[f64]) -> Buffer {
    match t {
        DType::Int32 => values.iter().map(|x| *x as i32).collect::<Vec<_>>().into(),
        DType::Int64 => values.iter().map(|x| *x as i64).collect::<Vec<_>>().into(),
        DType::UInt32 => values.iter().map(|x| *x as u32).collect::<Vec<_>>().into(),
        DType::Float32 => values.iter().map(|x| *x as f32).collect::<Vec<_>>().into(),
        _ => values.to_vec().into(),
    }
}

/// Operands of op, divisors are never zero and shift amounts and exponents are small and positive
fn operands(rng: &mut SmallRng, op: Opcode, t: DType, n: usize) -> (Vec<f64>, Vec<f64>) {
    let positive = matches!(op, Opcode::Power | Opcode::LeftShift | Opcode::RightShift) || t == DType::UInt32;
    let a = (0..n)
        .map(|_| match t {
            DType::Float32 | DType::Float64 => rng.gen_range(-4.0..4.0),
            DType::UInt32 => rng.gen_range(0..=40) as f64,
            _ => rng.gen_range(-20..=20) as f64,
        })
        .collect();
    let b = (0..n)
        .map(|_| {
            let magnitude = match t {
                DType::Float32 | DType::Float64 => rng.gen_range(0.5..4.0),
                _ => rng.gen_range(1..=7) as f64,
            };
            if positive || rng.gen_bool(0.5) {
                magnitude
            } else {
                -magnitude
            }
        })
        .collect();
    (a, b)
}

/// Results agree up to rounding relative to the magnitude of operands and results
fn same(t: DType, operands: [f64; 2], x: f64, y: f64) -> bool {
    let tolerance = match t {
        DType::Float32 => 1e-5,
        DType::Float64 => 1e-12,
        _ => 0.0,
    };
    let scale = operands.iter().chain([&x, &y]).fold(1.0f64, |m, v| m.max(v.abs()));
    (x.is_nan() && y.is_nan()) || x == y || (x - y).abs() <= tolerance * scale
}

#[test]
fn every_elementwise_opcode_matches_interpreter() -> Result<(), JitError> {
    init();
    let Some((mut engine, _tmp)) = host_engine()? else {
        return Ok(());
    };
    let mut interpreter = Engine::interpreter(EngineConfig::new(Target::OpenMp));
    let mut rng = SmallRng::seed_from_u64(7);
    let n = 16;
    let mut compared = 0;
    for t in [DType::Int32, DType::Int64, DType::UInt32, DType::Float32, DType::Float64] {
        for op in BINARY.into_iter().chain(UNARY) {
            let (a, b) = operands(&mut rng, op, t, n);
            let mut bases = Bases::new();
            let av = View::new(bases.insert(Base::from_buffer(buffer(t, &a))), t, n);
            let bv = View::new(bases.insert(Base::from_buffer(buffer(t, &b))), t, n);
            let out = bases.insert(Base::new(output_dtype(op, t), n));
            let mut operand = vec![View::new(out, output_dtype(op, t), n), av];
            if BINARY.contains(&op) {
                operand.push(bv);
            }
            let program = Program::new(vec![Arc::new(Instruction::new(op, operand, None))]);

            let mut expected = Bases::new();
            for id in [BaseId::from(0), BaseId::from(1)] {
                expected.insert(Base::from_buffer(bases.buffer(id)?.clone()));
            }
            expected.insert(Base::new(output_dtype(op, t), n));
            // Combinations without reference semantics are not compared
            if interpreter.execute(&program, &mut expected).is_err() {
                continue;
            }
            engine.execute(&program, &mut bases)?;
            let (got, want) = (values(&bases, out)?, values(&expected, out)?);
            for i in 0..n {
                assert!(
                    same(t, [a[i], b[i]], got[i], want[i]),
                    "{op} {t}: {} and {} gave {} compiled, {} interpreted",
                    a[i],
                    b[i],
                    got[i],
                    want[i]
                );
            }
            compared += 1;
        }
    }
    assert!(compared > 150, "only {compared} combinations compared");
    Ok(())
}
