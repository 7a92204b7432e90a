use jitk_core::{
    base::{Base, BaseId, Bases},
    constant::Constant,
    dtype::DType,
    error::JitError,
    instruction::{InstrPtr, Instruction},
    opcode::Opcode,
    program::Program,
    view::{Slide, View},
};
use jitk_engine::{extmethod::MatMul, interpreter::random123, Engine, EngineConfig};
use std::sync::Arc;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn instr(opcode: Opcode, operand: Vec<View>) -> InstrPtr {
    Arc::new(Instruction::new(opcode, operand, None))
}

fn values(bases: &Bases, id: BaseId) -> Result<Vec<f64>, JitError> {
    let buffer = bases.buffer(id)?;
    Ok((0..buffer.len()).filter_map(|i| buffer.get_f64(i)).collect())
}

fn run(program: &Program, bases: &mut Bases) -> Result<Engine<jitk_engine::InterpreterBackend>, JitError> {
    init();
    let mut engine = Engine::interpreter(EngineConfig::default());
    engine.execute(program, bases)?;
    Ok(engine)
}

#[test]
fn sum_of_vector() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer(vec![1.0f64, 2.0, 3.0, 4.0, 5.0].into()));
    let y = bases.insert(Base::new(DType::Float64, 1));
    let sum = Instruction::sweep(Opcode::AddReduce, View::new(y, DType::Float64, 1), View::new(x, DType::Float64, 5), 0);
    let engine = run(&Program::new(vec![Arc::new(sum)]), &mut bases)?;
    assert_eq!(values(&bases, y)?, [15.0]);
    assert_eq!(engine.stats().kernels_executed, 1);
    Ok(())
}

#[test]
fn max_over_both_axes() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer(
        vec![1.0f32, -2.0, 3.0, 0.5, -1.0, 7.0, 2.0, 0.0, 4.0, 1.0, -3.0, 9.0].into(),
    ));
    let cols = bases.insert(Base::new(DType::Float32, 4));
    let rows = bases.insert(Base::new(DType::Float32, 3));
    let xv = View::from_parts(x, DType::Float32, 0, vec![3, 4], vec![4, 1])?;
    let program = Program::new(vec![
        Arc::new(Instruction::sweep(Opcode::MaximumReduce, View::new(cols, DType::Float32, 4), xv.clone(), 0)),
        Arc::new(Instruction::sweep(Opcode::MaximumReduce, View::new(rows, DType::Float32, 3), xv, 1)),
    ]);
    run(&program, &mut bases)?;
    assert_eq!(values(&bases, cols)?, [4.0, 7.0, 3.0, 9.0]);
    assert_eq!(values(&bases, rows)?, [3.0, 7.0, 9.0]);
    Ok(())
}

#[test]
fn cumulative_sum() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer(vec![3i64, -1, 4, 1, 5].into()));
    let y = bases.insert(Base::new(DType::Int64, 5));
    let acc =
        Instruction::sweep(Opcode::AddAccumulate, View::new(y, DType::Int64, 5), View::new(x, DType::Int64, 5), 0);
    run(&Program::new(vec![Arc::new(acc)]), &mut bases)?;
    assert_eq!(values(&bases, y)?, [3.0, 2.0, 6.0, 7.0, 12.0]);
    Ok(())
}

#[test]
fn temporaries_are_freed() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer(vec![1.0f32, 2.0, 3.0, 4.0].into()));
    let t = bases.insert(Base::new(DType::Float32, 4));
    let y = bases.insert(Base::new(DType::Float32, 4));
    let (xv, tv, yv) = (View::new(x, DType::Float32, 4), View::new(t, DType::Float32, 4), View::new(y, DType::Float32, 4));
    let program = Program::new(vec![
        Arc::new(Instruction::new(Opcode::Multiply, vec![tv.clone(), xv.clone(), xv], None).as_constructor()),
        Arc::new(
            Instruction::new(Opcode::Add, vec![yv, tv.clone(), View::constant(DType::Float32)], Some(Constant::f32(1.0)))
                .as_constructor(),
        ),
        Arc::new(Instruction::free(tv)),
    ]);
    run(&program, &mut bases)?;
    assert_eq!(values(&bases, y)?, [2.0, 5.0, 10.0, 17.0]);
    assert!(!bases.get(t).is_some_and(Base::is_allocated));
    Ok(())
}

#[test]
fn sliding_window_accumulates_across_repeats() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer((0..10i64).collect::<Vec<_>>().into()));
    let y = bases.insert(Base::from_buffer(vec![0i64; 3].into()));
    let mut window = View::from_parts(x, DType::Int64, 0, vec![3], vec![1])?;
    window.add_slide(Slide::new(0, 1, 1, 10, 0))?;
    let yv = View::new(y, DType::Int64, 3);
    let program = Program::new(vec![instr(Opcode::Add, vec![yv.clone(), yv, window])]).with_repeats(3, None);
    let engine = run(&program, &mut bases)?;
    assert_eq!(values(&bases, y)?, [3.0, 6.0, 9.0]);
    assert_eq!(engine.stats().repeats_executed, 3);
    Ok(())
}

#[test]
fn condition_stops_repeats() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let counter = bases.insert(Base::from_buffer(vec![0i64].into()));
    let cond = bases.insert(Base::new(DType::Bool, 1));
    let cv = View::new(counter, DType::Int64, 1);
    let program = Program::new(vec![
        Arc::new(Instruction::new(
            Opcode::Add,
            vec![cv.clone(), cv.clone(), View::constant(DType::Int64)],
            Some(Constant::I64(1)),
        )),
        Arc::new(Instruction::new(
            Opcode::Less,
            vec![View::new(cond, DType::Bool, 1), cv, View::constant(DType::Int64)],
            Some(Constant::I64(3)),
        )),
    ])
    .with_repeats(10, Some(cond));
    let engine = run(&program, &mut bases)?;
    assert_eq!(values(&bases, counter)?, [3.0]);
    assert_eq!(engine.stats().repeats_executed, 3);
    Ok(())
}

#[test]
fn start_read_from_index_array_written_earlier() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer(vec![10.0f64, 20.0, 30.0, 40.0, 50.0].into()));
    let start = bases.insert(Base::new(DType::Int64, 1));
    let y = bases.insert(Base::new(DType::Float64, 2));
    let mut window = View::from_parts(x, DType::Float64, 0, vec![2], vec![1])?;
    window.start_pointer = Some(start);
    let program = Program::new(vec![
        Arc::new(Instruction::new(
            Opcode::Identity,
            vec![View::new(start, DType::Int64, 1), View::constant(DType::Int64)],
            Some(Constant::I64(2)),
        )),
        instr(Opcode::Identity, vec![View::new(y, DType::Float64, 2), window]),
    ]);
    run(&program, &mut bases)?;
    assert_eq!(values(&bases, y)?, [30.0, 40.0]);
    Ok(())
}

#[test]
fn gather_and_scatter() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let x = bases.insert(Base::from_buffer(vec![10.0f64, 20.0, 30.0, 40.0, 50.0].into()));
    let idx = bases.insert(Base::from_buffer(vec![4i64, 0, 2].into()));
    let g = bases.insert(Base::new(DType::Float64, 3));
    let s = bases.insert(Base::from_buffer(vec![0.0f64; 5].into()));
    let iv = View::new(idx, DType::Int64, 3);
    let program = Program::new(vec![
        instr(Opcode::Gather, vec![View::new(g, DType::Float64, 3), View::new(x, DType::Float64, 5), iv.clone()]),
        instr(Opcode::Scatter, vec![View::new(s, DType::Float64, 5), View::new(g, DType::Float64, 3), iv]),
    ]);
    run(&program, &mut bases)?;
    assert_eq!(values(&bases, g)?, [50.0, 10.0, 30.0]);
    assert_eq!(values(&bases, s)?, [10.0, 0.0, 30.0, 0.0, 50.0]);
    Ok(())
}

#[test]
fn range_and_random() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let r = bases.insert(Base::new(DType::Int64, 6));
    let u = bases.insert(Base::new(DType::UInt64, 4));
    let program = Program::new(vec![
        instr(Opcode::Range, vec![View::from_parts(r, DType::Int64, 0, vec![2, 3], vec![3, 1])?]),
        Arc::new(Instruction::new(
            Opcode::Random,
            vec![View::new(u, DType::UInt64, 4)],
            Some(Constant::R123 { start: 0, key: 1 }),
        )),
    ]);
    run(&program, &mut bases)?;
    assert_eq!(values(&bases, r)?, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    let buffer = bases.buffer(u)?;
    for i in 0..4 {
        assert_eq!(buffer.get_i64(i).map(|x| x as u64), Some(random123(0, 1, i as u64)));
    }
    Ok(())
}

#[test]
fn extension_method_between_kernels() -> Result<(), JitError> {
    init();
    let mut bases = Bases::new();
    let a = bases.insert(Base::from_buffer(vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0].into()));
    let b = bases.insert(Base::from_buffer(vec![1.0f64, 0.0, 0.0, 1.0, 1.0, 1.0].into()));
    let c = bases.insert(Base::new(DType::Float64, 4));
    let d = bases.insert(Base::new(DType::Float64, 4));
    let matmul = Opcode::ExtMethod(3);
    let program = Program::new(vec![
        instr(
            matmul,
            vec![
                View::from_parts(c, DType::Float64, 0, vec![2, 2], vec![2, 1])?,
                View::from_parts(a, DType::Float64, 0, vec![2, 3], vec![3, 1])?,
                View::from_parts(b, DType::Float64, 0, vec![3, 2], vec![2, 1])?,
            ],
        ),
        Arc::new(Instruction::new(
            Opcode::Multiply,
            vec![View::new(d, DType::Float64, 4), View::new(c, DType::Float64, 4), View::constant(DType::Float64)],
            Some(Constant::f64(2.0)),
        )),
    ]);

    let mut engine = Engine::interpreter(EngineConfig::default());
    let err = engine.execute(&program, &mut bases);
    assert!(matches!(err, Err(JitError::Unsupported(_))), "{err:?}");

    engine.register_extmethod(matmul, Box::new(MatMul))?;
    assert!(engine.register_extmethod(Opcode::Add, Box::new(MatMul)).is_err());
    engine.execute(&program, &mut bases)?;
    // [[1 2 3] [4 5 6]] x [[1 0] [0 1] [1 1]]
    assert_eq!(values(&bases, c)?, [4.0, 5.0, 10.0, 11.0]);
    assert_eq!(values(&bases, d)?, [8.0, 10.0, 20.0, 22.0]);
    assert_eq!(engine.stats().extmethods_executed, 1);
    Ok(())
}
