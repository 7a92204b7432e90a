//! Execution of programs: repeats, dynamic views, extension methods and kernels

use crate::{
    backend::{Backend, Launch},
    config::EngineConfig,
    extmethod::ExtMethod,
    interpreter::InterpreterBackend,
};
use jitk_compiler::{block::LoopB, fuser::FusionEngine, generate, writer::Writer};
use jitk_core::{
    base::Bases,
    dyn_view::{slide_views, update_array_iterators},
    error::JitError,
    instruction::InstrPtr,
    opcode::Opcode,
    program::Program,
    splitter::bhir_splitter,
};
use std::collections::BTreeMap;

/// Statistics of engine
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Kernels passed to the backend
    pub kernels_executed: u64,
    /// Completed repeats of programs
    pub repeats_executed: u64,
    /// Extension methods executed
    pub extmethods_executed: u64,
}

/// Compiles and executes programs with one backend
pub struct Engine<B: Backend> {
    config: EngineConfig,
    writer: Box<dyn Writer>,
    backend: B,
    extmethods: BTreeMap<u32, Box<dyn ExtMethod>>,
    stats: EngineStats,
}

impl<B: Backend + core::fmt::Debug> core::fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("target", &self.config.target)
            .field("backend", &self.backend)
            .field("extmethods", &self.extmethods.keys().collect::<Vec<_>>())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Engine<InterpreterBackend> {
    /// Engine running kernels in the reference interpreter
    pub fn interpreter(config: EngineConfig) -> Self {
        let backend = InterpreterBackend::new(config.target);
        Engine::new(config, backend)
    }
}

impl<B: Backend> Engine<B> {
    /// New engine, kernels are written for the target of backend
    pub fn new(mut config: EngineConfig, backend: B) -> Self {
        if config.target != backend.target() {
            log::debug!("Engine target {} replaced by backend target {}", config.target, backend.target());
            config.target = backend.target();
        }
        let writer = config.writer();
        Engine { config, writer, backend, extmethods: BTreeMap::new(), stats: EngineStats::default() }
    }

    /// Register host implementation of extension method
    pub fn register_extmethod(&mut self, opcode: Opcode, method: Box<dyn ExtMethod>) -> Result<(), JitError> {
        let Opcode::ExtMethod(id) = opcode else {
            return Err(JitError::invalid_argument(format!("{opcode} is not an extension method")));
        };
        if self.extmethods.insert(id, method).is_some() {
            log::debug!("Extension method {id} replaced");
        }
        Ok(())
    }

    /// Backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Statistics
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Execute program on bases.
    /// The program runs `nrepeats` times, at least once, and stops early when its
    /// condition base holds false after a repeat.
    pub fn execute(&mut self, program: &Program, bases: &mut Bases) -> Result<(), JitError> {
        let mut instr_list: Vec<InstrPtr> = program.instr_list.clone();
        let sliding = program.is_sliding();
        let uses_pointer = program.uses_pointer();
        for repeat in 0..program.nrepeats.max(1) {
            if repeat > 0 && sliding {
                slide_views(&mut instr_list);
            }
            if uses_pointer {
                for mut partition in bhir_splitter(&instr_list) {
                    update_array_iterators(&mut partition, bases)?;
                    self.execute_instr_list(&partition, bases)?;
                }
            } else {
                self.execute_instr_list(&instr_list, bases)?;
            }
            self.stats.repeats_executed += 1;
            if let Some(condition) = program.condition {
                // Unallocated condition never stops
                let stop = bases
                    .get(condition)
                    .and_then(|b| b.data.as_ref())
                    .and_then(|d| d.get_bool(0))
                    .is_some_and(|c| !c);
                if stop {
                    log::debug!("Condition {condition} is false after repeat {repeat}");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Execute instructions in order, extension methods split the list into fused segments
    fn execute_instr_list(&mut self, instr_list: &[InstrPtr], bases: &mut Bases) -> Result<(), JitError> {
        let mut segment: Vec<InstrPtr> = Vec::new();
        for instr in instr_list {
            let Opcode::ExtMethod(id) = instr.opcode else {
                segment.push(instr.clone());
                continue;
            };
            self.execute_segment(&core::mem::take(&mut segment), bases)?;
            let Some(method) = self.extmethods.get_mut(&id) else {
                return Err(JitError::unsupported(format!("Instruction {instr} has no registered extension method")));
            };
            if let Some(out) = instr.output_base() {
                bases.allocate(out)?;
            }
            method.execute(instr, bases)?;
            self.stats.extmethods_executed += 1;
        }
        self.execute_segment(&segment, bases)
    }

    fn execute_segment(&mut self, instr_list: &[InstrPtr], bases: &mut Bases) -> Result<(), JitError> {
        if instr_list.is_empty() {
            return Ok(());
        }
        let mut fuser = FusionEngine::new(self.config.avoid_rank0_sweep);
        for block in fuser.fuse(instr_list)? {
            let kernel = fuser.kernel(vec![block]);
            self.execute_kernel(&kernel, bases)?;
        }
        Ok(())
    }

    fn execute_kernel(&mut self, kernel: &LoopB, bases: &mut Bases) -> Result<(), JitError> {
        let debug = self.config.debug;
        if kernel.is_system_only() {
            for id in kernel.all_frees() {
                bases.free(id);
            }
            return Ok(());
        }
        for id in kernel.all_non_temps() {
            bases.allocate(id)?;
        }
        if debug.sched() {
            println!("{kernel}");
        }
        let source = if self.backend.needs_source() {
            let source = generate(self.writer.as_ref(), kernel, self.config.symbol_config())?;
            if debug.ir() {
                println!("{}", source.symbols);
            }
            if debug.asm() {
                println!("{}", source.source);
            }
            Some(source)
        } else {
            None
        };
        let begin = std::time::Instant::now();
        self.backend.execute(Launch { kernel, source: source.as_ref() }, bases)?;
        if debug.perf() {
            println!("Kernel took {:?}", begin.elapsed());
        }
        self.stats.kernels_executed += 1;
        for id in kernel.all_frees() {
            bases.free(id);
        }
        Ok(())
    }
}
