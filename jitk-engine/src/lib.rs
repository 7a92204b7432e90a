//! # jitk-engine
//!
//! Execution of jitk array programs.
//!
//! [Engine] fuses the instructions of a [Program](jitk_core::program::Program) into
//! kernels, generates their source for the configured target and runs them with
//! a [Backend]. Host kernels are compiled by an external compiler and kept in a
//! content addressed [KernelCache]. Programs can be repeated with sliding views
//! and views addressed by index arrays.
//!
//! ```rust
//! use jitk_core::{base::{Base, Bases}, constant::Constant, dtype::DType, instruction::Instruction, opcode::Opcode, program::Program, view::View};
//! use jitk_engine::{Engine, EngineConfig};
//! use std::sync::Arc;
//!
//! let mut bases = Bases::new();
//! let x = bases.insert(Base::from_buffer(vec![1.0f32, 2.0, 3.0].into()));
//! let y = bases.insert(Base::new(DType::Float32, 3));
//! let add = Instruction::new(
//!     Opcode::Add,
//!     vec![View::new(y, DType::Float32, 3), View::new(x, DType::Float32, 3), View::constant(DType::Float32)],
//!     Some(Constant::f32(1.0)),
//! );
//! let mut engine = Engine::interpreter(EngineConfig::default());
//! engine.execute(&Program::new(vec![Arc::new(add.as_constructor())]), &mut bases)?;
//! assert_eq!(bases.buffer(y)?.get_f64(2), Some(4.0));
//! # Ok::<(), jitk_core::error::JitError>(())
//! ```

#![forbid(rustdoc::broken_intra_doc_links)]
#![forbid(rustdoc::private_intra_doc_links)]
#![forbid(missing_docs)]
#![forbid(rustdoc::missing_crate_level_docs)]
#![forbid(rustdoc::private_doc_tests)]
#![forbid(rustdoc::invalid_codeblock_attributes)]
#![forbid(rustdoc::invalid_html_tags)]
#![forbid(rustdoc::invalid_rust_codeblocks)]
#![forbid(rustdoc::bare_urls)]
#![forbid(rustdoc::unescaped_backticks)]
#![forbid(rustdoc::redundant_explicit_links)]

/// See [Backend](backend::Backend)
pub mod backend;
/// See [Compiler](compiler::Compiler) and [Loader](compiler::Loader)
pub mod compiler;
/// See [EngineConfig](config::EngineConfig)
pub mod config;
/// See [DebugMask](debug::DebugMask)
pub mod debug;
/// See [Engine](engine::Engine)
pub mod engine;
/// See [ExtMethod](extmethod::ExtMethod)
pub mod extmethod;
/// See [InterpreterBackend](interpreter::InterpreterBackend)
pub mod interpreter;
/// See [KernelCache](kernel_cache::KernelCache)
pub mod kernel_cache;
/// Launch geometry
pub mod ndrange;

pub use backend::{Backend, DummyBackend, HostBackend, Launch};
pub use config::EngineConfig;
pub use engine::{Engine, EngineStats};
pub use extmethod::ExtMethod;
pub use interpreter::InterpreterBackend;
pub use kernel_cache::KernelCache;
