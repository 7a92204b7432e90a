//! # jitk-core
//!
//! jitk-core is the core part of the jitk array program compiler.
//! jitk-core contains definitions of bases, strided views and their algebra,
//! instructions and opcodes, programs, dynamic views used by repeated
//! execution and the splitting of programs addressed by index arrays.
//!
#![forbid(unsafe_code)]
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

extern crate alloc;

/// See [Base](base::Base) and [Bases](base::Bases)
pub mod base;
/// Fnv hasher
pub mod chasher;
/// See [Constant](constant::Constant)
pub mod constant;
/// See [DType](dtype::DType)
pub mod dtype;
/// Sliding views and index array driven views
pub mod dyn_view;
/// See [JitError](error::JitError)
pub mod error;
/// See [Instruction](instruction::Instruction)
pub mod instruction;
/// See [Opcode](opcode::Opcode)
pub mod opcode;
/// See [Program](program::Program)
pub mod program;
/// See [bhir_splitter](splitter::bhir_splitter)
pub mod splitter;
/// See [View](view::View)
pub mod view;

pub use view::MAXDIM;
