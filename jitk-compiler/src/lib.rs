//! # jitk-compiler
//!
//! Loop nest IR, fusion and kernel source generation.
//!
//! Instructions are turned into nested [LoopB](block::LoopB) trees,
//! fused by the [FusionEngine](fuser::FusionEngine) and written as kernel
//! source by one of the [Writer](writer::Writer) implementations.

#![no_std]
#![forbid(unsafe_code)]
#![forbid(rustdoc::broken_intra_doc_links)]
#![forbid(rustdoc::private_intra_doc_links)]
//#![forbid(missing_docs)]
#![forbid(rustdoc::missing_crate_level_docs)]
#![forbid(rustdoc::private_doc_tests)]
#![forbid(rustdoc::invalid_codeblock_attributes)]
#![forbid(rustdoc::invalid_html_tags)]
#![forbid(rustdoc::invalid_rust_codeblocks)]
#![forbid(rustdoc::bare_urls)]
#![forbid(rustdoc::unescaped_backticks)]
#![forbid(rustdoc::redundant_explicit_links)]

extern crate alloc;

/// See [LoopB](block::LoopB)
pub mod block;
/// See [FusionEngine](fuser::FusionEngine)
pub mod fuser;
/// See [SymbolTable](symbols::SymbolTable) and [Scope](symbols::Scope)
pub mod symbols;
/// See [Writer](writer::Writer)
pub mod writer;

use alloc::string::String;
use block::LoopB;
use jitk_core::error::JitError;
use symbols::{SymbolConfig, SymbolTable};
use writer::Writer;

/// Generated kernel together with everything needed to launch it
#[derive(Debug)]
pub struct KernelSource {
    /// Source code
    pub source: String,
    /// Symbols of the kernel, binding order of parameters
    pub symbols: SymbolTable,
    /// Sizes of loops mapped to hardware threads
    pub thread_stack: alloc::vec::Vec<i64>,
}

/// Write kernel source for `kernel` with given writer
pub fn generate<W: Writer + ?Sized>(
    w: &W,
    kernel: &LoopB,
    config: SymbolConfig,
) -> Result<KernelSource, JitError> {
    let symbols = SymbolTable::new(kernel, config);
    let source = w.write_kernel(kernel, &symbols)?;
    let thread_stack = w.threads(kernel);
    log::debug!("Generated {} kernel {:x}", w.target(), symbols.codegen_hash());
    Ok(KernelSource { source, symbols, thread_stack })
}
