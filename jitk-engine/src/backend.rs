//! Backends executing fused kernels

use crate::{
    compiler::{CommandCompiler, Compiler, DyLib, DyLibLoader, Loader},
    config::EngineConfig,
    kernel_cache::{CacheStats, KernelCache},
    ndrange::nd_ranges,
};
use jitk_compiler::{block::LoopB, writer::Target, KernelSource};
use jitk_core::{
    base::Bases,
    constant::Constant,
    error::{BackendError, ErrorStatus, JitError},
};
use std::ffi::c_void;

/// Kernel ready for execution
#[derive(Debug, Clone, Copy)]
pub struct Launch<'a> {
    /// Fused block tree of rank -1
    pub kernel: &'a LoopB,
    /// Generated source, None if the backend does not need it
    pub source: Option<&'a KernelSource>,
}

/// Executes kernels on bases
pub trait Backend {
    /// Target whose source this backend executes
    fn target(&self) -> Target;

    /// Does [Backend::execute] need generated source
    fn needs_source(&self) -> bool {
        true
    }

    /// Execute kernel. All non temporary bases of the kernel are allocated.
    fn execute(&mut self, launch: Launch<'_>, bases: &mut Bases) -> Result<(), JitError>;
}

/// Loaded kernel that can be called with bound arguments
pub trait Launcher {
    /// Call kernel
    ///
    /// # Safety
    /// Arguments must match the symbol table of the kernel and buffers must be large
    /// enough for every access.
    unsafe fn launch(&self, data: &mut [*mut c_void], offset_strides: &[i64], constants: &[[u64; 2]]);
}

impl Launcher for DyLib {
    unsafe fn launch(&self, data: &mut [*mut c_void], offset_strides: &[i64], constants: &[[u64; 2]]) {
        unsafe { DyLib::launch(self, data, offset_strides, constants) }
    }
}

/// Constant as one 16 byte slot of the constant union of host kernels
pub fn constant_slot(c: &Constant) -> [u64; 2] {
    let mut bytes = [0u8; 16];
    match *c {
        Constant::Bool(x) => bytes[0] = x as u8,
        Constant::I8(x) => bytes[..1].copy_from_slice(&x.to_ne_bytes()),
        Constant::I16(x) => bytes[..2].copy_from_slice(&x.to_ne_bytes()),
        Constant::I32(x) => bytes[..4].copy_from_slice(&x.to_ne_bytes()),
        Constant::I64(x) => bytes[..8].copy_from_slice(&x.to_ne_bytes()),
        Constant::U8(x) => bytes[0] = x,
        Constant::U16(x) | Constant::F16(x) => bytes[..2].copy_from_slice(&x.to_ne_bytes()),
        Constant::U32(x) | Constant::F32(x) => bytes[..4].copy_from_slice(&x.to_ne_bytes()),
        Constant::U64(x) | Constant::F64(x) => bytes[..8].copy_from_slice(&x.to_ne_bytes()),
        Constant::C64(re, im) => {
            bytes[..4].copy_from_slice(&re.to_ne_bytes());
            bytes[4..8].copy_from_slice(&im.to_ne_bytes());
        }
        Constant::C128(re, im) => {
            bytes[..8].copy_from_slice(&re.to_ne_bytes());
            bytes[8..].copy_from_slice(&im.to_ne_bytes());
        }
        Constant::R123 { start, key } => {
            bytes[..8].copy_from_slice(&start.to_ne_bytes());
            bytes[8..].copy_from_slice(&key.to_ne_bytes());
        }
    }
    let (mut lo, mut hi) = ([0u8; 8], [0u8; 8]);
    lo.copy_from_slice(&bytes[..8]);
    hi.copy_from_slice(&bytes[8..]);
    [u64::from_ne_bytes(lo), u64::from_ne_bytes(hi)]
}

/// Compiles host kernels and calls them on host buffers
#[derive(Debug)]
pub struct HostBackend<C: Compiler, L: Loader> {
    target: Target,
    cache: KernelCache<C, L>,
}

impl HostBackend<CommandCompiler, DyLibLoader> {
    /// Backend using the configured compiler command and libloading
    pub fn new(config: &EngineConfig) -> Result<Self, JitError> {
        let Some(cmd) = config.compiler_command() else {
            return Err(BackendError::new(
                ErrorStatus::CompilerNotFound,
                format!("no compiler command for target {}", config.target),
            )
            .into());
        };
        let context = format!("{} {cmd}", config.target);
        HostBackend::with_collaborators(CommandCompiler::new(cmd), DyLibLoader, &context, config)
    }
}

impl<C: Compiler, L: Loader> HostBackend<C, L>
where
    L::Module: Launcher,
{
    /// Backend with custom compiler and loader
    pub fn with_collaborators(compiler: C, loader: L, context: &str, config: &EngineConfig) -> Result<Self, JitError> {
        if config.target.is_gpu() {
            return Err(JitError::unsupported(format!("target {} is not executed on host", config.target)));
        }
        Ok(HostBackend { target: config.target, cache: KernelCache::new(compiler, loader, context, config)? })
    }

    /// Statistics of kernel cache
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl<C: Compiler, L: Loader> Backend for HostBackend<C, L>
where
    L::Module: Launcher,
{
    fn target(&self) -> Target {
        self.target
    }

    fn execute(&mut self, launch: Launch<'_>, bases: &mut Bases) -> Result<(), JitError> {
        let source = launch
            .source
            .ok_or_else(|| JitError::invalid_argument("host kernels are executed from generated source"))?;
        let symbols = &source.symbols;
        let mut data: Vec<*mut c_void> = Vec::with_capacity(symbols.params().len());
        for &id in symbols.params() {
            let buffer = bases
                .get_mut(id)
                .and_then(|b| b.data.as_mut())
                .ok_or_else(|| BackendError::new(ErrorStatus::UnallocatedBuffer, format!("kernel argument {id}")))?;
            if buffer.dtype() != symbols.dtype(id) {
                return Err(JitError::invalid_argument(format!(
                    "kernel accesses {id} as {}, but it holds {}",
                    symbols.dtype(id),
                    buffer.dtype()
                )));
            }
            if symbols.lowest(id) < 0 {
                return Err(JitError::invalid_argument(format!(
                    "kernel accesses element {} of {id}",
                    symbols.lowest(id)
                )));
            }
            if (buffer.len() as i64) < symbols.extent(id) {
                return Err(JitError::invalid_argument(format!(
                    "kernel accesses {} elements of {id} with {} elements",
                    symbols.extent(id),
                    buffer.len()
                )));
            }
            data.push(buffer.as_mut_ptr());
        }
        let offset_strides = symbols.offset_stride_values();
        let constants: Vec<[u64; 2]> = symbols.constants().iter().map(constant_slot).collect();
        let function = self.cache.get_function(&source.source)?;
        log::debug!("Launching kernel {:x} with {} buffers", symbols.codegen_hash(), data.len());
        // Pointers, offsets and constants follow the binding order of the symbol table
        unsafe { function.launch(&mut data, &offset_strides, &constants) };
        Ok(())
    }
}

/// One kernel submitted to [DummyBackend]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Generated source
    pub source: String,
    /// Structural hash of the kernel
    pub codegen_hash: u64,
    /// Sizes of loops mapped to hardware threads
    pub thread_stack: Vec<i64>,
    /// Global work size
    pub global: [u64; 3],
    /// Local work size
    pub local: [u64; 3],
}

/// Backend recording launches without executing them
#[derive(Debug)]
pub struct DummyBackend {
    config: EngineConfig,
    records: Vec<LaunchRecord>,
}

impl DummyBackend {
    /// New recording backend for configured target
    pub fn new(config: &EngineConfig) -> DummyBackend {
        DummyBackend { config: config.clone(), records: Vec::new() }
    }

    /// Recorded launches in submission order
    pub fn records(&self) -> &[LaunchRecord] {
        &self.records
    }
}

impl Backend for DummyBackend {
    fn target(&self) -> Target {
        self.config.target
    }

    fn execute(&mut self, launch: Launch<'_>, _bases: &mut Bases) -> Result<(), JitError> {
        let source = launch
            .source
            .ok_or_else(|| JitError::invalid_argument("dummy backend records generated source"))?;
        let (global, local) = if source.thread_stack.is_empty() {
            ([1; 3], [1; 3])
        } else {
            nd_ranges(&source.thread_stack, &self.config)?
        };
        if self.config.debug.dev() {
            println!("Kernel {:x} NDRange global {global:?}, local {local:?}", source.symbols.codegen_hash());
        }
        self.records.push(LaunchRecord {
            source: source.source.clone(),
            codegen_hash: source.symbols.codegen_hash(),
            thread_stack: source.thread_stack.clone(),
            global,
            local,
        });
        Ok(())
    }
}

#[test]
fn constant_slots() {
    let [lo, hi] = constant_slot(&Constant::R123 { start: 7, key: 9 });
    assert_eq!((lo, hi), (7, 9));
    let [lo, hi] = constant_slot(&Constant::f64(1.5));
    assert_eq!((f64::from_bits(lo), hi), (1.5, 0));
    let [lo, _] = constant_slot(&Constant::I32(-1));
    assert_eq!(lo.to_ne_bytes()[..4], (-1i32).to_ne_bytes());
    let [lo, _] = constant_slot(&Constant::C64(1.0f32.to_bits(), 2.0f32.to_bits()));
    let bytes = lo.to_ne_bytes();
    assert_eq!(bytes[4..], 2.0f32.to_bits().to_ne_bytes());
}
