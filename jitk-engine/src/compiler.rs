//! External compiler and dynamic loader of kernels

use jitk_core::error::{BackendError, ErrorStatus, JitError};
use libloading::{Library, Symbol};
use std::{ffi::c_void, path::Path, process::Command};

/// Turns source file into binary
pub trait Compiler {
    /// Compile `src` into `out`
    fn compile(&mut self, out: &Path, src: &Path) -> Result<(), JitError>;
}

/// Loads compiled binary
pub trait Loader {
    /// Loaded module
    type Module;

    /// Load binary at `path`
    fn load(&self, path: &Path) -> Result<Self::Module, JitError>;
}

/// Compiler invoked as external process.
/// `{IN}` and `{OUT}` in the command are replaced by source and binary paths.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    cmd: String,
}

impl CommandCompiler {
    /// New compiler from command template
    pub fn new(cmd: impl Into<String>) -> CommandCompiler {
        CommandCompiler { cmd: cmd.into() }
    }

    /// Command template
    pub fn command(&self) -> &str {
        &self.cmd
    }

    /// Is the program of the command runnable
    pub fn is_available(&self) -> bool {
        self.cmd
            .split_whitespace()
            .next()
            .is_some_and(|program| Command::new(program).arg("--version").output().is_ok())
    }
}

impl Compiler for CommandCompiler {
    fn compile(&mut self, out: &Path, src: &Path) -> Result<(), JitError> {
        let cmd = self
            .cmd
            .replace("{IN}", &src.to_string_lossy())
            .replace("{OUT}", &out.to_string_lossy());
        let mut args = cmd.split_whitespace();
        let Some(program) = args.next() else {
            return Err(BackendError::new(ErrorStatus::CompilerNotFound, "empty compiler command").into());
        };
        log::debug!("Compiling kernel: {cmd}");
        let output = Command::new(program).args(args).output().map_err(|e| {
            BackendError::new(ErrorStatus::CompilerNotFound, format!("failed to execute {program:?}, {e}"))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::new(
                ErrorStatus::KernelCompilation,
                format!("compilation of {src:?} failed with {}:\n{stderr}", output.status),
            )
            .into());
        }
        Ok(())
    }
}

/// Signature of the `launcher` entry point of host kernels
pub type LauncherFn = unsafe extern "C" fn(*mut *mut c_void, *const i64, *const [u64; 2]);

/// Shared library with `launcher` entry point
#[derive(Debug)]
pub struct DyLib {
    launcher: LauncherFn,
    // Must outlive launcher
    _library: Library,
}

impl DyLib {
    /// Call launcher
    ///
    /// # Safety
    /// Pointers must point to buffers large enough for every access of the kernel,
    /// offsets, strides and constants must be in the order of the kernel's symbol table.
    pub unsafe fn launch(&self, data: &mut [*mut c_void], offset_strides: &[i64], constants: &[[u64; 2]]) {
        unsafe { (self.launcher)(data.as_mut_ptr(), offset_strides.as_ptr(), constants.as_ptr()) }
    }
}

/// Loads shared libraries with libloading
#[derive(Debug, Default, Clone, Copy)]
pub struct DyLibLoader;

impl Loader for DyLibLoader {
    type Module = DyLib;

    fn load(&self, path: &Path) -> Result<DyLib, JitError> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| BackendError::new(ErrorStatus::ModuleLoad, format!("module load error {path:?}, {e}")))?;
        let launcher: LauncherFn = {
            let symbol: Symbol<LauncherFn> = unsafe { library.get(b"launcher\0") }.map_err(|e| {
                BackendError::new(ErrorStatus::SymbolNotFound, format!("no launcher in {path:?}, {e}"))
            })?;
            *symbol
        };
        Ok(DyLib { launcher, _library: library })
    }
}

#[test]
fn missing_compiler_is_reported() {
    let mut compiler = CommandCompiler::new("jitk-no-such-compiler {IN} -o {OUT}");
    assert!(!compiler.is_available());
    let Err(JitError::BackendError(e)) = compiler.compile(Path::new("k.so"), Path::new("k.c")) else {
        panic!()
    };
    assert_eq!(e.status, ErrorStatus::CompilerNotFound);
    let Err(JitError::BackendError(e)) = DyLibLoader.load(Path::new("/nonexistent/jitk.so")) else { panic!() };
    assert_eq!(e.status, ErrorStatus::ModuleLoad);
}
