use std::fmt::{Display, Write};

/// Enumeration of errors that can occur while compiling or executing array programs.
#[derive(Debug)]
pub enum JitError {
    /// Argument does not describe a valid view, shape or instruction
    InvalidArgument(Box<str>),
    /// Instruction is not supported by the selected writer or backend
    Unsupported(Box<str>),
    /// Error from file operations
    IOError(std::io::Error),
    /// Error parsing some data
    ParseError(Box<str>),
    /// Error returned by compiler, loader or launcher
    BackendError(BackendError),
}

fn with_location(e: Box<str>, location: &std::panic::Location<'_>) -> Box<str> {
    let mut e: String = e.into();
    let _ = write!(e, ", {}:{}:{}", location.file(), location.line(), location.column());
    e.into()
}

impl JitError {
    /// Invalid argument error
    #[track_caller]
    pub fn invalid_argument(e: impl Into<Box<str>>) -> Self {
        Self::InvalidArgument(with_location(e.into(), std::panic::Location::caller()))
    }

    /// Unsupported instruction error
    #[track_caller]
    pub fn unsupported(e: impl Into<Box<str>>) -> Self {
        Self::Unsupported(with_location(e.into(), std::panic::Location::caller()))
    }

    /// Parse error
    #[track_caller]
    pub fn parse_error(e: impl Into<Box<str>>) -> Self {
        Self::ParseError(with_location(e.into(), std::panic::Location::caller()))
    }
}

impl Display for JitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JitError::InvalidArgument(e) => f.write_fmt(format_args!("Invalid argument {e}")),
            JitError::Unsupported(e) => f.write_fmt(format_args!("Not supported {e}")),
            JitError::IOError(e) => f.write_fmt(format_args!("IO {e}")),
            JitError::ParseError(e) => f.write_fmt(format_args!("Parse {e}")),
            JitError::BackendError(e) => f.write_fmt(format_args!("Backend {e}")),
        }
    }
}

impl std::error::Error for JitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JitError::IOError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for JitError {
    #[track_caller]
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

/// Error reported by the compiler and loader collaborators or the kernel launcher.
#[derive(Debug)]
pub struct BackendError {
    /// What failed
    pub status: ErrorStatus,
    /// Diagnostic text, usually including the path of the artifact
    pub context: Box<str>,
}

impl BackendError {
    /// New backend error
    pub fn new(status: ErrorStatus, context: impl Into<Box<str>>) -> Self {
        Self { status, context: context.into() }
    }
}

impl From<BackendError> for JitError {
    fn from(value: BackendError) -> Self {
        JitError::BackendError(value)
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}: {}", self.status, self.context))
    }
}

impl std::error::Error for BackendError {}

/// Kind of backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Compiler command is not configured or could not be spawned
    CompilerNotFound,
    /// Compiler returned nonzero exit status
    KernelCompilation,
    /// Compiled module could not be loaded
    ModuleLoad,
    /// Kernel entry point is missing in the loaded module
    SymbolNotFound,
    /// Kernel could not be launched
    KernelLaunch,
    /// Kernel argument refers to a base without data
    UnallocatedBuffer,
    /// Binary could not be copied to the persistent cache
    CacheWrite,
}

#[test]
fn error_carries_location() {
    let e = JitError::invalid_argument("shape [3, 4]");
    let JitError::InvalidArgument(msg) = e else { panic!() };
    assert!(msg.starts_with("shape [3, 4], "));
    assert!(msg.contains("error.rs"));
}
