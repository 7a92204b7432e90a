//! Engine configuration, read from `jitk/engine_config.json` in xdg config directories

use crate::debug::DebugMask;
use jitk_compiler::{
    symbols::SymbolConfig,
    writer::{CudaWriter, FortranWriter, OpenClWriter, OpenMpWriter, Target, Writer},
};
use jitk_core::error::JitError;
use nanoserde::DeJson;
use std::path::PathBuf;

/// Fields of the config file, all of them are optional
#[derive(Debug, Default, DeJson)]
struct ConfigFile {
    target: Option<String>,
    compiler_cmd: Option<String>,
    compiler_openmp: Option<bool>,
    compiler_openmp_simd: Option<bool>,
    strides_as_var: Option<bool>,
    index_as_var: Option<bool>,
    const_as_var: Option<bool>,
    use_volatile: Option<bool>,
    avoid_rank0_sweep: Option<bool>,
    cache_dir: Option<String>,
    tmp_dir: Option<String>,
    cache_file_max: Option<i64>,
    verbose: Option<bool>,
    work_group_size_1dx: Option<u64>,
    work_group_size_2dx: Option<u64>,
    work_group_size_2dy: Option<u64>,
    work_group_size_3dx: Option<u64>,
    work_group_size_3dy: Option<u64>,
    work_group_size_3dz: Option<u64>,
    max_threaded_ranks: Option<usize>,
}

/// Configuration of [Engine](crate::Engine) and its kernel cache
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target of generated kernels
    pub target: Target,
    /// Compiler command with `{IN}` and `{OUT}` placeholders, None uses the default of target
    pub compiler_cmd: Option<String>,
    /// Parallelize outer loops with OpenMP
    pub compiler_openmp: bool,
    /// Vectorize inner loops with OpenMP simd
    pub compiler_openmp_simd: bool,
    /// Offsets and strides are kernel parameters
    pub strides_as_var: bool,
    /// Array indices are stored in index variables
    pub index_as_var: bool,
    /// Constants are kernel parameters
    pub const_as_var: bool,
    /// Scalars in OpenMP kernels are volatile
    pub use_volatile: bool,
    /// Do not fuse sweeps with other instructions at the outermost loop
    pub avoid_rank0_sweep: bool,
    /// Persistent cache of compiled kernels, None disables it
    pub cache_dir: Option<PathBuf>,
    /// Directory of temporary sources and binaries, None creates a fresh one
    pub tmp_dir: Option<PathBuf>,
    /// Maximum number of files in cache directory, -1 disables pruning
    pub cache_file_max: i64,
    /// Keep temporary sources and always compile
    pub verbose: bool,
    /// Work group size of 1D launches
    pub work_group_size_1dx: u64,
    /// Work group size of 2D launches, x dimension
    pub work_group_size_2dx: u64,
    /// Work group size of 2D launches, y dimension
    pub work_group_size_2dy: u64,
    /// Work group size of 3D launches, x dimension
    pub work_group_size_3dx: u64,
    /// Work group size of 3D launches, y dimension
    pub work_group_size_3dy: u64,
    /// Work group size of 3D launches, z dimension
    pub work_group_size_3dz: u64,
    /// Number of outer loops mapped to hardware threads on GPU targets
    pub max_threaded_ranks: usize,
    /// Debug output
    pub debug: DebugMask,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new(Target::OpenMp)
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    xdg::BaseDirectories::new().ok().map(|bd| bd.get_cache_home().join("jitk/kernels"))
}

impl EngineConfig {
    /// Defaults for target, no persistent cache
    pub fn new(target: Target) -> EngineConfig {
        EngineConfig {
            target,
            compiler_cmd: None,
            compiler_openmp: false,
            compiler_openmp_simd: false,
            strides_as_var: true,
            index_as_var: true,
            const_as_var: true,
            use_volatile: false,
            avoid_rank0_sweep: target.is_gpu(),
            cache_dir: None,
            tmp_dir: None,
            cache_file_max: 50000,
            verbose: false,
            work_group_size_1dx: 128,
            work_group_size_2dx: 32,
            work_group_size_2dy: 4,
            work_group_size_3dx: 32,
            work_group_size_3dy: 2,
            work_group_size_3dz: 2,
            max_threaded_ranks: 3,
            debug: DebugMask::default(),
        }
    }

    /// Parse config from json, missing fields use defaults
    pub fn from_json(json: &str) -> Result<EngineConfig, JitError> {
        let file = ConfigFile::deserialize_json(json).map_err(|e| JitError::parse_error(format!("{e}")))?;
        let target = match &file.target {
            Some(t) => Target::parse(t)?,
            None => Target::OpenMp,
        };
        let mut config = EngineConfig::new(target);
        config.compiler_cmd = file.compiler_cmd;
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(x) = file.$field {
                    config.$field = x;
                })*
            };
        }
        set!(
            compiler_openmp,
            compiler_openmp_simd,
            strides_as_var,
            index_as_var,
            const_as_var,
            use_volatile,
            avoid_rank0_sweep,
            cache_file_max,
            verbose,
            work_group_size_1dx,
            work_group_size_2dx,
            work_group_size_2dy,
            work_group_size_3dx,
            work_group_size_3dy,
            work_group_size_3dz,
            max_threaded_ranks
        );
        config.cache_dir = match file.cache_dir {
            Some(dir) if dir.is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => default_cache_dir(),
        };
        config.tmp_dir = file.tmp_dir.filter(|d| !d.is_empty()).map(PathBuf::from);
        Ok(config)
    }

    /// Search config directories for `jitk/engine_config.json`.
    /// If not found or failed to parse, use defaults.
    /// Environment variables `JITK_DEBUG`, `JITK_CACHE_DIR` and `JITK_NO_DISK_CACHE` override the file.
    pub fn load() -> EngineConfig {
        let debug = DebugMask::from_env();
        let config = xdg::BaseDirectories::new()
            .map_err(|e| {
                if debug.dev() {
                    println!("Failed to find config directories for engine_config.json, {e}");
                }
            })
            .ok()
            .map(|bd| {
                let mut dirs = bd.get_config_dirs();
                dirs.push(bd.get_config_home());
                dirs
            })
            .and_then(|paths| {
                paths.into_iter().find_map(|mut path| {
                    path.push("jitk/engine_config.json");
                    std::fs::read_to_string(&path)
                        .map_err(|e| log::debug!("Failed to read engine_config.json at {path:?}, {e}"))
                        .ok()
                })
            })
            .and_then(|file| {
                EngineConfig::from_json(&file)
                    .map_err(|e| log::warn!("Failed to parse engine_config.json, {e}"))
                    .ok()
            })
            .map(|x| {
                if debug.dev() {
                    println!("Engine config successfully read and parsed.");
                }
                x
            })
            .unwrap_or_else(|| {
                if debug.dev() {
                    println!("Failed to get engine config, using defaults.");
                }
                let mut config = EngineConfig::default();
                config.cache_dir = default_cache_dir();
                config
            });
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> EngineConfig {
        self.debug = DebugMask::from_env();
        if let Some(dir) = std::env::var_os("JITK_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if std::env::var_os("JITK_NO_DISK_CACHE").is_some() {
            self.cache_dir = None;
        }
        self
    }

    /// Compiler command, the configured one or the default of target
    pub fn compiler_command(&self) -> Option<String> {
        if let Some(cmd) = &self.compiler_cmd {
            return Some(cmd.clone());
        }
        match self.target {
            Target::OpenMp => Some(format!(
                "cc -x c -fPIC -shared -std=gnu99 -O3{} {{IN}} -o {{OUT}} -lm",
                if self.compiler_openmp { " -fopenmp" } else { "" }
            )),
            Target::Fortran => Some(format!(
                "gfortran -fPIC -shared -O3 -ffree-line-length-none{} {{IN}} -o {{OUT}}",
                if self.compiler_openmp { " -fopenmp" } else { "" }
            )),
            Target::OpenCl | Target::Cuda => None,
        }
    }

    /// What the kernel receives as parameters
    pub fn symbol_config(&self) -> SymbolConfig {
        SymbolConfig {
            strides_as_var: self.strides_as_var,
            index_as_var: self.index_as_var,
            const_as_var: self.const_as_var,
            temps_as_params: false,
        }
    }

    /// Writer of configured target
    pub fn writer(&self) -> Box<dyn Writer> {
        match self.target {
            Target::OpenMp => Box::new(OpenMpWriter {
                openmp: self.compiler_openmp,
                openmp_simd: self.compiler_openmp_simd,
                use_volatile: self.use_volatile,
            }),
            Target::Fortran => Box::new(FortranWriter {
                openmp: self.compiler_openmp,
                openmp_simd: self.compiler_openmp_simd,
            }),
            Target::OpenCl => Box::new(OpenClWriter { max_threaded_ranks: self.max_threaded_ranks }),
            Target::Cuda => Box::new(CudaWriter { max_threaded_ranks: self.max_threaded_ranks }),
        }
    }
}

#[test]
fn config_from_json() -> Result<(), JitError> {
    let config = EngineConfig::from_json(
        r#"{"target": "fortran", "compiler_openmp": true, "cache_dir": "", "work_group_size_1dx": 64}"#,
    )?;
    assert_eq!(config.target, Target::Fortran);
    assert!(config.compiler_openmp);
    assert!(config.cache_dir.is_none());
    assert_eq!(config.work_group_size_1dx, 64);
    assert_eq!(config.work_group_size_2dy, 4);
    assert_eq!(config.cache_file_max, 50000);
    let cmd = config.compiler_command().unwrap_or_default();
    assert!(cmd.starts_with("gfortran"));
    assert!(cmd.contains("-fopenmp"));
    assert!(EngineConfig::from_json(r#"{"target": "vulkan"}"#).is_err());
    assert!(EngineConfig::new(Target::Cuda).compiler_command().is_none());
    assert!(EngineConfig::new(Target::Cuda).avoid_rank0_sweep);
    Ok(())
}
