//! Content addressed cache of compiled kernels.
//!
//! Kernels are looked up in memory first, then in the persistent cache directory
//! and compiled into a temporary directory on miss. Freshly compiled binaries
//! are copied into the persistent directory when the cache is dropped.

use crate::{
    compiler::{Compiler, Loader},
    config::EngineConfig,
};
use jitk_core::{
    chasher::{hash_filename, hash_str},
    error::JitError,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Statistics of kernel cache
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls of [KernelCache::get_function]
    pub lookups: u64,
    /// Lookups of kernels that were not loaded yet
    pub misses: u64,
    /// Invocations of the compiler
    pub compilations: u64,
}

/// Cache of compiled kernels keyed by the hash of their source
pub struct KernelCache<C: Compiler, L: Loader> {
    compiler: C,
    loader: L,
    compilation_hash: u64,
    source_ext: &'static str,
    binary_ext: &'static str,
    functions: BTreeMap<u64, L::Module>,
    fresh: Vec<String>,
    cache_dir: Option<PathBuf>,
    tmp_src_dir: PathBuf,
    tmp_bin_dir: PathBuf,
    // Removed on drop unless verbose
    _tmp_dir: Option<tempfile::TempDir>,
    cache_file_max: i64,
    verbose: bool,
    stats: CacheStats,
}

impl<C: Compiler, L: Loader> core::fmt::Debug for KernelCache<C, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelCache")
            .field("compilation_hash", &self.compilation_hash)
            .field("loaded", &self.functions.len())
            .field("cache_dir", &self.cache_dir)
            .field("tmp_bin_dir", &self.tmp_bin_dir)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<C: Compiler, L: Loader> KernelCache<C, L> {
    /// New cache. `context` identifies the compilation setup, binaries compiled
    /// with a different context are never reused.
    pub fn new(compiler: C, loader: L, context: &str, config: &EngineConfig) -> Result<Self, JitError> {
        let (tmp_root, tmp_dir) = match &config.tmp_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let dir = tempfile::Builder::new().prefix("jitk-").disable_cleanup(config.verbose).tempdir()?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };
        let tmp_src_dir = tmp_root.join("src");
        let tmp_bin_dir = tmp_root.join("bin");
        std::fs::create_dir_all(&tmp_src_dir)?;
        std::fs::create_dir_all(&tmp_bin_dir)?;
        let cache_dir = config.cache_dir.clone().and_then(|dir| match std::fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                log::warn!("Kernel cache directory {dir:?} is not usable, {e}");
                None
            }
        });
        let compilation_hash = hash_str(context);
        log::debug!("Kernel cache {cache_dir:?}, temporary directory {tmp_root:?}, context {compilation_hash:x}");
        Ok(KernelCache {
            compiler,
            loader,
            compilation_hash,
            source_ext: config.target.source_extension(),
            binary_ext: binary_extension(),
            functions: BTreeMap::new(),
            fresh: Vec::new(),
            cache_dir,
            tmp_src_dir,
            tmp_bin_dir,
            _tmp_dir: tmp_dir,
            cache_file_max: config.cache_file_max,
            verbose: config.verbose,
            stats: CacheStats::default(),
        })
    }

    /// Loaded kernel for source, compiled on miss
    pub fn get_function(&mut self, source: &str) -> Result<&L::Module, JitError> {
        let hash = hash_str(source);
        self.stats.lookups += 1;
        if self.functions.contains_key(&hash) {
            return Ok(&self.functions[&hash]);
        }
        self.stats.misses += 1;

        let bin_name = hash_filename(self.compilation_hash, hash, self.binary_ext);
        let cached = self
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(&bin_name))
            .filter(|path| !self.verbose && path.exists());
        let binfile = match cached {
            Some(path) => {
                log::debug!("Kernel {hash:x} found in cache {path:?}");
                path
            }
            None => {
                let binfile = self.tmp_bin_dir.join(&bin_name);
                let srcfile = self.tmp_src_dir.join(hash_filename(self.compilation_hash, hash, self.source_ext));
                std::fs::write(&srcfile, source)?;
                self.compiler.compile(&binfile, &srcfile)?;
                self.stats.compilations += 1;
                self.fresh.push(bin_name);
                binfile
            }
        };
        let module = self.loader.load(&binfile)?;
        Ok(self.functions.entry(hash).or_insert(module))
    }

    /// Statistics
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Directory of persistent cache
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Copy freshly compiled binaries into the persistent cache and prune it.
    /// Failures are logged as warnings.
    pub fn persist(&mut self) {
        let fresh = core::mem::take(&mut self.fresh);
        let Some(cache_dir) = &self.cache_dir else { return };
        for name in fresh {
            let src = self.tmp_bin_dir.join(&name);
            let dst = cache_dir.join(&name);
            if !src.exists() || dst.exists() {
                continue;
            }
            if let Err(e) = std::fs::copy(&src, &dst) {
                log::warn!("Couldn't write kernel to disk to {cache_dir:?}, {e}");
            }
        }
        if self.cache_file_max >= 0 {
            match remove_old_files(cache_dir, self.cache_file_max as usize) {
                Ok(0) => {}
                Ok(n) => log::debug!("Removed {n} old kernels from {cache_dir:?}"),
                Err(e) => log::warn!("Couldn't prune kernel cache {cache_dir:?}, {e}"),
            }
        }
    }
}

impl<C: Compiler, L: Loader> Drop for KernelCache<C, L> {
    fn drop(&mut self) {
        self.persist();
        if !self.verbose && self._tmp_dir.is_none() {
            let _ = std::fs::remove_dir_all(&self.tmp_src_dir);
        }
    }
}

const fn binary_extension() -> &'static str {
    if cfg!(target_os = "windows") {
        ".dll"
    } else if cfg!(target_os = "macos") {
        ".dylib"
    } else {
        ".so"
    }
}

/// Remove the oldest files of directory until at most `max` files remain.
/// Returns number of removed files.
pub fn remove_old_files(dir: &Path, max: usize) -> std::io::Result<usize> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            files.push((meta.modified()?, entry.path()));
        }
    }
    if files.len() <= max {
        return Ok(0);
    }
    files.sort();
    let n = files.len() - max;
    for (_, path) in &files[..n] {
        std::fs::remove_file(path)?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitk_compiler::writer::Target;

    /// Writes the source into the binary and counts invocations
    #[derive(Default)]
    struct CopyCompiler {
        calls: usize,
    }

    impl Compiler for CopyCompiler {
        fn compile(&mut self, out: &Path, src: &Path) -> Result<(), JitError> {
            self.calls += 1;
            std::fs::copy(src, out)?;
            Ok(())
        }
    }

    struct ReadLoader;

    impl Loader for ReadLoader {
        type Module = String;

        fn load(&self, path: &Path) -> Result<String, JitError> {
            Ok(std::fs::read_to_string(path)?)
        }
    }

    fn config(cache: &Path) -> EngineConfig {
        let mut config = EngineConfig::new(Target::OpenMp);
        config.cache_dir = Some(cache.to_path_buf());
        config
    }

    #[test]
    fn same_source_compiles_once() -> Result<(), JitError> {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir()?;
        let mut cache = KernelCache::new(CopyCompiler::default(), ReadLoader, "cc", &config(dir.path()))?;
        assert_eq!(cache.get_function("void launcher() {}")?, "void launcher() {}");
        assert_eq!(cache.get_function("void launcher() {}")?, "void launcher() {}");
        cache.get_function("void launcher() { return; }")?;
        assert_eq!(cache.compiler.calls, 2);
        assert_eq!(cache.stats(), CacheStats { lookups: 3, misses: 2, compilations: 2 });
        Ok(())
    }

    #[test]
    fn persistent_cache_is_reused() -> Result<(), JitError> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path());
        {
            let mut cache = KernelCache::new(CopyCompiler::default(), ReadLoader, "cc", &config)?;
            cache.get_function("kernel a")?;
        }
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        let mut cache = KernelCache::new(CopyCompiler::default(), ReadLoader, "cc", &config)?;
        assert_eq!(cache.get_function("kernel a")?, "kernel a");
        assert_eq!(cache.compiler.calls, 0);
        // Other compilation context does not reuse binaries
        let mut other = KernelCache::new(CopyCompiler::default(), ReadLoader, "gcc", &config)?;
        other.get_function("kernel a")?;
        assert_eq!(other.compiler.calls, 1);
        Ok(())
    }

    #[test]
    fn temporary_directory_kept_only_when_verbose() -> Result<(), JitError> {
        let mut config = EngineConfig::new(Target::OpenMp);
        let cache = KernelCache::new(CopyCompiler::default(), ReadLoader, "cc", &config)?;
        let root = cache.tmp_bin_dir.parent().map(Path::to_path_buf);
        assert!(root.as_ref().is_some_and(|r| r.exists()));
        drop(cache);
        assert!(root.as_ref().is_some_and(|r| !r.exists()));

        config.verbose = true;
        let mut cache = KernelCache::new(CopyCompiler::default(), ReadLoader, "cc", &config)?;
        cache.get_function("kernel b")?;
        let root = cache.tmp_bin_dir.parent().map(Path::to_path_buf);
        drop(cache);
        let root = root.filter(|r| r.exists());
        assert!(root.is_some());
        if let Some(root) = root {
            assert!(root.join("src").exists());
            std::fs::remove_dir_all(root)?;
        }
        Ok(())
    }

    #[test]
    fn pruning_keeps_newest_files() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("{i}.so")), "x")?;
        }
        assert_eq!(remove_old_files(dir.path(), 3)?, 2);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 3);
        assert_eq!(remove_old_files(dir.path(), 3)?, 0);
        Ok(())
    }
}
