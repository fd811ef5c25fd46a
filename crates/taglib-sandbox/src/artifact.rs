//! Compiled artifact and its process-wide cell.
//!
//! [`Artifact`] is the immutable, pre-linked form of the guest: the wasmtime
//! [`Engine`], the compiled [`Module`], and an [`InstancePre`] with WASI and the
//! fault bridge already resolved.  Cloning is cheap and every clone
//! instantiates independent sessions.
//!
//! [`ArtifactCell`] memoizes one artifact per process.  The first caller builds
//! it; concurrent first callers block until that build finishes and then all
//! observe the same artifact or the same error.  A failed build is never
//! retried.

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Instant;

use tracing::{error, info};
use wasmtime::{Engine, InstancePre, Linker, Module};

use crate::cache::{CacheOutcome, CompilationCache};
use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::fault;
use crate::session::SessionState;

/// Immutable compiled guest, shareable across threads and sessions.
#[derive(Clone)]
pub struct Artifact {
    engine: Engine,
    module: Module,
    pre: InstancePre<SessionState>,
    config: SandboxConfig,
    cache_outcome: CacheOutcome,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("module", &self.module.name())
            .field("cache_outcome", &self.cache_outcome)
            .finish_non_exhaustive()
    }
}

impl Artifact {
    /// Build an artifact without memoization.
    ///
    /// The guest bytes come from `config.binary_path` when set, otherwise from
    /// `embedded`.  Bytes read from an override path are dropped as soon as
    /// the module is compiled.
    pub fn load(config: &SandboxConfig, embedded: Option<&[u8]>) -> Result<Self> {
        let started = Instant::now();

        let cache = if config.cache_enabled {
            CompilationCache::open(config.resolved_cache_dir())?
        } else {
            CompilationCache::disabled()
        };

        let mut wasm_config = wasmtime::Config::new();
        wasm_config.wasm_memory64(false);
        let engine = Engine::new(&wasm_config)
            .map_err(|e| SandboxError::Initialization(format!("failed to create wasm engine: {e}")))?;

        let mut linker: Linker<SessionState> = Linker::new(&engine);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut SessionState| {
            &mut state.wasi
        })
        .map_err(|e| SandboxError::Initialization(format!("failed to link WASI: {e}")))?;
        fault::define(&mut linker)?;

        let bytes: Cow<'_, [u8]> = match &config.binary_path {
            Some(path) => Cow::Owned(std::fs::read(path).map_err(|e| {
                SandboxError::Initialization(format!(
                    "failed to read guest binary {}: {e}",
                    path.display()
                ))
            })?),
            None => Cow::Borrowed(embedded.ok_or_else(|| {
                SandboxError::Initialization(
                    "no guest binary: none embedded and no override path configured".into(),
                )
            })?),
        };

        let (module, cache_outcome) = cache.load(&engine, &bytes)?;
        drop(bytes);

        let pre = linker
            .instantiate_pre(&module)
            .map_err(|e| SandboxError::Initialization(format!("failed to resolve guest imports: {e}")))?;

        info!(
            cache = ?cache_outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "guest artifact ready"
        );

        Ok(Self {
            engine,
            module,
            pre,
            config: config.clone(),
            cache_outcome,
        })
    }

    /// Build an artifact from in-memory bytes, ignoring any override path.
    pub fn from_bytes(config: &SandboxConfig, bytes: &[u8]) -> Result<Self> {
        let mut config = config.clone();
        config.binary_path = None;
        Self::load(&config, Some(bytes))
    }

    /// Return a reference to the wasmtime [`Engine`].
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Return a reference to the compiled [`Module`].
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Configuration the artifact was built with.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Whether the module came from the compilation cache.
    pub fn cache_outcome(&self) -> CacheOutcome {
        self.cache_outcome
    }

    /// Whether the guest declares a function export called `name`.
    pub fn exports_function(&self, name: &str) -> bool {
        self.module
            .get_export(name)
            .is_some_and(|ty| ty.func().is_some())
    }

    pub(crate) fn pre(&self) -> &InstancePre<SessionState> {
        &self.pre
    }
}

/// Process-wide, build-once holder for an [`Artifact`].
///
/// Usually a `static`:
///
/// ```ignore
/// static GUEST: ArtifactCell = ArtifactCell::new(Some(include_bytes!("guest.wasm")));
/// ```
pub struct ArtifactCell {
    embedded: Option<&'static [u8]>,
    config: OnceLock<SandboxConfig>,
    artifact: OnceLock<std::result::Result<Artifact, String>>,
}

impl ArtifactCell {
    /// A cell that falls back to `embedded` when no override path is set.
    pub const fn new(embedded: Option<&'static [u8]>) -> Self {
        Self {
            embedded,
            config: OnceLock::new(),
            artifact: OnceLock::new(),
        }
    }

    /// Install the configuration for the first build.
    ///
    /// Without this, [`SandboxConfig::from_env`] is used.  Fails once the
    /// build has started.
    pub fn configure(&self, config: SandboxConfig) -> Result<()> {
        if self.artifact.get().is_some() {
            return Err(SandboxError::AlreadyInitialized);
        }
        self.config
            .set(config)
            .map_err(|_| SandboxError::AlreadyInitialized)
    }

    /// Return the artifact, building it on first use.
    pub fn get_or_init(&self) -> Result<Artifact> {
        self.artifact
            .get_or_init(|| {
                let config = self.config.get_or_init(SandboxConfig::from_env);
                Artifact::load(config, self.embedded).map_err(|e| {
                    error!(error = %e, "guest artifact initialization failed");
                    match e {
                        SandboxError::Initialization(msg) => msg,
                        other => other.to_string(),
                    }
                })
            })
            .clone()
            .map_err(SandboxError::Initialization)
    }

    /// Whether a build (successful or not) has completed.
    pub fn is_initialized(&self) -> bool {
        self.artifact.get().is_some()
    }
}
