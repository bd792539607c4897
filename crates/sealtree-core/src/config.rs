use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{SealError, SealResult};

/// Default PBKDF2 iteration count for new envelopes
pub const DEFAULT_ITERATIONS: u32 = 300_000;

/// Upper bound on PBKDF2 iterations, for config and for envelopes read back
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Overrides `crypto.iterations`
pub const ITERATIONS_ENV: &str = "SEALTREE_ITERATIONS";

/// Overrides `sync.prune` (1/0, true/false, yes/no, on/off)
pub const PRUNE_ENV: &str = "SEALTREE_PRUNE";

/// Default debounce window for watch-triggered rebuilds
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Environment variable holding the passphrase unless overridden
pub const DEFAULT_PASSPHRASE_ENV: &str = "SEALTREE_PASSPHRASE";

/// Top-level configuration (loaded from sealtree.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealtreeConfig {
    pub paths: PathsConfig,
    pub crypto: CryptoConfig,
    pub sync: SyncConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Plaintext source root (default: raw)
    pub source: PathBuf,
    /// Encrypted mirror root (default: encrypted)
    pub mirror: PathBuf,
    /// Working tree watched when `watch.scope = "project"`
    pub project_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-SHA256 iterations for newly written envelopes
    pub iterations: u32,
    /// Name of the environment variable that holds the passphrase
    pub passphrase_env: String,
    /// Fail instead of warn when no passphrase is available
    pub require_passphrase: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delete envelopes whose source file no longer exists
    pub prune: bool,
    /// Worker thread count (0 = cpu_count)
    pub workers: usize,
    /// Glob patterns (matched against file names) to leave unencrypted
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period before a rebuild runs, in milliseconds
    pub debounce_ms: u64,
    /// Which tree to subscribe to
    pub scope: WatchScope,
    /// Extra glob patterns whose events never trigger a rebuild
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchScope {
    /// The whole project working tree
    Project,
    /// Only the plaintext source root
    Source,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("raw"),
            mirror: PathBuf::from("encrypted"),
            project_root: PathBuf::from("."),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            passphrase_env: DEFAULT_PASSPHRASE_ENV.into(),
            require_passphrase: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prune: false,
            workers: 0,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            scope: WatchScope::Project,
            ignore: Vec::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SealtreeConfig {
    /// Load configuration from a TOML file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> SealResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| SealError::fs(path, e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SealError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SEALTREE_ITERATIONS` / `SEALTREE_PRUNE` from the process environment.
    pub fn apply_env(&mut self) -> SealResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply environment-style overrides from `lookup`, then re-validate.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> SealResult<()> {
        if let Some(raw) = lookup(ITERATIONS_ENV).filter(|v| !v.trim().is_empty()) {
            self.crypto.iterations = raw.trim().parse().map_err(|_| {
                SealError::Config(format!("{ITERATIONS_ENV}: expected an integer, got {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup(PRUNE_ENV).filter(|v| !v.trim().is_empty()) {
            self.sync.prune = parse_flag(&raw).ok_or_else(|| {
                SealError::Config(format!("{PRUNE_ENV}: expected a boolean, got {raw:?}"))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> SealResult<()> {
        check_iterations(self.crypto.iterations)?;
        if self.crypto.passphrase_env.is_empty() {
            return Err(SealError::Config("crypto.passphrase_env must not be empty".into()));
        }
        check_roots(
            &expand_tilde(&self.paths.source),
            &expand_tilde(&self.paths.mirror),
        )
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reject iteration counts outside `1..=MAX_ITERATIONS`.
pub fn check_iterations(iterations: u32) -> SealResult<()> {
    if iterations == 0 {
        return Err(SealError::Config("crypto.iterations must be positive".into()));
    }
    if iterations > MAX_ITERATIONS {
        return Err(SealError::Config(format!(
            "crypto.iterations must be at most {MAX_ITERATIONS}, got {iterations}"
        )));
    }
    Ok(())
}

/// Reject source/mirror layouts where pruning the mirror could touch plaintext.
///
/// Equal roots and a source inside the mirror are errors. A mirror inside the
/// source is allowed; the walk skips it.
pub fn check_roots(source: &Path, mirror: &Path) -> SealResult<()> {
    let source_abs = resolve_path(source);
    let mirror_abs = resolve_path(mirror);
    if source_abs == mirror_abs {
        return Err(SealError::Config(format!(
            "source and mirror resolve to the same directory ({})",
            source_abs.display()
        )));
    }
    if source_abs.starts_with(&mirror_abs) {
        return Err(SealError::Config(format!(
            "source {} lies inside mirror {}",
            source_abs.display(),
            mirror_abs.display()
        )));
    }
    Ok(())
}

/// Absolute, normalized form of `path`, whether or not it exists yet.
///
/// The deepest existing ancestor is canonicalized (resolving symlinks) and
/// the missing components are appended to it.
pub fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normal = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other.as_os_str()),
        }
    }

    let mut existing = normal.as_path();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut canon) = std::fs::canonicalize(existing) {
            canon.extend(missing.iter().rev());
            return canon;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return normal,
        }
    }
}

impl CryptoConfig {
    /// Read the passphrase from the configured environment variable.
    ///
    /// Returns `None` when the variable is unset or empty.
    pub fn passphrase(&self) -> Option<SecretString> {
        std::env::var(&self.passphrase_env)
            .ok()
            .filter(|p| !p.is_empty())
            .map(SecretString::from)
    }

    /// Like [`passphrase`](Self::passphrase) but applies the missing-passphrase policy:
    /// `Ok(None)` means "warn and skip", `Err` means fail fast.
    pub fn resolve_passphrase(&self) -> SealResult<Option<SecretString>> {
        match self.passphrase() {
            Some(p) => Ok(Some(p)),
            None if self.require_passphrase => Err(SealError::Config(format!(
                "no passphrase configured: set {}",
                self.passphrase_env
            ))),
            None => Ok(None),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    expand_tilde_with(path, home.as_deref())
}

/// [`expand_tilde`] against an explicit home directory.
pub fn expand_tilde_with(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
