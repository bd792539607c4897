//! Tree synchronizer: mirror a plaintext tree into a tree of envelopes
//!
//! One pass:
//!   - `collect_sources`: walk the source root, log and skip unreadable subtrees
//!   - encrypt every source file (rayon pool), write `{rel}.json` atomically
//!   - optionally prune envelopes whose source path no longer exists
//!
//! Every file is re-encrypted on every pass with a fresh salt and IV.
//! Staleness is decided by path alone; no file contents are ever compared.
//! Per-file failures are collected into the [`SyncReport`], never thrown.

use rayon::prelude::*;
use secrecy::SecretString;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zeroize::Zeroize;

use sealtree_core::config::{check_iterations, check_roots, SealtreeConfig};
use sealtree_core::{
    mirror_path_for, relative_key, source_rel_for, SealError, SealResult, TEMP_SUFFIX,
};
use sealtree_crypto::seal;

/// Parameters of a synchronization pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub source_root: PathBuf,
    pub mirror_root: PathBuf,
    /// PBKDF2 iterations for every envelope written by this pass
    pub iterations: u32,
    /// Delete envelopes whose source file is gone
    pub prune: bool,
    /// Worker thread count (0 = cpu_count)
    pub workers: usize,
    /// Glob patterns matched against file and directory names
    pub exclude_patterns: Vec<String>,
}

impl SyncOptions {
    pub fn new(source_root: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            mirror_root: mirror_root.into(),
            iterations: sealtree_core::config::DEFAULT_ITERATIONS,
            prune: false,
            workers: 0,
            exclude_patterns: Vec::new(),
        }
    }

    pub fn from_config(config: &SealtreeConfig) -> Self {
        Self {
            source_root: sealtree_core::config::expand_tilde(&config.paths.source),
            mirror_root: sealtree_core::config::expand_tilde(&config.paths.mirror),
            iterations: config.crypto.iterations,
            prune: config.sync.prune,
            workers: config.sync.workers,
            exclude_patterns: config.sync.exclude_patterns.clone(),
        }
    }
}

/// Which step of the pass a file failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Walk,
    Read,
    Encrypt,
    Write,
    Prune,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureStage::Walk => "walk",
            FailureStage::Read => "read",
            FailureStage::Encrypt => "encrypt",
            FailureStage::Write => "write",
            FailureStage::Prune => "prune",
        };
        f.write_str(s)
    }
}

/// A single file that could not be processed
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub stage: FailureStage,
    pub error: String,
}

impl FileFailure {
    fn new(path: &Path, stage: FailureStage, error: impl std::fmt::Display) -> Self {
        Self {
            path: path.to_path_buf(),
            stage,
            error: error.to_string(),
        }
    }
}

/// Outcome of one pass
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Source-relative paths that now have a fresh envelope
    pub encrypted: Vec<String>,
    /// Mirror-relative paths that were deleted as stale
    pub pruned: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of walking the source root
#[derive(Debug, Default)]
struct SourceScan {
    /// (relative key, absolute path)
    files: Vec<(String, PathBuf)>,
    /// Relative keys of entries that could not be walked ("" = the root itself)
    unreadable: Vec<String>,
    failures: Vec<FileFailure>,
}

/// Run one synchronization pass.
///
/// Only parameter errors are returned as `Err`; everything that goes wrong
/// with an individual file lands in [`SyncReport::failures`].
///
/// Roots that coincide, or a source root inside the mirror root, are refused
/// before anything is written: pruning would otherwise delete plaintext.
pub fn sync_tree(opts: &SyncOptions, passphrase: &SecretString) -> SealResult<SyncReport> {
    check_iterations(opts.iterations)?;
    check_roots(&opts.source_root, &opts.mirror_root)?;

    let start = Instant::now();
    let scan = collect_sources(opts);
    let mut report = seal_scan(opts, passphrase, scan)?;
    report.elapsed = start.elapsed();

    info!(
        source = %opts.source_root.display(),
        mirror = %opts.mirror_root.display(),
        encrypted = report.encrypted.len(),
        pruned = report.pruned.len(),
        failed = report.failures.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "sync pass complete"
    );

    Ok(report)
}

/// Encrypt every scanned file, then prune if asked.
fn seal_scan(
    opts: &SyncOptions,
    passphrase: &SecretString,
    scan: SourceScan,
) -> SealResult<SyncReport> {
    let mut report = SyncReport {
        failures: scan.failures,
        ..SyncReport::default()
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.workers)
        .thread_name(|i| format!("sealtree-sync-{i}"))
        .build()
        .map_err(|e| SealError::Other(anyhow::anyhow!("building worker pool: {e}")))?;

    let results: Vec<Result<String, FileFailure>> = pool.install(|| {
        scan.files
            .par_iter()
            .map(|(rel, path)| encrypt_one(opts, passphrase, rel, path))
            .collect()
    });

    for result in results {
        match result {
            Ok(rel) => report.encrypted.push(rel),
            Err(failure) => {
                warn!(
                    path = %failure.path.display(),
                    stage = %failure.stage,
                    error = %failure.error,
                    "skipping file"
                );
                report.failures.push(failure);
            }
        }
    }
    report.encrypted.sort();

    if opts.prune {
        let expected: HashSet<&str> = scan.files.iter().map(|(rel, _)| rel.as_str()).collect();
        prune_mirror(opts, &expected, &scan.unreadable, &mut report);
    }
    Ok(report)
}

/// Enumerate regular files under the source root, skipping what cannot be walked.
fn collect_sources(opts: &SyncOptions) -> SourceScan {
    let mut scan = SourceScan::default();
    let root = &opts.source_root;

    if !root.exists() {
        debug!(source = %root.display(), "source root does not exist");
        return scan;
    }

    let excludes: Vec<glob::Pattern> = opts
        .exclude_patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(pat) => Some(pat),
            Err(e) => {
                warn!(pattern = %p, "ignoring invalid exclude pattern: {e}");
                None
            }
        })
        .collect();
    let mirror_canon = std::fs::canonicalize(&opts.mirror_root).ok();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if excludes.iter().any(|p| p.matches(&name)) {
                return false;
            }
            !(entry.file_type().is_dir() && is_mirror_dir(entry.path(), opts, &mirror_canon))
        });

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => match relative_key(root, entry.path()) {
                Some(rel) => scan.files.push((rel, entry.into_path())),
                None => {
                    warn!(path = %entry.path().display(), "file name is not valid UTF-8, skipping");
                    scan.failures.push(FileFailure::new(
                        entry.path(),
                        FailureStage::Walk,
                        "file name is not valid UTF-8",
                    ));
                }
            },
            Ok(_) => {}
            Err(e) => {
                let path = e.path().unwrap_or(root.as_path()).to_path_buf();
                warn!(path = %path.display(), error = %e, "cannot walk source entry, skipping");
                scan.unreadable
                    .push(relative_key(root, &path).unwrap_or_default());
                scan.failures
                    .push(FileFailure::new(&path, FailureStage::Walk, e));
            }
        }
    }

    scan
}

fn is_mirror_dir(path: &Path, opts: &SyncOptions, mirror_canon: &Option<PathBuf>) -> bool {
    if path == opts.mirror_root {
        return true;
    }
    match mirror_canon {
        Some(canon) => std::fs::canonicalize(path).map_or(false, |p| &p == canon),
        None => false,
    }
}

fn encrypt_one(
    opts: &SyncOptions,
    passphrase: &SecretString,
    rel: &str,
    path: &Path,
) -> Result<String, FileFailure> {
    let mut plaintext =
        std::fs::read(path).map_err(|e| FileFailure::new(path, FailureStage::Read, e))?;

    let sealed = seal(&plaintext, passphrase, opts.iterations);
    plaintext.zeroize();
    let bytes = sealed
        .and_then(|envelope| envelope.to_bytes())
        .map_err(|e| FileFailure::new(path, FailureStage::Encrypt, e))?;

    let dest = mirror_path_for(&opts.mirror_root, rel);
    write_atomic(&dest, &bytes).map_err(|e| FileFailure::new(&dest, FailureStage::Write, e))?;

    debug!(path = %rel, dest = %dest.display(), "encrypted");
    Ok(rel.to_string())
}

/// Write via a sibling temp file + rename so readers never see a half-written envelope.
pub(crate) fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path_for(dest);
    if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, dest)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(TEMP_SUFFIX);
    dest.with_file_name(name)
}

fn is_protected(src_rel: &str, unreadable: &[String]) -> bool {
    unreadable.iter().any(|p| {
        p.is_empty() || src_rel == p || src_rel.starts_with(&format!("{p}/"))
    })
}

/// Delete envelopes (and leftover temp files) with no matching source file.
fn prune_mirror(
    opts: &SyncOptions,
    expected: &HashSet<&str>,
    unreadable: &[String],
    report: &mut SyncReport,
) {
    let root = &opts.mirror_root;
    if !root.exists() {
        return;
    }

    let mut stale = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().unwrap_or(root.as_path()).to_path_buf();
                warn!(path = %path.display(), error = %e, "cannot walk mirror entry");
                report
                    .failures
                    .push(FileFailure::new(&path, FailureStage::Prune, e));
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let Some(rel) = relative_key(root, entry.path()) else {
            continue;
        };

        let is_stale = if rel.ends_with(TEMP_SUFFIX) {
            true
        } else {
            match source_rel_for(&rel) {
                Some(src) => !expected.contains(src) && !is_protected(src, unreadable),
                None => false,
            }
        };
        if is_stale {
            stale.push((rel, entry.into_path()));
        }
    }

    for (rel, path) in stale {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %rel, "pruned stale envelope");
                remove_empty_parents(&path, root);
                report.pruned.push(rel);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to prune stale envelope");
                report
                    .failures
                    .push(FileFailure::new(&path, FailureStage::Prune, e));
            }
        }
    }
    report.pruned.sort();
}

fn remove_empty_parents(path: &Path, root: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) || std::fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_for() {
        let tmp = temp_path_for(Path::new("encrypted/a/b.txt.json"));
        assert_eq!(tmp, PathBuf::from("encrypted/a/b.txt.json.sealtree-tmp"));
    }

    #[test]
    fn test_is_protected() {
        let unreadable = vec!["locked".to_string()];
        assert!(is_protected("locked", &unreadable));
        assert!(is_protected("locked/inner.txt", &unreadable));
        assert!(!is_protected("lockedness.txt", &unreadable));
        assert!(!is_protected("other.txt", &unreadable));
        assert!(is_protected("anything", &[String::new()]));
    }

    #[test]
    fn test_collect_skips_excluded_and_nested_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw");
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::create_dir_all(source.join("encrypted")).unwrap();
        std::fs::write(source.join("a.txt"), b"a").unwrap();
        std::fs::write(source.join("a.txt.swp"), b"swap").unwrap();
        std::fs::write(source.join("sub/b.txt"), b"b").unwrap();
        std::fs::write(source.join("encrypted/a.txt.json"), b"{}").unwrap();

        let mut opts = SyncOptions::new(&source, source.join("encrypted"));
        opts.exclude_patterns = vec!["*.swp".into()];

        let scan = collect_sources(&opts);
        let rels: Vec<&str> = scan.files.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(rels, vec!["a.txt", "sub/b.txt"]);
        assert!(scan.failures.is_empty());
    }

    #[test]
    fn test_collect_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let opts = SyncOptions::new(dir.path().join("nope"), dir.path().join("enc"));
        let scan = collect_sources(&opts);
        assert!(scan.files.is_empty());
        assert!(scan.failures.is_empty());
    }

    #[test]
    fn test_write_atomic_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("deep/nested/x.json");
        write_atomic(&dest, b"payload").unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert!(!temp_path_for(&dest).exists());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = SyncOptions::new(dir.path().join("raw"), dir.path().join("enc"));
        opts.iterations = 0;
        let result = sync_tree(&opts, &SecretString::from("x"));
        assert!(matches!(result, Err(SealError::Config(_))));
    }

    #[test]
    fn test_iterations_above_ceiling_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = SyncOptions::new(dir.path().join("raw"), dir.path().join("enc"));
        opts.iterations = u32::MAX;
        let result = sync_tree(&opts, &SecretString::from("x"));
        assert!(matches!(result, Err(SealError::Config(_))));
        assert!(!dir.path().join("enc").exists());
    }

    #[test]
    fn test_file_removed_after_scan_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw");
        std::fs::create_dir_all(&source).unwrap();
        for name in ["a", "b", "c"] {
            std::fs::write(source.join(name), name.as_bytes()).unwrap();
        }
        let mut opts = SyncOptions::new(&source, dir.path().join("enc"));
        opts.iterations = 1_000;

        let scan = collect_sources(&opts);
        assert_eq!(scan.files.len(), 3);
        std::fs::remove_file(source.join("b")).unwrap();

        let report = seal_scan(&opts, &SecretString::from("s3cret"), scan).unwrap();

        assert_eq!(report.encrypted, vec!["a", "c"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Read);
        assert_eq!(report.failures[0].path, source.join("b"));
        assert!(opts.mirror_root.join("a.json").exists());
        assert!(opts.mirror_root.join("c.json").exists());
        assert!(!opts.mirror_root.join("b.json").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_reports_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("ok.txt"), b"ok").unwrap();
        let bad = source.join(OsStr::from_bytes(b"key\xff"));
        if std::fs::write(&bad, b"bad").is_err() {
            // Filesystems that enforce UTF-8 names cannot hold the fixture.
            return;
        }

        let scan = collect_sources(&SyncOptions::new(&source, dir.path().join("enc")));
        let rels: Vec<&str> = scan.files.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(rels, vec!["ok.txt"]);
        assert_eq!(scan.failures.len(), 1);
        assert_eq!(scan.failures[0].stage, FailureStage::Walk);
        assert_eq!(scan.failures[0].path, bad);
    }
}
