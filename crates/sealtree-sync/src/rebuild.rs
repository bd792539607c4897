//! Rebuild trigger: serialized synchronization passes for the daemon
//!
//! Every pass, whether the startup pass or a watch-triggered one, goes
//! through [`Rebuilder`]. Passes are serialized by a lock; a request that
//! arrives while a pass is running waits for it and then runs its own.

use secrecy::SecretString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use sealtree_core::config::SealtreeConfig;
use sealtree_core::{SealError, SealResult};

use crate::engine::{sync_tree, SyncOptions, SyncReport};

/// Shared handle for running synchronization passes one at a time.
#[derive(Clone)]
pub struct Rebuilder {
    opts: Arc<SyncOptions>,
    lock: Arc<Mutex<()>>,
    passes: Arc<AtomicU64>,
}

impl Rebuilder {
    pub fn new(opts: SyncOptions) -> Self {
        Self {
            opts: Arc::new(opts),
            lock: Arc::new(Mutex::new(())),
            passes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.opts
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Run `f` on the blocking pool while holding the pass lock.
    pub async fn run_exclusive<F, R>(&self, f: F) -> SealResult<R>
    where
        F: FnOnce(&SyncOptions) -> R + Send + 'static,
        R: Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let opts = self.opts.clone();
        tokio::task::spawn_blocking(move || f(opts.as_ref()))
            .await
            .map_err(|e| SealError::Other(anyhow::anyhow!("sync task failed: {e}")))
    }

    /// Run one full synchronization pass.
    pub async fn rebuild(&self, passphrase: &SecretString, reason: &str) -> SealResult<SyncReport> {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(pass, reason, "rebuild starting");

        let passphrase = passphrase.clone();
        let report = self
            .run_exclusive(move |opts| sync_tree(opts, &passphrase))
            .await??;

        if report.is_success() {
            info!(
                pass,
                encrypted = report.encrypted.len(),
                pruned = report.pruned.len(),
                "rebuild finished"
            );
        } else {
            warn!(
                pass,
                failed = report.failures.len(),
                "rebuild finished with failures"
            );
        }
        Ok(report)
    }

    /// The pass run once at startup.
    ///
    /// With no passphrase the pass is skipped: a warning when the passphrase
    /// is optional, a `Config` error when it is required.
    pub async fn startup_pass(
        &self,
        config: &SealtreeConfig,
        passphrase: Option<&SecretString>,
    ) -> SealResult<Option<SyncReport>> {
        match passphrase {
            Some(pass) => self.rebuild(pass, "startup").await.map(Some),
            None if config.crypto.require_passphrase => {
                error!(
                    env = %config.crypto.passphrase_env,
                    "passphrase not set, refusing to start"
                );
                Err(SealError::Config(format!(
                    "{} is not set",
                    config.crypto.passphrase_env
                )))
            }
            None => {
                warn!(
                    env = %config.crypto.passphrase_env,
                    "passphrase not set, skipping encryption"
                );
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for Rebuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rebuilder")
            .field("opts", &self.opts)
            .field("passes", &self.passes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn setup() -> (tempfile::TempDir, Rebuilder) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("raw")).unwrap();
        std::fs::write(dir.path().join("raw/a.txt"), b"alpha").unwrap();
        let mut opts = SyncOptions::new(dir.path().join("raw"), dir.path().join("encrypted"));
        opts.iterations = 1_000;
        (dir, Rebuilder::new(opts))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exclusive_runs_never_overlap() {
        let (_dir, rebuilder) = setup();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let rb = rebuilder.clone();
            let (inf, max) = (in_flight.clone(), max_seen.clone());
            handles.push(tokio::spawn(async move {
                rb.run_exclusive(move |_| {
                    let now = inf.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    inf.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rebuild_encrypts_tree() {
        let (dir, rebuilder) = setup();
        let report = rebuilder
            .rebuild(&SecretString::from("s3cret"), "test")
            .await
            .unwrap();

        assert_eq!(report.encrypted, vec!["a.txt"]);
        assert!(dir.path().join("encrypted/a.txt.json").exists());
        assert_eq!(rebuilder.passes(), 1);
    }

    #[tokio::test]
    async fn test_startup_pass_without_passphrase_warns() {
        let (dir, rebuilder) = setup();
        let config = SealtreeConfig::default();

        let report = rebuilder.startup_pass(&config, None).await.unwrap();
        assert!(report.is_none());
        assert!(!dir.path().join("encrypted").exists());
        assert_eq!(rebuilder.passes(), 0);
    }

    #[tokio::test]
    async fn test_startup_pass_without_required_passphrase_fails() {
        let (_dir, rebuilder) = setup();
        let mut config = SealtreeConfig::default();
        config.crypto.require_passphrase = true;

        let result = rebuilder.startup_pass(&config, None).await;
        assert!(matches!(result, Err(SealError::Config(_))));
    }

    #[tokio::test]
    async fn test_startup_pass_with_passphrase_runs() {
        let (_dir, rebuilder) = setup();
        let config = SealtreeConfig::default();
        let pass = SecretString::from("s3cret");

        let report = rebuilder.startup_pass(&config, Some(&pass)).await.unwrap();
        assert_eq!(report.map(|r| r.encrypted.len()), Some(1));
    }
}
