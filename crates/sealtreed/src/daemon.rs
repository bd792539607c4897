//! Daemon lifecycle: startup pass, watcher, debounced rebuilds, systemd notify

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sealtree_core::config::SealtreeConfig;
use sealtree_sync::{debounce_loop, watch_root, ChangeWatcher, Rebuilder, SyncOptions, WatchFilter};

pub async fn run(config: SealtreeConfig) -> Result<()> {
    info!("daemon starting");

    let rebuilder = Rebuilder::new(SyncOptions::from_config(&config));

    let passphrase = config.crypto.passphrase();
    rebuilder.startup_pass(&config, passphrase.as_ref()).await?;

    let Some(passphrase) = passphrase else {
        warn!("no passphrase: nothing to keep encrypted, exiting");
        return Ok(());
    };

    let root = watch_root(&config);
    // Absolute root so event paths compare against the absolute mirror path.
    let root = std::fs::canonicalize(&root)
        .with_context(|| format!("resolving watch root {}", root.display()))?;
    let filter = mirror_filter(&rebuilder.options().mirror_root, &config.watch.ignore)?;
    let (watcher, rx) = ChangeWatcher::start(&root, filter)?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone())?;

    notify_ready();

    let window = Duration::from_millis(config.watch.debounce_ms);
    info!(
        root = %watcher.root().display(),
        scope = ?config.watch.scope,
        debounce_ms = config.watch.debounce_ms,
        "watch loop running"
    );

    let rb = rebuilder.clone();
    let passes = debounce_loop(rx, window, cancel, move |changes| {
        on_changes(rb.clone(), passphrase.clone(), changes)
    })
    .await;

    drop(watcher);
    info!(passes, total_passes = rebuilder.passes(), "daemon stopped");
    Ok(())
}

/// Create the mirror root if needed and build a filter on its canonical path.
///
/// Event paths are canonical; a mirror spelled with `..` or not yet created
/// would otherwise never match them and every pass would trigger the next.
fn mirror_filter(mirror_root: &Path, ignore: &[String]) -> Result<WatchFilter> {
    std::fs::create_dir_all(mirror_root)
        .with_context(|| format!("creating mirror root {}", mirror_root.display()))?;
    let mirror = std::fs::canonicalize(mirror_root)
        .with_context(|| format!("resolving mirror root {}", mirror_root.display()))?;
    Ok(WatchFilter::new(&mirror, ignore))
}

async fn on_changes(rebuilder: Rebuilder, passphrase: SecretString, changes: Vec<PathBuf>) {
    let unique: BTreeSet<PathBuf> = changes.into_iter().collect();
    debug!(changed = unique.len(), first = ?unique.iter().next(), "changes detected");

    if let Err(e) = rebuilder.rebuild(&passphrase, "watch").await {
        error!(error = %e, "rebuild failed");
    }
}

/// Cancel `token` on the first SIGTERM or SIGINT.
fn spawn_shutdown_listener(token: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
        }
        token.cancel();
    });
    Ok(())
}

fn notify_ready() {
    // sd_notify(READY=1); no-op unless started by systemd with Type=notify
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
