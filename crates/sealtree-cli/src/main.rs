//! sealtree: encrypted mirror CLI
//!
//! Commands:
//!   sync                      - one pass: encrypt the source tree into the mirror
//!   decrypt <file-id>         - decrypt one envelope to stdout or a file
//!   refresh --items <file> .. - refresh secrets from an item document
//!   config show               - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info, warn};

use sealtree_core::config::{expand_tilde, SealtreeConfig};
use sealtree_core::SealError;
use sealtree_crypto::DecryptClient;
use sealtree_sync::{
    refresh_all, sync_tree, JsonFileSource, RefreshOutcome, RefreshTarget, SyncOptions,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealtree",
    version,
    about = "Encrypted secret mirror",
    long_about = "sealtree: mirror plaintext secrets into passphrase-encrypted envelopes and read them back"
)]
struct Cli {
    /// Path to sealtree.toml configuration file
    #[arg(long, short = 'c', env = "SEALTREE_CONFIG", default_value = "sealtree.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log].level
    #[arg(long, env = "SEALTREE_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides [log].format
    #[arg(long, env = "SEALTREE_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt every file of the source tree into the mirror tree
    ///
    /// The passphrase is read from the environment variable named by
    /// crypto.passphrase_env (SEALTREE_PASSPHRASE by default).
    Sync {
        /// Plaintext root (overrides paths.source)
        #[arg(long)]
        source: Option<PathBuf>,
        /// Envelope root (overrides paths.mirror)
        #[arg(long)]
        mirror: Option<PathBuf>,
        /// PBKDF2 iterations for new envelopes (overrides crypto.iterations and SEALTREE_ITERATIONS)
        #[arg(long)]
        iterations: Option<u32>,
        /// Delete envelopes whose source file no longer exists (also: SEALTREE_PRUNE=1)
        #[arg(long)]
        prune: bool,
        /// Worker threads (0 = cpu count; overrides sync.workers)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Decrypt a single envelope by file identifier (e.g. team/alice.txt)
    Decrypt {
        file_id: String,
        /// Envelope root (overrides paths.mirror)
        #[arg(long)]
        mirror: Option<PathBuf>,
        /// Write plaintext here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Refresh secrets from a JSON item document
    ///
    /// The document maps source ids to item lists. Each target is written as
    /// SOURCE_ID=FILE_ID and is only re-sealed when its items changed.
    Refresh {
        /// JSON document of the form {"<source id>": [items]}
        #[arg(long)]
        items: PathBuf,
        /// SOURCE_ID=FILE_ID pairs
        #[arg(required = true, value_parser = parse_target)]
        targets: Vec<RefreshTarget>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    init_logging(&cli, &config);

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    }
}

async fn run(cli: Cli, config: SealtreeConfig) -> Result<ExitCode> {
    match cli.command {
        Commands::Sync {
            source,
            mirror,
            iterations,
            prune,
            workers,
        } => {
            let mut opts = SyncOptions::from_config(&config);
            if let Some(s) = source {
                opts.source_root = s;
            }
            if let Some(m) = mirror {
                opts.mirror_root = m;
            }
            if let Some(i) = iterations {
                opts.iterations = i;
            }
            if let Some(w) = workers {
                opts.workers = w;
            }
            opts.prune |= prune;
            cmd_sync(&config, opts).await
        }
        Commands::Decrypt {
            file_id,
            mirror,
            out,
        } => {
            let mirror = mirror.unwrap_or_else(|| expand_tilde(&config.paths.mirror));
            cmd_decrypt(&config, &mirror, &file_id, out.as_deref()).await
        }
        Commands::Refresh { items, targets } => cmd_refresh(&config, &items, targets).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

/// Configuration problems exit with 2, everything else with 1.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<SealError>() {
        Some(SealError::Config(_)) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

/// Config file, then `SEALTREE_ITERATIONS` / `SEALTREE_PRUNE` from the environment.
fn load_config(path: &Path) -> Result<SealtreeConfig, SealError> {
    let mut config = SealtreeConfig::load(path)?;
    config.apply_env()?;
    Ok(config)
}

fn init_logging(cli: &Cli, config: &SealtreeConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Passphrase ────────────────────────────────────────────────────────────────

/// Passphrase from the configured env var, or an interactive prompt.
fn passphrase_or_prompt(config: &SealtreeConfig) -> Result<SecretString> {
    if let Some(p) = config.crypto.passphrase() {
        return Ok(p);
    }
    let entered = rpassword::prompt_password("Passphrase: ").context("reading passphrase")?;
    if entered.is_empty() {
        return Err(SealError::Config("empty passphrase".into()).into());
    }
    Ok(SecretString::from(entered))
}

// ── `sealtree sync` ───────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

async fn cmd_sync(config: &SealtreeConfig, opts: SyncOptions) -> Result<ExitCode> {
    let passphrase = config.crypto.passphrase().ok_or_else(|| {
        SealError::Config(format!(
            "no passphrase: set {} to encrypt",
            config.crypto.passphrase_env
        ))
    })?;

    println!(
        "Syncing {} → {}",
        opts.source_root.display(),
        opts.mirror_root.display()
    );

    let pb = make_spinner("sync");
    pb.set_message("encrypting...");

    let report = tokio::task::spawn_blocking(move || sync_tree(&opts, &passphrase))
        .await
        .context("sync task panicked")??;

    pb.finish_and_clear();
    println!("Sync complete:");
    println!("  encrypted: {} files", report.encrypted.len());
    println!("  pruned:    {} envelopes", report.pruned.len());
    println!("  failed:    {}", report.failures.len());
    println!("  elapsed:   {:.2}s", report.elapsed.as_secs_f64());

    if report.is_success() {
        return Ok(ExitCode::SUCCESS);
    }
    for f in &report.failures {
        eprintln!("  [{}] {}: {}", f.stage, f.path.display(), f.error);
    }
    Ok(ExitCode::FAILURE)
}

// ── `sealtree decrypt` ────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &SealtreeConfig,
    mirror: &Path,
    file_id: &str,
    out: Option<&Path>,
) -> Result<ExitCode> {
    let client = DecryptClient::new(mirror);
    let passphrase = passphrase_or_prompt(config)?;
    debug!(file_id, mirror = %client.mirror_root().display(), "opening envelope");

    let plaintext = match client.open_async(file_id, &passphrase).await {
        Ok(p) => p,
        Err(e) if e.is_decryption_failure() => {
            anyhow::bail!("invalid passphrase or corrupted envelope")
        }
        Err(e) => return Err(e.into()),
    };

    match out {
        Some(path) => {
            std::fs::write(path, &plaintext)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(file_id, out = %path.display(), bytes = plaintext.len(), "decrypted");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&plaintext).context("writing to stdout")?;
            stdout.flush().context("writing to stdout")?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ── `sealtree refresh` ────────────────────────────────────────────────────────

fn parse_target(s: &str) -> std::result::Result<RefreshTarget, String> {
    match s.split_once('=') {
        Some((source, file)) if !source.is_empty() && !file.is_empty() => {
            Ok(RefreshTarget::new(source, file))
        }
        _ => Err(format!("expected SOURCE_ID=FILE_ID, got {s:?}")),
    }
}

async fn cmd_refresh(
    config: &SealtreeConfig,
    items: &Path,
    targets: Vec<RefreshTarget>,
) -> Result<ExitCode> {
    let opts = SyncOptions::from_config(config);
    let passphrase = passphrase_or_prompt(config)?;
    let source = JsonFileSource::new(items);

    let results = tokio::task::spawn_blocking(move || {
        refresh_all(&opts, &targets, &source, &passphrase)
    })
    .await
    .context("refresh task panicked")?;

    let mut failed = 0usize;
    for (target, result) in &results {
        match result {
            Ok(outcome) => {
                let label = match outcome {
                    RefreshOutcome::Unchanged => "unchanged",
                    RefreshOutcome::Updated => "updated",
                    RefreshOutcome::Created => "created",
                };
                println!("  {:<10} {} ({})", label, target.file_id, target.source_id);
            }
            Err(e) => {
                failed += 1;
                println!("  {:<10} {} ({}): {e}", "failed", target.file_id, target.source_id);
            }
        }
    }

    if failed > 0 {
        warn!(failed, total = results.len(), "some secrets were not refreshed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

// ── `sealtree config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SealtreeConfig, config_path: &Path) -> Result<ExitCode> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_overrides() {
        let cli = Cli::try_parse_from([
            "sealtree",
            "-c",
            "custom.toml",
            "sync",
            "--source",
            "plain",
            "--iterations",
            "1000",
            "--prune",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        match cli.command {
            Commands::Sync {
                source,
                iterations,
                prune,
                mirror,
                ..
            } => {
                assert_eq!(source, Some(PathBuf::from("plain")));
                assert_eq!(iterations, Some(1000));
                assert!(prune);
                assert!(mirror.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_refresh_targets() {
        let cli = Cli::try_parse_from([
            "sealtree",
            "refresh",
            "--items",
            "items.json",
            "PL1=playlist.json",
            "PL2=team/other.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Refresh { targets, .. } => {
                assert_eq!(targets[0], RefreshTarget::new("PL1", "playlist.json"));
                assert_eq!(targets[1].file_id, "team/other.json");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_target_rejects_bad_pairs() {
        assert!(parse_target("no-equals").is_err());
        assert!(parse_target("=file").is_err());
        assert!(parse_target("src=").is_err());
    }

    /// Seal `files` under `dir/raw` into `dir/encrypted`; passphrase read from `env`.
    fn sealed_mirror(dir: &Path, env: &str, files: &[(&str, &[u8])]) -> SealtreeConfig {
        let mut config = SealtreeConfig::default();
        config.paths.source = dir.join("raw");
        config.paths.mirror = dir.join("encrypted");
        config.crypto.iterations = 1_000;
        config.crypto.passphrase_env = env.into();
        std::env::set_var(env, "s3cret");

        for (rel, content) in files {
            let path = dir.join("raw").join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let opts = SyncOptions::from_config(&config);
        let report = sync_tree(&opts, &config.crypto.passphrase().unwrap()).unwrap();
        assert!(report.is_success());
        config
    }

    #[tokio::test]
    async fn test_decrypt_writes_out_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = sealed_mirror(
            dir.path(),
            "SEALTREE_CLI_TEST_DECRYPT_OUT",
            &[("team/alice.txt", b"hello")],
        );
        let out = dir.path().join("alice.out");

        let code = cmd_decrypt(
            &config,
            &dir.path().join("encrypted"),
            "team/alice.txt",
            Some(out.as_path()),
        )
        .await
            .unwrap();

        assert_eq!(code, ExitCode::SUCCESS);
        assert_eq!(std::fs::read(&out).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_decrypt_with_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sealed_mirror(
            dir.path(),
            "SEALTREE_CLI_TEST_DECRYPT_SEAL",
            &[("alice.txt", b"hello")],
        );
        config.crypto.passphrase_env = "SEALTREE_CLI_TEST_DECRYPT_WRONG".into();
        std::env::set_var("SEALTREE_CLI_TEST_DECRYPT_WRONG", "not-it");
        let out = dir.path().join("alice.out");

        let err = cmd_decrypt(
            &config,
            &dir.path().join("encrypted"),
            "alice.txt",
            Some(out.as_path()),
        )
        .await
            .unwrap_err();

        assert!(err.to_string().contains("invalid passphrase"), "{err:#}");
        assert_eq!(exit_code_for(&err), ExitCode::FAILURE);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_sync_with_overlapping_override_exits_with_2() {
        let dir = tempfile::tempdir().unwrap();
        let config = sealed_mirror(dir.path(), "SEALTREE_CLI_TEST_SYNC_OVERLAP", &[("a", b"1")]);
        let mut opts = SyncOptions::from_config(&config);
        opts.mirror_root = dir.path().join("./raw");
        opts.prune = true;

        let err = cmd_sync(&config, opts).await.unwrap_err();

        assert_eq!(exit_code_for(&err), ExitCode::from(2));
        assert_eq!(std::fs::read(dir.path().join("raw/a")).unwrap(), b"1");
    }

    #[test]
    fn test_config_errors_exit_with_2() {
        let err: anyhow::Error = SealError::Config("missing".into()).into();
        assert_eq!(exit_code_for(&err), ExitCode::from(2));

        let err = anyhow::Error::from(SealError::DecryptionFailed).context("decrypting");
        assert_eq!(exit_code_for(&err), ExitCode::FAILURE);
    }
}
