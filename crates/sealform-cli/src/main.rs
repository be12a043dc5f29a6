//! sealform: developer CLI for the envelope subsystem
//!
//! Commands:
//!   derive                              - derive credentials, print iteration count and synthetic credential
//!   keygen --out <keypair.json>         - generate an ML-KEM-1024 keypair wrapped under the master secret
//!   fingerprint <keypair.json>          - print the public key fingerprint
//!   seal-response <keypair.json>        - seal a response to the keypair's public key
//!   open-response <keypair.json> <response.json>...
//!                                       - open stored responses with the unwrapped private key
//!   config show                         - display current configuration

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sealform_core::SealformConfig;
use sealform_crypto::{
    derive_credentials, fingerprint_text, open_responses, Checked, CredentialParams, Credentials,
    Iterations, StoredKeypair, StoredResponse, StretchParams, Unpadded,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealform",
    version,
    about = "sealform envelope tool",
    long_about = "sealform: derive credentials, manage keypairs, and seal or open form responses"
)]
struct Cli {
    /// Path to sealform.toml configuration file
    #[arg(long, short = 'c', env = "SEALFORM_CONFIG", default_value = "sealform.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Identity {
    /// Account email
    #[arg(long, short = 'e', env = "SEALFORM_EMAIL")]
    email: String,

    /// Account password (prompted when absent)
    #[arg(long, env = "SEALFORM_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive credentials and print the iteration count and synthetic credential
    Derive {
        #[command(flatten)]
        identity: Identity,
    },

    /// Generate an ML-KEM-1024 keypair with its private key wrapped
    ///
    /// Replacing an existing keypair makes every response sealed to the old
    /// public key unreadable.
    Keygen {
        #[command(flatten)]
        identity: Identity,
        /// Where to write the stored keypair (JSON)
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// Overwrite an existing keypair file
        #[arg(long)]
        force: bool,
    },

    /// Print a public key fingerprint for out-of-band comparison
    Fingerprint {
        /// Stored keypair file (JSON)
        #[arg(required_unless_present = "text")]
        keypair: Option<PathBuf>,
        /// Public key in its base64 text form instead of a keypair file
        #[arg(long, conflicts_with = "keypair")]
        text: Option<String>,
    },

    /// Seal a response to the public key in a stored keypair
    #[command(name = "seal-response")]
    SealResponse {
        /// Stored keypair file (JSON); only the public key is read
        keypair: PathBuf,
        /// Response text
        #[arg(long, short = 't')]
        text: String,
        /// Where to write the stored response (JSON)
        #[arg(long, short = 'o')]
        out: PathBuf,
    },

    /// Open stored responses with the author's private key
    #[command(name = "open-response")]
    OpenResponse {
        #[command(flatten)]
        identity: Identity,
        /// Stored keypair file (JSON)
        keypair: PathBuf,
        /// Stored response files (JSON)
        #[arg(required = true)]
        responses: Vec<PathBuf>,
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
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SealformConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    init_logging(&config.log.level, &config.log.format);

    match cli.command {
        Commands::Derive { identity } => cmd_derive(&config, identity).await,
        Commands::Keygen { identity, out, force } => cmd_keygen(&config, identity, &out, force).await,
        Commands::Fingerprint { keypair, text } => {
            cmd_fingerprint(keypair.as_deref(), text.as_deref()).await
        }
        Commands::SealResponse { keypair, text, out } => {
            cmd_seal_response(&config, &keypair, text, &out).await
        }
        Commands::OpenResponse { identity, keypair, responses } => {
            cmd_open_response(&config, identity, &keypair, &responses).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Resolve the password (flag/env, else prompt) and run the derivation off
/// the async runtime.
async fn sign_in(config: &SealformConfig, identity: Identity) -> Result<Credentials> {
    let password = match identity.password {
        Some(password) => SecretString::from(password),
        None => SecretString::from(
            rpassword::prompt_password("Password: ").context("reading password")?,
        ),
    };
    let params = CredentialParams::from(&config.envelope);
    let email = identity.email;

    let spinner = make_spinner("derive");
    spinner.set_message("running Argon2id");
    let result = tokio::task::spawn_blocking(move || derive_credentials(&email, &password, &params))
        .await
        .context("derivation task failed")?;
    spinner.finish_and_clear();

    let creds = result.context("deriving credentials")?;
    tracing::debug!(iterations = %creds.iterations, "signed in");
    Ok(creds)
}

async fn read_keypair(path: &Path) -> Result<StoredKeypair> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading keypair: {}", path.display()))?;
    StoredKeypair::from_bytes(&bytes).with_context(|| format!("parsing keypair: {}", path.display()))
}

async fn read_response(path: &Path) -> Result<StoredResponse> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading response: {}", path.display()))?;
    StoredResponse::from_bytes(&bytes).with_context(|| format!("parsing response: {}", path.display()))
}

fn response_params(config: &SealformConfig) -> Result<(Iterations, StretchParams)> {
    let iterations = Iterations::new(config.envelope.response_iterations)
        .context("invalid response_iterations")?;
    Ok((iterations, StretchParams::from(&config.envelope)))
}

// ── `sealform derive` ─────────────────────────────────────────────────────────

async fn cmd_derive(config: &SealformConfig, identity: Identity) -> Result<()> {
    let creds = sign_in(config, identity).await?;
    let session = creds.session().with_config(&config.envelope);

    println!("iterations:      {}", creds.iterations);
    println!("wrap iterations: {}", session.wrap_iterations());
    println!("credential:      {}", creds.synthetic_credential);
    Ok(())
}

// ── `sealform keygen` ─────────────────────────────────────────────────────────

async fn cmd_keygen(config: &SealformConfig, identity: Identity, out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it (responses sealed to the old key become unreadable)",
            out.display()
        );
    }

    let session = sign_in(config, identity).await?.session().with_config(&config.envelope);

    let spinner = make_spinner("keygen");
    spinner.set_message("generating and wrapping ML-KEM-1024 keypair");
    let result = tokio::task::spawn_blocking(move || StoredKeypair::generate(&session))
        .await
        .context("keygen task failed")?;
    spinner.finish_and_clear();

    let stored = result.context("generating keypair")?;
    tokio::fs::write(out, stored.to_bytes()?)
        .await
        .with_context(|| format!("writing keypair: {}", out.display()))?;

    tracing::info!(path = %out.display(), "wrote keypair");
    println!("keypair:     {}", out.display());
    println!("fingerprint: {}", stored.fingerprint()?);
    Ok(())
}

// ── `sealform fingerprint` ────────────────────────────────────────────────────

async fn cmd_fingerprint(keypair: Option<&Path>, text: Option<&str>) -> Result<()> {
    let fingerprint = match (keypair, text) {
        (_, Some(text)) => fingerprint_text(text),
        (Some(path), None) => read_keypair(path).await?.fingerprint()?,
        (None, None) => anyhow::bail!("pass a keypair file or --text"),
    };
    println!("{fingerprint}");
    Ok(())
}

// ── `sealform seal-response` ──────────────────────────────────────────────────

async fn cmd_seal_response(config: &SealformConfig, keypair: &Path, text: String, out: &Path) -> Result<()> {
    let public_key = read_keypair(keypair).await?.public_key_bytes()?;
    let (iterations, stretch) = response_params(config)?;

    let stored = tokio::task::spawn_blocking(move || {
        StoredResponse::seal(&public_key, &text, iterations, &stretch)
    })
    .await
    .context("seal task failed")?
    .context("sealing response")?;

    tokio::fs::write(out, stored.to_bytes()?)
        .await
        .with_context(|| format!("writing response: {}", out.display()))?;

    tracing::info!(path = %out.display(), "sealed response");
    println!("response: {}", out.display());
    Ok(())
}

// ── `sealform open-response` ──────────────────────────────────────────────────

async fn cmd_open_response(
    config: &SealformConfig,
    identity: Identity,
    keypair: &Path,
    paths: &[PathBuf],
) -> Result<()> {
    let keypair = read_keypair(keypair).await?;
    let mut responses = Vec::with_capacity(paths.len());
    for path in paths {
        responses.push(read_response(path).await?);
    }
    let (iterations, stretch) = response_params(config)?;

    let session = sign_in(config, identity).await?.session().with_config(&config.envelope);
    let private_key = match keypair.unwrap_private_key(&session)? {
        Checked::Verified(key) => key,
        Checked::IntegrityFailure => {
            anyhow::bail!("private key failed to unwrap: wrong password or tampered keypair")
        }
    };

    let spinner = make_spinner("open");
    spinner.set_message(format!("opening {} responses", responses.len()));
    let outcomes = tokio::task::spawn_blocking(move || {
        open_responses(&responses, &private_key, iterations, &stretch)
    })
    .await
    .context("open task failed")?;
    spinner.finish_and_clear();

    for (path, outcome) in paths.iter().zip(outcomes) {
        match outcome {
            Ok(Checked::Verified(Unpadded::Valid(text))) => {
                println!("{}: {text}", path.display())
            }
            Ok(Checked::Verified(Unpadded::Corrupt(partial))) => {
                println!("{}: [corrupt padding] {partial}", path.display())
            }
            Ok(Checked::IntegrityFailure) => println!("{}: [integrity failure]", path.display()),
            Err(e) => println!("{}: [error] {e}", path.display()),
        }
    }
    Ok(())
}

// ── `sealform config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SealformConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
