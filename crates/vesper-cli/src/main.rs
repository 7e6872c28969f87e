//! Vesper command-line host.
//!
//! Drives the host bridge the way a notification extension would, with
//! pickles stored as base64 text files.
//!
//! # Usage
//!
//! ```bash
//! # Create a linked session pair from an agreed secret
//! vesper pair --shared-hex <64 hex> --key-hex <64 hex> \
//!     --outbound-out alice.pickle --inbound-out bob.pickle
//!
//! # Encrypt on one side, persisting the advanced session
//! vesper encrypt --pickle alice.pickle --key-hex <64 hex> \
//!     --plaintext ping --repickle-out alice.pickle
//!
//! # Decrypt on the other side (`-` reads the pickle from stdin)
//! vesper decrypt --pickle bob.pickle --key-hex <64 hex> --ciphertext <base64>
//!
//! # Show non-secret session details
//! vesper inspect --pickle bob.pickle --key-hex <64 hex>
//! ```

use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vesper_bridge::{BridgeError, DecryptOutcome};
use vesper_crypto::{
    CryptoContext, KEY_SIZE, Pickle, PickleError, PickleKey, SessionConfig, SessionError,
    SystemEnv,
};
use zeroize::Zeroizing;

/// Pickled double-ratchet session tool
#[derive(Parser, Debug)]
#[command(name = "vesper")]
#[command(about = "Decrypt messages with pickled double-ratchet sessions")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Maximum skipped message keys kept per session
    #[arg(long, global = true, default_value_t = SessionConfig::DEFAULT_MAX_SKIPPED_KEYS)]
    max_skipped_keys: usize,

    /// Maximum keys skipped on one chain to reach a message
    #[arg(long, global = true, default_value_t = SessionConfig::DEFAULT_MAX_SKIP)]
    max_skip: u32,

    /// Maximum superseded remote ratchet keys remembered
    #[arg(long, global = true, default_value_t = SessionConfig::DEFAULT_MAX_RETIRED_CHAINS)]
    max_retired_chains: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an outbound and an inbound session from a shared secret
    Pair {
        /// Agreed 32-byte shared secret, hex encoded
        #[arg(long)]
        shared_hex: String,

        /// Pickle key, hex encoded (32 bytes)
        #[arg(long)]
        key_hex: String,

        /// Where to write the sending side's pickle
        #[arg(long)]
        outbound_out: PathBuf,

        /// Where to write the receiving side's pickle
        #[arg(long)]
        inbound_out: PathBuf,
    },

    /// Encrypt a message and persist the advanced session
    Encrypt {
        /// Pickle file, or `-` for stdin
        #[arg(long)]
        pickle: String,

        /// Pickle key, hex encoded (32 bytes)
        #[arg(long)]
        key_hex: String,

        /// Message text
        #[arg(long)]
        plaintext: String,

        /// Where to write the advanced session
        #[arg(long)]
        repickle_out: PathBuf,
    },

    /// Decrypt one message
    Decrypt {
        /// Pickle file, or `-` for stdin
        #[arg(long)]
        pickle: String,

        /// Pickle key, hex encoded (32 bytes)
        #[arg(long)]
        key_hex: String,

        /// Base64 ciphertext
        #[arg(long)]
        ciphertext: String,

        /// Write the advanced session here; without it the session is
        /// discarded
        #[arg(long)]
        repickle_out: Option<PathBuf>,
    },

    /// Print non-secret details of a pickled session
    Inspect {
        /// Pickle file, or `-` for stdin
        #[arg(long)]
        pickle: String,

        /// Pickle key, hex encoded (32 bytes)
        #[arg(long)]
        key_hex: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),

    #[error("--{flag} is not valid hex")]
    InvalidHex { flag: &'static str },

    #[error("--{flag} must be 32 bytes, got {actual}")]
    WrongLength { flag: &'static str, actual: usize },

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Pickle(#[from] PickleError),

    #[error("{0}")]
    Decrypt(String),
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let config = SessionConfig {
        max_skipped_keys: args.max_skipped_keys,
        max_skip: args.max_skip,
        max_retired_chains: args.max_retired_chains,
    };
    let ctx = CryptoContext::new(SystemEnv::new(), config);

    match run(&ctx, args.command, &mut io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            // Nothing more to report if stderr itself is gone
            let _ = writeln!(io::stderr(), "error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &CryptoContext, command: Command, out: &mut impl Write) -> Result<(), CliError> {
    match command {
        Command::Pair { shared_hex, key_hex, outbound_out, inbound_out } => {
            let shared = parse_hex_key("shared-hex", &shared_hex)?;
            let key = PickleKey::new(*parse_hex_key("key-hex", &key_hex)?);

            let inbound_secret = ctx.generate_ratchet_secret();
            let outbound = ctx.create_outbound_session(&shared, inbound_secret.public_key())?;
            let inbound = ctx.create_inbound_session(&shared, inbound_secret);

            write_pickle(&outbound_out, &ctx.pickle(&outbound, &key).to_base64())?;
            write_pickle(&inbound_out, &ctx.pickle(&inbound, &key).to_base64())?;

            tracing::info!(session_id = %outbound.session_id(), "created session pair");
            writeln!(out, "{}", outbound.session_id())?;
        }

        Command::Encrypt { pickle, key_hex, plaintext, repickle_out } => {
            let key = parse_hex_key("key-hex", &key_hex)?;
            let pickled = read_pickle(&pickle)?;

            let event = vesper_bridge::encrypt_event(ctx, &pickled, key.as_slice(), &plaintext)?;
            write_pickle(&repickle_out, &event.pickled_session)?;
            writeln!(out, "{}", event.ciphertext)?;
        }

        Command::Decrypt { pickle, key_hex, ciphertext, repickle_out } => {
            let key = parse_hex_key("key-hex", &key_hex)?;
            let pickled = read_pickle(&pickle)?;

            match repickle_out {
                Some(path) => {
                    let decrypted = vesper_bridge::decrypt_and_repickle(
                        ctx,
                        &pickled,
                        key.as_slice(),
                        &ciphertext,
                    )?;
                    write_pickle(&path, &decrypted.pickled_session)?;
                    writeln!(out, "{}", decrypted.plaintext.as_str())?;
                }
                None => {
                    let outcome =
                        vesper_bridge::decrypt_event(ctx, &pickled, key.as_slice(), &ciphertext);
                    let result = write_outcome(&outcome, out);
                    vesper_bridge::release_outcome(outcome);
                    result?;
                }
            }
        }

        Command::Inspect { pickle, key_hex } => {
            let key = PickleKey::new(*parse_hex_key("key-hex", &key_hex)?);
            let state = ctx.unpickle(&Pickle::from_base64(&read_pickle(&pickle)?)?, &key)?;

            writeln!(out, "session_id:         {}", state.session_id())?;
            writeln!(out, "local_ratchet_key:  {}", state.local_ratchet_key().to_base64())?;
            match state.remote_ratchet_key() {
                Some(remote) => writeln!(out, "remote_ratchet_key: {}", remote.to_base64())?,
                None => writeln!(out, "remote_ratchet_key: none")?,
            }
            writeln!(out, "has_received:       {}", state.has_received_message())?;
            writeln!(out, "sending_index:      {}", display_index(state.sending_index()))?;
            writeln!(out, "receiving_index:    {}", display_index(state.receiving_index()))?;
            writeln!(out, "skipped_keys:       {}", state.skipped_key_count())?;
        }
    }

    Ok(())
}

fn write_outcome(outcome: &DecryptOutcome, out: &mut impl Write) -> Result<(), CliError> {
    match outcome {
        DecryptOutcome::Plaintext(buffer) => {
            writeln!(out, "{}", buffer.as_str())?;
            Ok(())
        }
        DecryptOutcome::Error(buffer) => Err(CliError::Decrypt(buffer.as_str().to_owned())),
    }
}

fn display_index(index: Option<u32>) -> String {
    index.map_or_else(|| "inactive".to_owned(), |i| i.to_string())
}

fn parse_hex_key(flag: &'static str, text: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>, CliError> {
    let bytes =
        Zeroizing::new(hex::decode(text.trim()).map_err(|_| CliError::InvalidHex { flag })?);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    if bytes.len() != KEY_SIZE {
        return Err(CliError::WrongLength { flag, actual: bytes.len() });
    }
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn read_pickle(source: &str) -> Result<String, CliError> {
    let read_error = |source_err| CliError::Read { path: source.to_owned(), source: source_err };

    if source == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text).map_err(read_error)?;
        return Ok(text);
    }

    fs::read_to_string(source).map_err(read_error)
}

fn write_pickle(path: &Path, pickled: &str) -> Result<(), CliError> {
    fs::write(path, pickled).map_err(|source| CliError::Write { path: path.to_owned(), source })?;
    tracing::debug!(path = %path.display(), "wrote pickle");
    Ok(())
}
