//! tok-check - vocabulary round-trip checker
//!
//! Exit status: 0 when every id round-trips, 1 on a usage or load error,
//! 2 on the first non-exempt round-trip mismatch.

use attncheck::error::Error;
use attncheck::tokenizer::{Vocab, VocabTokenizer, VocabType, check_roundtrip, probe_codepoints};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Check that every vocabulary id survives detokenize -> tokenize
#[derive(Parser)]
#[command(name = "tok-check")]
#[command(version, about, long_about = None)]
struct Cli {
    /// GGUF file holding the vocabulary
    #[arg(value_name = "VOCAB_FILE")]
    vocab_file: PathBuf,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging();

    let path = &cli.vocab_file;
    tracing::info!("reading vocab from: '{}'", path.display());
    let vocab = match Vocab::load(path) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("failed to load vocab '{}': {e}", path.display());
            return ExitCode::from(1);
        }
    };

    let vocab_type = VocabType::from_n_vocab(vocab.n_vocab());
    tracing::info!(n_vocab = vocab.n_vocab(), %vocab_type, kind = ?vocab.kind(), "loaded vocab");

    match check_roundtrip(&vocab, vocab_type) {
        Ok(report) => tracing::info!(
            checked = report.checked,
            exempted = report.exempted.len(),
            "round trip ok"
        ),
        Err(Error::RoundTrip { id, piece, got }) => {
            match got.as_slice() {
                &[other] => tracing::error!(
                    "token {id} is string {piece:?} but tokenizes to token {other} {:?}",
                    vocab.token_to_str(other).unwrap_or_default()
                ),
                _ => tracing::error!(
                    "token {id} is string {piece:?} but tokenizes to tokens {:?}",
                    vocab.detokenize(&got)
                ),
            }
            return ExitCode::from(2);
        }
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(1);
        }
    }

    let hits = probe_codepoints(&vocab);
    tracing::info!(single_token = hits.len(), "probed BMP code points");
    ExitCode::SUCCESS
}
