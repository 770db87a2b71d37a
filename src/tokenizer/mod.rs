//! Vocabulary tokenizers and the round-trip checker
//!
//! A [`Vocab`] is read from the `tokenizer.ggml.*` keys of a GGUF file and
//! tokenizes with one of two algorithms:
//!
//! - [`TokenizerKind::Spm`]: SentencePiece-style score merging over UTF-8
//!   characters with `<0xXX>` byte fallback, backed by `splintr`.
//! - [`TokenizerKind::Bpe`]: byte-level BPE rank merging over the GPT-2
//!   byte alphabet.
//!
//! [`check_roundtrip`] verifies that every id survives
//! `tokenize_raw(token_to_piece(id))`, and [`probe_codepoints`] lists the
//! BMP code points that map to a single token.

mod bpe;
mod escape;
mod roundtrip;
mod vocab;

pub use bpe::{byte_to_char, char_to_byte};
pub use escape::{SPM_SPACE, escape_whitespace, unescape_whitespace};
pub use roundtrip::{RoundTripReport, check_roundtrip, probe_codepoints};
pub use vocab::{TokenEntry, Vocab};

use std::fmt;

/// Vocabulary classification used for the exemption rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabType {
    Spm,
    Bpe,
}

impl VocabType {
    /// `Spm` iff the vocabulary has exactly 32000 entries
    pub fn from_n_vocab(n_vocab: usize) -> Self {
        if n_vocab == 32000 {
            VocabType::Spm
        } else {
            VocabType::Bpe
        }
    }

    /// Ids whose round-trip mismatch is reported but tolerated: control and
    /// byte-fallback tokens for `Spm`, id 0 and the extended range for `Bpe`
    pub fn is_exempt(self, id: u32) -> bool {
        match self {
            VocabType::Spm => id <= 258,
            VocabType::Bpe => id == 0 || id >= 100_000,
        }
    }
}

impl fmt::Display for VocabType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VocabType::Spm => f.write_str("spm"),
            VocabType::Bpe => f.write_str("bpe"),
        }
    }
}

/// Tokenization algorithm of a vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    Spm,
    Bpe,
}

impl TokenizerKind {
    /// Algorithm named by `tokenizer.ggml.model`
    pub fn from_model_name(name: &str) -> Option<Self> {
        match name {
            "llama" => Some(TokenizerKind::Spm),
            "gpt2" => Some(TokenizerKind::Bpe),
            _ => None,
        }
    }
}

/// Per-token type from `tokenizer.ggml.token_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenType {
    Undefined,
    #[default]
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl TokenType {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => TokenType::Normal,
            2 => TokenType::Unknown,
            3 => TokenType::Control,
            4 => TokenType::UserDefined,
            5 => TokenType::Unused,
            6 => TokenType::Byte,
            _ => TokenType::Undefined,
        }
    }
}

/// Detokenize/tokenize surface the round-trip checker drives
pub trait VocabTokenizer {
    fn n_vocab(&self) -> usize;

    fn kind(&self) -> TokenizerKind;

    /// Stored text of `id`, in the vocabulary's own alphabet
    fn token_to_piece(&self, id: u32) -> Option<&str>;

    /// Display text of `id`: `▁` becomes a space, byte tokens become bytes
    fn token_to_str(&self, id: u32) -> Option<String>;

    /// Tokenize text that is already in the vocabulary's alphabet
    fn tokenize_raw(&self, text: &str) -> Vec<u32>;

    /// Tokenize display text
    fn tokenize(&self, text: &str) -> Vec<u32>;

    /// Display text of a token sequence
    fn detokenize(&self, tokens: &[u32]) -> String {
        tokens
            .iter()
            .filter_map(|&t| self.token_to_str(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocab_type_rule() {
        assert_eq!(VocabType::from_n_vocab(32000), VocabType::Spm);
        assert_eq!(VocabType::from_n_vocab(32001), VocabType::Bpe);
        assert_eq!(VocabType::from_n_vocab(50257), VocabType::Bpe);
        assert_eq!(VocabType::Spm.to_string(), "spm");
    }

    #[test]
    fn test_exemptions() {
        assert!(VocabType::Spm.is_exempt(0));
        assert!(VocabType::Spm.is_exempt(258));
        assert!(!VocabType::Spm.is_exempt(259));
        assert!(VocabType::Bpe.is_exempt(0));
        assert!(!VocabType::Bpe.is_exempt(1));
        assert!(!VocabType::Bpe.is_exempt(99_999));
        assert!(VocabType::Bpe.is_exempt(100_000));
    }

    #[test]
    fn test_model_names() {
        assert_eq!(TokenizerKind::from_model_name("llama"), Some(TokenizerKind::Spm));
        assert_eq!(TokenizerKind::from_model_name("gpt2"), Some(TokenizerKind::Bpe));
        assert_eq!(TokenizerKind::from_model_name("bert"), None);
        assert_eq!(TokenType::from_i32(6), TokenType::Byte);
        assert_eq!(TokenType::from_i32(42), TokenType::Undefined);
    }
}
