//! Vocabulary loaded from GGUF metadata

use super::escape::unescape_whitespace;
use super::{TokenType, TokenizerKind, VocabTokenizer, VocabType, bpe};
use crate::error::{Error, Result};
use crate::format::gguf::{Gguf, GgufMetadata, GgufValue};
use splintr::SpmTokenizer;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

const KEY_MODEL: &str = "tokenizer.ggml.model";
const KEY_TOKENS: &str = "tokenizer.ggml.tokens";
const KEY_SCORES: &str = "tokenizer.ggml.scores";
const KEY_TOKEN_TYPE: &str = "tokenizer.ggml.token_type";
const KEY_MERGES: &str = "tokenizer.ggml.merges";
const KEY_UNK_ID: &str = "tokenizer.ggml.unknown_token_id";

/// One vocabulary entry
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEntry {
    pub text: String,
    pub score: f32,
    pub ty: TokenType,
}

impl TokenEntry {
    pub fn new(text: impl Into<String>, score: f32, ty: TokenType) -> Self {
        Self {
            text: text.into(),
            score,
            ty,
        }
    }
}

/// Token table, merge ranks and the algorithm that uses them.
///
/// SentencePiece vocabularies delegate encoding to `splintr::SpmTokenizer`
/// with the dummy prefix disabled, so a stored piece is merged as written.
pub struct Vocab {
    kind: TokenizerKind,
    tokens: Vec<TokenEntry>,
    token_to_id: HashMap<String, u32>,
    merge_ranks: HashMap<(String, String), usize>,
    unk_id: Option<u32>,
    spm: Option<SpmTokenizer>,
}

impl fmt::Debug for Vocab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vocab")
            .field("kind", &self.kind)
            .field("n_vocab", &self.tokens.len())
            .field("n_merges", &self.merge_ranks.len())
            .field("unk_id", &self.unk_id)
            .finish_non_exhaustive()
    }
}

fn vocab_err(reason: impl Into<String>) -> Error {
    Error::VocabError {
        reason: reason.into(),
    }
}

impl Vocab {
    /// Build a vocabulary from its parts. `merges` are in priority order.
    pub fn new(
        kind: TokenizerKind,
        tokens: Vec<TokenEntry>,
        merges: Vec<(String, String)>,
        unk_id: Option<u32>,
    ) -> Result<Self> {
        if tokens.is_empty() {
            return Err(vocab_err("vocabulary is empty"));
        }
        let n_vocab = u32::try_from(tokens.len())
            .map_err(|_| vocab_err(format!("{} tokens exceed the id range", tokens.len())))?;
        if let Some(unk) = unk_id.filter(|&unk| unk >= n_vocab) {
            return Err(vocab_err(format!(
                "unknown token id {unk} outside vocabulary of {n_vocab}"
            )));
        }

        // a repeated text resolves to its first id
        let mut token_to_id = HashMap::with_capacity(tokens.len());
        for (id, t) in tokens.iter().enumerate() {
            token_to_id.entry(t.text.clone()).or_insert(id as u32);
        }
        let merge_ranks = merges
            .into_iter()
            .enumerate()
            .map(|(rank, pair)| (pair, rank))
            .collect();

        let spm = match kind {
            TokenizerKind::Spm => {
                let texts = tokens.iter().map(|t| t.text.clone()).collect();
                let scores = tokens.iter().map(|t| t.score).collect();
                let spm = SpmTokenizer::new(texts, scores, None, None)
                    .map_err(|e| vocab_err(format!("cannot build SentencePiece tokenizer: {e}")))?
                    .with_prefix_space(false);
                Some(spm)
            }
            TokenizerKind::Bpe => None,
        };

        Ok(Self {
            kind,
            tokens,
            token_to_id,
            merge_ranks,
            unk_id,
            spm,
        })
    }

    /// Open a GGUF file and read its vocabulary
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let gguf = Gguf::open(path)?;
        Self::from_gguf(&gguf)
    }

    pub fn from_gguf(gguf: &Gguf) -> Result<Self> {
        tracing::debug!(version = gguf.version(), n_tensors = gguf.len(), "reading vocabulary");
        Self::from_metadata(gguf.metadata())
    }

    /// Read the `tokenizer.ggml.*` keys
    pub fn from_metadata(metadata: &GgufMetadata) -> Result<Self> {
        let texts = metadata
            .get_array(KEY_TOKENS)
            .ok_or_else(|| vocab_err(format!("missing {KEY_TOKENS}")))?;
        let n_vocab = texts.len();

        let kind = match metadata.get_string(KEY_MODEL) {
            Some(name) => TokenizerKind::from_model_name(name)
                .ok_or_else(|| vocab_err(format!("unsupported tokenizer model '{name}'")))?,
            None => match VocabType::from_n_vocab(n_vocab) {
                VocabType::Spm => TokenizerKind::Spm,
                VocabType::Bpe => TokenizerKind::Bpe,
            },
        };

        let scores = optional_array(metadata, KEY_SCORES, n_vocab, |v| v.as_f32())?;
        let types = optional_array(metadata, KEY_TOKEN_TYPE, n_vocab, |v| v.as_i32())?;

        let mut tokens = Vec::with_capacity(n_vocab);
        for (id, value) in texts.iter().enumerate() {
            let text = value
                .as_string()
                .ok_or_else(|| vocab_err(format!("{KEY_TOKENS}[{id}] is not a string")))?;
            tokens.push(TokenEntry {
                text: text.to_string(),
                score: scores.as_ref().map_or(0.0, |s| s[id]),
                ty: types
                    .as_ref()
                    .map_or(TokenType::Normal, |t| TokenType::from_i32(t[id])),
            });
        }

        let mut merges = Vec::new();
        if let Some(values) = metadata.get_array(KEY_MERGES) {
            merges.reserve(values.len());
            for (i, value) in values.iter().enumerate() {
                let (a, b) = value
                    .as_string()
                    .and_then(|s| s.split_once(' '))
                    .ok_or_else(|| {
                        vocab_err(format!("{KEY_MERGES}[{i}] is not a 'left right' pair"))
                    })?;
                merges.push((a.to_string(), b.to_string()));
            }
        }

        let unk_id = metadata.get_u32(KEY_UNK_ID).or_else(|| {
            tokens
                .iter()
                .position(|t| t.ty == TokenType::Unknown)
                .map(|id| id as u32)
        });

        tracing::debug!(n_vocab, ?kind, n_merges = merges.len(), ?unk_id, "loaded vocabulary");
        Self::new(kind, tokens, merges, unk_id)
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.unk_id
    }

    pub(crate) fn id_of(&self, text: &str) -> Option<u32> {
        self.token_to_id.get(text).copied()
    }

    pub(crate) fn merge_rank(&self, left: &str, right: &str) -> Option<usize> {
        self.merge_ranks
            .get(&(left.to_string(), right.to_string()))
            .copied()
    }

    /// SentencePiece encoding; spaces become `▁` and nothing is prepended
    fn spm_encode(&self, text: &str) -> Vec<u32> {
        self.spm
            .as_ref()
            .map_or_else(Vec::new, |spm| spm.encode_ordinary(text))
    }
}

fn optional_array<T>(
    metadata: &GgufMetadata,
    key: &str,
    n_vocab: usize,
    get: impl Fn(&GgufValue) -> Option<T>,
) -> Result<Option<Vec<T>>> {
    let Some(values) = metadata.get_array(key) else {
        return Ok(None);
    };
    if values.len() != n_vocab {
        return Err(vocab_err(format!(
            "{key} has {} entries, expected {n_vocab}",
            values.len()
        )));
    }
    values
        .iter()
        .enumerate()
        .map(|(i, v)| get(v).ok_or_else(|| vocab_err(format!("{key}[{i}] has the wrong type"))))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Byte encoded by a `<0xXX>` piece
fn parse_byte_piece(text: &str) -> Option<u8> {
    let hex = text.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

impl VocabTokenizer for Vocab {
    fn n_vocab(&self) -> usize {
        self.tokens.len()
    }

    fn kind(&self) -> TokenizerKind {
        self.kind
    }

    fn token_to_piece(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(|t| t.text.as_str())
    }

    fn token_to_str(&self, id: u32) -> Option<String> {
        let t = self.tokens.get(id as usize)?;
        Some(match self.kind {
            TokenizerKind::Spm => match (t.ty, parse_byte_piece(&t.text)) {
                (TokenType::Byte, Some(b)) => String::from_utf8_lossy(&[b]).into_owned(),
                _ => unescape_whitespace(&t.text),
            },
            TokenizerKind::Bpe => bpe::decode_piece(&t.text),
        })
    }

    fn tokenize_raw(&self, text: &str) -> Vec<u32> {
        match self.kind {
            TokenizerKind::Spm => self.spm_encode(text),
            TokenizerKind::Bpe => bpe::merge_symbols(self, text),
        }
    }

    fn tokenize(&self, text: &str) -> Vec<u32> {
        match self.kind {
            TokenizerKind::Spm => self.spm_encode(text),
            TokenizerKind::Bpe => bpe::tokenize(self, text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(entries: Vec<(&str, GgufValue)>) -> GgufMetadata {
        let mut md = GgufMetadata::default();
        for (k, v) in entries {
            md.insert(k, v);
        }
        md
    }

    fn strings(items: &[&str]) -> GgufValue {
        GgufValue::Array(items.iter().map(|&s| GgufValue::from(s)).collect())
    }

    #[test]
    fn test_from_metadata_spm() {
        let md = metadata(vec![
            (KEY_MODEL, "llama".into()),
            (KEY_TOKENS, strings(&["<unk>", "<0x41>", "▁a"])),
            (
                KEY_SCORES,
                GgufValue::Array(vec![GgufValue::Float32(0.0); 3]),
            ),
            (
                KEY_TOKEN_TYPE,
                GgufValue::Array(vec![
                    GgufValue::Int32(2),
                    GgufValue::Int32(6),
                    GgufValue::Int32(1),
                ]),
            ),
        ]);
        let v = Vocab::from_metadata(&md).unwrap();
        assert_eq!(v.kind(), TokenizerKind::Spm);
        assert_eq!(v.unk_id(), Some(0));
        assert_eq!(v.token_to_str(1).as_deref(), Some("A"));
        assert_eq!(v.token_to_str(2).as_deref(), Some(" a"));
        // the byte set is incomplete, so unmatched text falls back to <unk>
        assert_eq!(v.tokenize(" a"), vec![2]);
        assert_eq!(v.tokenize_raw("▁a"), vec![2]);
        assert_eq!(v.tokenize("b"), vec![0]);
    }

    #[test]
    fn test_spm_merges_by_score() {
        let tokens = [
            ("<unk>", 0.0),
            ("a", -1.0),
            ("b", -1.0),
            ("ab", -3.0),
            ("bc", -2.0),
            ("c", -1.0),
        ]
        .map(|(text, score)| TokenEntry::new(text, score, TokenType::Normal))
        .to_vec();
        let v = Vocab::new(TokenizerKind::Spm, tokens, vec![], Some(0)).unwrap();
        // "bc" outscores "ab"
        assert_eq!(v.tokenize_raw("abc"), vec![1, 4]);
        assert_eq!(v.tokenize_raw("ab"), vec![3]);
        assert!(v.tokenize_raw("").is_empty());
    }

    #[test]
    fn test_duplicate_text_resolves_to_first_id() {
        let tokens = ["<unk>", "a", "a"]
            .map(|text| TokenEntry::new(text, 0.0, TokenType::Normal))
            .to_vec();
        let spm = Vocab::new(TokenizerKind::Spm, tokens.clone(), vec![], Some(0)).unwrap();
        assert_eq!(spm.tokenize_raw("a"), vec![1]);
        let bpe = Vocab::new(TokenizerKind::Bpe, tokens, vec![], Some(0)).unwrap();
        assert_eq!(bpe.tokenize_raw("a"), vec![1]);
    }

    #[test]
    fn test_kind_from_vocab_size_when_model_missing() {
        let md = metadata(vec![(KEY_TOKENS, strings(&["a", "b"]))]);
        assert_eq!(Vocab::from_metadata(&md).unwrap().kind(), TokenizerKind::Bpe);
    }

    #[test]
    fn test_bad_metadata() {
        let md = metadata(vec![(KEY_MODEL, "llama".into())]);
        assert!(Vocab::from_metadata(&md).is_err());

        let md = metadata(vec![
            (KEY_TOKENS, strings(&["a", "b"])),
            (KEY_SCORES, GgufValue::Array(vec![GgufValue::Float32(0.0)])),
        ]);
        assert!(Vocab::from_metadata(&md).is_err());

        let md = metadata(vec![
            (KEY_MODEL, "gpt2".into()),
            (KEY_TOKENS, strings(&["a", "b"])),
            (KEY_MERGES, strings(&["ab"])),
        ]);
        assert!(Vocab::from_metadata(&md).is_err());

        let md = metadata(vec![(KEY_MODEL, "t5".into()), (KEY_TOKENS, strings(&["a"]))]);
        assert!(Vocab::from_metadata(&md).is_err());
    }

    #[test]
    fn test_unknown_id_out_of_range() {
        let tokens = vec![TokenEntry::new("a", 0.0, TokenType::Normal)];
        assert!(Vocab::new(TokenizerKind::Bpe, tokens, vec![], Some(1)).is_err());
    }

    #[test]
    fn test_parse_byte_piece() {
        assert_eq!(parse_byte_piece("<0x0A>"), Some(0x0A));
        assert_eq!(parse_byte_piece("<0xZZ>"), None);
        assert_eq!(parse_byte_piece("<0x1>"), None);
        assert_eq!(parse_byte_piece("a"), None);
    }
}
