//! Byte-level BPE over the GPT-2 byte alphabet

use super::vocab::Vocab;
use std::collections::HashMap;
use std::sync::OnceLock;

struct ByteTables {
    to_char: [char; 256],
    to_byte: HashMap<char, u8>,
}

static BYTE_TABLES: OnceLock<ByteTables> = OnceLock::new();

// Printable Latin-1 bytes stand for themselves; the rest are shifted to
// U+0100 onwards in byte order.
fn byte_tables() -> &'static ByteTables {
    BYTE_TABLES.get_or_init(|| {
        let mut to_char = ['\0'; 256];
        let mut n = 0u32;
        for b in 0..=255u8 {
            let printable = matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
            to_char[b as usize] = if printable {
                char::from(b)
            } else {
                n += 1;
                char::from_u32(255 + n).unwrap_or('\u{FFFD}')
            };
        }
        let to_byte = to_char.iter().enumerate().map(|(b, &c)| (c, b as u8)).collect();
        ByteTables { to_char, to_byte }
    })
}

/// GPT-2 alphabet character standing for byte `b`
pub fn byte_to_char(b: u8) -> char {
    byte_tables().to_char[b as usize]
}

/// Byte a GPT-2 alphabet character stands for
pub fn char_to_byte(c: char) -> Option<u8> {
    byte_tables().to_byte.get(&c).copied()
}

/// Display text of a piece; characters outside the byte alphabet pass through
pub(crate) fn decode_piece(piece: &str) -> String {
    let mut bytes = Vec::with_capacity(piece.len());
    for c in piece.chars() {
        match char_to_byte(c) {
            Some(b) => bytes.push(b),
            None => bytes.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes()),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Rank merging over text already in the byte alphabet: repeatedly join
/// the adjacent pair with the lowest merge rank (leftmost on ties).
pub(crate) fn merge_symbols(vocab: &Vocab, text: &str) -> Vec<u32> {
    let mut symbols: Vec<(usize, usize)> = text
        .char_indices()
        .map(|(i, c)| (i, i + c.len_utf8()))
        .collect();

    loop {
        let mut best: Option<(usize, usize)> = None;
        for i in 0..symbols.len().saturating_sub(1) {
            let left = &text[symbols[i].0..symbols[i].1];
            let right = &text[symbols[i + 1].0..symbols[i + 1].1];
            let Some(rank) = vocab.merge_rank(left, right) else {
                continue;
            };
            if best.is_none_or(|(_, r)| rank < r) {
                best = Some((i, rank));
            }
        }
        let Some((i, _)) = best else { break };
        symbols[i].1 = symbols[i + 1].1;
        symbols.remove(i + 1);
    }

    let mut out = Vec::with_capacity(symbols.len());
    for (start, end) in symbols {
        let piece = &text[start..end];
        if let Some(id) = vocab.id_of(piece) {
            out.push(id);
            continue;
        }
        for c in piece.chars() {
            let mut buf = [0; 4];
            if let Some(id) = vocab.id_of(c.encode_utf8(&mut buf)).or(vocab.unk_id()) {
                out.push(id);
            }
        }
    }
    out
}

/// Map display text to the byte alphabet word by word, then merge
pub(crate) fn tokenize(vocab: &Vocab, text: &str) -> Vec<u32> {
    let mut out = Vec::new();
    for word in pre_split(text) {
        let mapped: String = word.bytes().map(byte_to_char).collect();
        out.extend(merge_symbols(vocab, &mapped));
    }
    out
}

#[derive(PartialEq, Clone, Copy)]
enum CharClass {
    Letter,
    Number,
    Other,
}

fn class_of(c: char) -> CharClass {
    if c.is_alphabetic() {
        CharClass::Letter
    } else if c.is_numeric() {
        CharClass::Number
    } else {
        CharClass::Other
    }
}

fn contraction_len(rest: &str) -> Option<usize> {
    ["'s", "'t", "'m", "'d", "'re", "'ve", "'ll"]
        .iter()
        .find(|c| rest.starts_with(*c))
        .map(|c| c.len())
}

/// GPT-2 pre-tokenization: contractions, then runs of letters, digits or
/// other symbols with at most one leading space, then whitespace. A
/// whitespace run followed by text leaves its last character to the next
/// word.
fn pre_split(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    let at = |i: usize| if i < n { chars[i].0 } else { text.len() };

    let mut words = Vec::new();
    let mut i = 0;
    while i < n {
        let start = i;
        let c = chars[i].1;
        if let Some(len) = (c == '\'')
            .then(|| contraction_len(&text[chars[i].0..]))
            .flatten()
        {
            // contractions are ASCII: one char per byte
            i += len;
            words.push(&text[at(start)..at(i)]);
            continue;
        }

        let mut j = i;
        if c == ' ' && j + 1 < n && !chars[j + 1].1.is_whitespace() {
            j += 1;
        }
        let first = chars[j].1;
        if !first.is_whitespace() {
            let class = class_of(first);
            while j < n && !chars[j].1.is_whitespace() && class_of(chars[j].1) == class {
                j += 1;
            }
        } else {
            while j < n && chars[j].1.is_whitespace() {
                j += 1;
            }
            if j < n && j - start > 1 {
                j -= 1;
            }
        }
        words.push(&text[at(start)..at(j)]);
        i = j;
    }
    words
}
