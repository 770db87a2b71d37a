//! Console report formatting

use std::fmt::Write;

/// Values per dump line
pub const DUMP_COLUMNS: usize = 16;
/// Lines per dump block
pub const DUMP_ROWS: usize = 32;

pub const VERDICT_HEADER: &str = "Testing Flash Attention - comparing backends: ";
pub const OK: &str = "\x1b[1;32mOK\x1b[0m";
pub const FAIL: &str = "\x1b[1;31mFAIL\x1b[0m";

/// Up to `limit` values as `{:2.4}` in blocks of `DUMP_ROWS` lines of
/// `DUMP_COLUMNS` values, blocks separated by blank lines.
pub fn format_dump(values: &[f32], limit: usize) -> String {
    let mut out = String::new();
    for (i, v) in values.iter().take(limit).enumerate() {
        if i > 0 && i % DUMP_COLUMNS == 0 {
            out.push('\n');
        }
        if i > 0 && i % (DUMP_COLUMNS * DUMP_ROWS) == 0 {
            out.push_str("\n\n");
        }
        // writing to a String cannot fail
        let _ = write!(out, "{v:2.4} ");
    }
    out
}

pub fn verdict(ok: bool) -> &'static str {
    if ok { OK } else { FAIL }
}
