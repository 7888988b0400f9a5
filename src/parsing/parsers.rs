//! Byte-level token checks used by the named-parameter scanner.

const LINE_COMMENT: &[u8] = b"--";
const BLOCK_OPEN: &[u8] = b"/*";
const BLOCK_CLOSE: &[u8] = b"*/";
const CAST: &[u8] = b"::";

fn token_at(bytes: &[u8], idx: usize, token: &[u8]) -> bool {
    bytes.get(idx..).is_some_and(|rest| rest.starts_with(token))
}

pub(super) fn opens_line_comment(bytes: &[u8], idx: usize) -> bool {
    token_at(bytes, idx, LINE_COMMENT)
}

pub(super) fn opens_block_comment(bytes: &[u8], idx: usize) -> bool {
    token_at(bytes, idx, BLOCK_OPEN)
}

pub(super) fn closes_block_comment(bytes: &[u8], idx: usize) -> bool {
    token_at(bytes, idx, BLOCK_CLOSE)
}

/// `::type` casts are copied through; neither colon starts a parameter.
pub(super) fn is_cast_operator(bytes: &[u8], idx: usize) -> bool {
    token_at(bytes, idx, CAST)
}

/// Tag of a `$tag$` (or `$$`) opener at `dollar`, with the index of the opener's last `$`.
/// Positional `$1`-style parameters never open a quote.
pub(super) fn dollar_quote_opener(bytes: &[u8], dollar: usize) -> Option<(String, usize)> {
    let body = bytes.get(dollar + 1..)?;
    if body.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let tag_len = body.iter().position(|&b| b == b'$')?;
    let tag = &body[..tag_len];
    if !tag.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'_') {
        return None;
    }
    let tag = std::str::from_utf8(tag).ok()?.to_owned();
    Some((tag, dollar + 1 + tag_len))
}

/// True when the `$` at `dollar` starts the closing `$tag$` for `tag`.
pub(super) fn dollar_quote_closer(bytes: &[u8], dollar: usize, tag: &str) -> bool {
    bytes.get(dollar + 1..).is_some_and(|rest| {
        rest.starts_with(tag.as_bytes()) && rest.get(tag.len()) == Some(&b'$')
    })
}
