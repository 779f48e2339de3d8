//! Ledger keys in text columns
//!
//! PostgreSQL text rejects the NUL code point that delimits composite ledger
//! keys, so NUL is stored as the placeholder `{u0000}`. A literal `{` is
//! escaped as `{u007b}`, which keeps every key reversible.

const NUL: char = '\u{0}';
const NUL_PLACEHOLDER: &str = "{u0000}";
const BRACE: char = '{';
const BRACE_PLACEHOLDER: &str = "{u007b}";

/// Make a ledger key storable in a text column
pub fn encode_document_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            NUL => encoded.push_str(NUL_PLACEHOLDER),
            BRACE => encoded.push_str(BRACE_PLACEHOLDER),
            c => encoded.push(c),
        }
    }
    encoded
}

/// Restore a ledger key read from a text column
pub fn decode_document_key(key: &str) -> String {
    let mut decoded = String::with_capacity(key.len());
    let mut rest = key;
    while let Some(at) = rest.find(BRACE) {
        decoded.push_str(&rest[..at]);
        let tail = &rest[at..];
        if let Some(after) = tail.strip_prefix(NUL_PLACEHOLDER) {
            decoded.push(NUL);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(BRACE_PLACEHOLDER) {
            decoded.push(BRACE);
            rest = after;
        } else {
            // Unescaped brace
            decoded.push(BRACE);
            rest = &tail[1..];
        }
    }
    decoded.push_str(rest);
    decoded
}
