//! Failure fingerprints
//!
//! A [`Fingerprint`] identifies a class of failure across iterations. It is
//! the SHA-256 of the failure label, the diagnostic text and a canonical
//! structural rendering of the code the failure is attributed to.
//!
//! The structural rendering comes from tree-sitter: node kinds, field names,
//! operators and leaf text are kept; comments, whitespace and quote style are
//! not. Code that does not parse cleanly is hashed verbatim instead.
//!
//! The diagnostic text is hashed as-is, so two failures that differ only in a
//! line number inside the traceback get different fingerprints.

use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt::{self, Display, Formatter, Write as _};
use std::str::FromStr;
use tree_sitter::{Node, Parser, Tree};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // A failed language load shows up as `None` from `parse`.
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Node kinds dropped from the canonical form
const IGNORED_KINDS: &[&str] = &["comment", "string_start", "string_end", "\""];

/// 32-byte SHA-256 failure fingerprint, displayed as 64 lowercase hex chars
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create a fingerprint from raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short string representation (first 10 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..5])
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| FingerprintError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors parsing a fingerprint from text
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Not 32 bytes
    #[error("invalid fingerprint length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    /// Hex decoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

/// Compute the fingerprint of a failure.
///
/// `label` is the failure's stable label (e.g. `NameError`), `diagnostic` the
/// raw diagnostic text and `related_code` the code the failure is attributed
/// to. Deterministic for identical inputs.
#[must_use]
pub fn fingerprint(label: &str, diagnostic: &str, related_code: &str) -> Fingerprint {
    let normalized = normalize(related_code);
    let mut hasher = Sha256::new();
    hasher.update(label.as_bytes());
    hasher.update(b":");
    hasher.update(diagnostic.as_bytes());
    hasher.update(b":");
    hasher.update(normalized.as_bytes());
    Fingerprint(hasher.finalize().into())
}

/// Canonical structure of `code`, or the code itself if it does not parse.
#[must_use]
pub fn normalize(code: &str) -> Cow<'_, str> {
    match canonical_form(code) {
        Some(form) => Cow::Owned(form),
        None => {
            tracing::debug!("Structural parse failed, fingerprinting raw text");
            Cow::Borrowed(code)
        }
    }
}

/// Parse Python source with the thread-local parser.
///
/// Returns `None` only if the parser could not be configured.
#[must_use]
pub fn parse_python(code: &str) -> Option<Tree> {
    PYTHON_PARSER.with(|p| p.borrow_mut().parse(code, None))
}

/// Render `code` as a canonical S-expression.
///
/// Returns `None` if the parser is unavailable or the tree contains error or
/// missing nodes.
#[must_use]
pub fn canonical_form(code: &str) -> Option<String> {
    let tree = parse_python(code)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }
    let mut out = String::with_capacity(code.len() * 2);
    render(root, code.as_bytes(), &mut out);
    Some(out)
}

fn is_ignored(node: Node<'_>) -> bool {
    node.is_extra() || IGNORED_KINDS.contains(&node.kind())
}

fn render(node: Node<'_>, src: &[u8], out: &mut String) {
    if !node.is_named() {
        out.push_str(node.kind());
        return;
    }

    out.push('(');
    out.push_str(node.kind());

    let mut cursor = node.walk();
    if !cursor.goto_first_child() {
        // Leaf: identifiers, literals, string contents.
        let text = node.utf8_text(src).unwrap_or_default();
        let _ = write!(out, " {text:?})");
        return;
    }
    loop {
        let child = cursor.node();
        if !is_ignored(child) {
            if let Some(field) = cursor.field_name() {
                out.push(' ');
                out.push_str(field);
                out.push(':');
            }
            out.push(' ');
            render(child, src, out);
        }
        if !cursor.goto_next_sibling() {
            break;
        }
    }
    out.push(')');
}
