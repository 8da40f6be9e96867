//! Text canonicalization and markup scrubbing applied to every uploaded file.

use std::sync::OnceLock;

use regex::Regex;
use tracing::error;
use unicode_normalization::UnicodeNormalization;

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Removed in this order, case-insensitively.
const DANGEROUS_PATTERNS: &[&str] = &[
    r"(?is)<script\b.*?</script>",
    r"(?i)javascript:",
    r"(?i)on\w+\s*=",
    r"(?i)<iframe",
    r"(?i)<object",
    r"(?i)<embed",
    r"(?i)eval\(",
    r"(?i)Function\(",
];

fn dangerous_patterns() -> Result<&'static [Regex], &'static regex::Error> {
    static PATTERNS: OnceLock<Result<Vec<Regex>, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| DANGEROUS_PATTERNS.iter().map(|p| Regex::new(p)).collect())
        .as_ref()
        .map(|v| v.as_slice())
}

/// NFKC, LF line endings, surrounding whitespace and byte order marks trimmed.
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkc().collect();
    folded
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim_matches(|c: char| c.is_whitespace() || c == BYTE_ORDER_MARK)
        .to_string()
}

/// Strip script blocks, script URIs, inline handlers, embedding tags and
/// dynamic evaluation calls. Returns the input unchanged if the pattern set
/// is unusable.
pub fn sanitize(text: &str) -> String {
    let patterns = match dangerous_patterns() {
        Ok(patterns) => patterns,
        Err(e) => {
            error!("sanitizer patterns failed to compile, passing content through: {}", e);
            return text.to_string();
        }
    };

    let mut sanitized = text.to_string();
    for pattern in patterns {
        sanitized = pattern.replace_all(&sanitized, "").into_owned();
    }
    sanitized
}

/// The order used by the import pipeline: scrub first, then canonicalize.
pub fn canonicalize(text: &str) -> String {
    normalize(&sanitize(text))
}
