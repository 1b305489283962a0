//! Lyric quality classification.
//!
//! Pure accept/reject decision over a raw lyric payload. A payload is accepted
//! when enough of its timestamped lines survive the script gate; the accepted
//! artifact is the surviving `[mm:ss.xx]text` lines rejoined in original order.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::LyricPayload;
use crate::config::QualityLimits;

/// LRC-style timestamp tag prefixing each lyric line.
static TIMESTAMP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\d+:\d+\.\d+\]").unwrap());

/// Classification verdict. `Accepted` carries the filtered artifact text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Accepted(String),
    Rejected,
}

/// Returns true when the text contains any character outside printable ASCII.
/// Stands in for "not target-language content": lines in other scripts are
/// dropped rather than failing the whole lyric.
fn has_non_ascii(text: &str) -> bool {
    text.chars().any(|c| (c as u32) > 127)
}

/// Classify a lyric payload against the configured thresholds.
///
/// Tags and the text segments following them are paired positionally and
/// truncated to the shorter of the two lists, so a leading segment before the
/// first tag shifts the pairing rather than erroring. Empty-after-trim
/// segments are dropped before the script gate is applied.
pub fn classify(payload: &LyricPayload, limits: &QualityLimits) -> Classification {
    let text = match payload.lyric_text() {
        Some(t) => t,
        None => return Classification::Rejected,
    };

    if text.chars().count() < limits.min_chars {
        return Classification::Rejected;
    }

    // split() yields the text before the first tag as its first element; that
    // prefix belongs to no tag, so pairing starts after it.
    let segments: Vec<&str> = TIMESTAMP_TAG.split(text).skip(1).collect();
    let tags: Vec<&str> = TIMESTAMP_TAG.find_iter(text).map(|m| m.as_str()).collect();

    let mut paired: Vec<(&str, &str)> = Vec::new();
    for i in 0..segments.len().min(tags.len()) {
        let trimmed = segments[i].trim();
        if !trimmed.is_empty() {
            paired.push((tags[i], trimmed));
        }
    }

    let surviving: Vec<(&str, &str)> = paired
        .into_iter()
        .filter(|(_, text)| !has_non_ascii(text))
        .collect();

    if surviving.len() < limits.min_segments {
        return Classification::Rejected;
    }

    let artifact = surviving
        .iter()
        .map(|(tag, text)| format!("{tag}{text}"))
        .collect::<Vec<_>>()
        .join("\n");
    Classification::Accepted(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(lyric: &str) -> LyricPayload {
        LyricPayload::from_lyric_text(lyric)
    }

    fn limits(min_chars: usize, min_segments: usize) -> QualityLimits {
        QualityLimits {
            min_chars,
            min_segments,
        }
    }

    #[test]
    fn rejects_missing_lyric_text() {
        assert_eq!(
            classify(&LyricPayload::default(), &limits(0, 1)),
            Classification::Rejected
        );
    }

    #[test]
    fn rejects_short_lyric() {
        let p = payload("[00:01.00]hello");
        assert_eq!(classify(&p, &limits(100, 1)), Classification::Rejected);
    }

    #[test]
    fn rejects_zero_tags() {
        // Long enough, but no timestamp tags means zero paired segments.
        let text = "plain text without any tags ".repeat(10);
        let p = payload(&text);
        assert_eq!(classify(&p, &limits(100, 1)), Classification::Rejected);
    }

    #[test]
    fn pairing_truncates_to_shorter_list() {
        // Three tags but only two non-trailing segments: the final tag has no
        // following text, so exactly two pairs survive.
        let text = format!(
            "[00:01.00]one\n[00:02.00]two\n[00:03.00]{}",
            " ".repeat(100)
        );
        let p = payload(&text);
        match classify(&p, &limits(10, 1)) {
            Classification::Accepted(out) => {
                assert_eq!(out, "[00:01.00]one\n[00:02.00]two");
            }
            Classification::Rejected => panic!("expected acceptance"),
        }
    }

    #[test]
    fn ascii_gate_drops_only_offending_segments() {
        let body = "[00:01.00]hello\n[00:02.00]你好\n[00:03.00]world\n[00:04.00]test\n[00:05.00]more\n[00:06.00]lines";
        // Length padding before the first tag; it belongs to no tag and is
        // excluded from pairing.
        let padded = format!("{}\n{body}", "x".repeat(100));
        let p = payload(&padded);
        match classify(&p, &limits(100, 3)) {
            Classification::Accepted(out) => {
                assert_eq!(
                    out,
                    "[00:01.00]hello\n[00:03.00]world\n[00:04.00]test\n[00:05.00]more\n[00:06.00]lines"
                );
            }
            Classification::Rejected => panic!("expected acceptance"),
        }
    }

    #[test]
    fn rejects_entirely_non_ascii_lyric() {
        let text = "[00:01.00]你好世界\n".repeat(20);
        let p = payload(&text);
        assert_eq!(classify(&p, &limits(100, 1)), Classification::Rejected);
    }

    #[test]
    fn rejects_when_too_few_segments_survive() {
        let text = format!("[00:01.00]only line {}", "x".repeat(100));
        let p = payload(&text);
        assert_eq!(classify(&p, &limits(100, 6)), Classification::Rejected);
    }

    #[test]
    fn classification_is_deterministic() {
        let text = format!(
            "[00:01.00]alpha\n[00:02.00]beta\n[00:03.00]gamma {}",
            "y".repeat(100)
        );
        let p = payload(&text);
        let first = classify(&p, &limits(100, 3));
        let second = classify(&p, &limits(100, 3));
        assert_eq!(first, second);
        assert!(matches!(first, Classification::Accepted(_)));
    }
}
