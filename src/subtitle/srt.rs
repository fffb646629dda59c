// SRT cue stripping
use regex::Regex;
use std::sync::OnceLock;

/// Plain text recovered from an SRT document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    pub chars: usize,
    pub lines: usize,
}

fn sequence_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+$").expect("static regex"))
}

/// A line is cue scaffolding if it is a bare sequence number or a time range.
pub fn is_cue_line(line: &str) -> bool {
    sequence_line().is_match(line) || line.contains("-->")
}

/// Strip sequence numbers, timestamp lines and blank lines, keeping the
/// remaining text lines trimmed and in their original order.
pub fn normalize_srt(content: &str) -> NormalizedText {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let kept: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_cue_line(line))
        .collect();

    let text = kept.join("\n");
    NormalizedText {
        chars: text.chars().count(),
        lines: kept.len(),
        text,
    }
}
