//! Best-effort recovery of progress and artifacts from upstream text.
//!
//! The generation backend's stream is not strongly typed: progress may
//! arrive as a structured field or embedded in localized delta text,
//! and the final artifact may be an HTML `<video>` tag, a markdown
//! link, or a bare URL. These heuristics are a documented contract of
//! "best effort", not a schema — callers must treat a `None` as
//! "nothing recognized", never as an error.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Matches the upstream progress push embedded in streamed delta text,
/// e.g. `进度 42%`.
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"进度\s*(\d+)%").expect("valid regex"));

static VIDEO_SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src="([^"]+)""#).expect("valid regex"));

static POSTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"poster="([^"]+)""#).expect("valid regex"));

static MARKDOWN_VIDEO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[video\]\(([^)]+)\)").expect("valid regex"));

static BARE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<)]+").expect("valid regex"));

/// An artifact locator recovered from upstream output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Extract the latest progress percentage pushed into accumulated
/// delta text. Returns the last match, clamped to 0–100.
pub fn progress_from_text(text: &str) -> Option<u8> {
    PROGRESS_RE
        .captures_iter(text)
        .last()
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .map(|p| p.min(100) as u8)
}

/// Recover an artifact URL (and thumbnail, when present) from content.
///
/// Tried in order: `<video src="…">` HTML with optional `poster`,
/// `[video](…)` markdown (last match wins), then a trailing bare URL.
pub fn artifact_from_content(content: &str) -> Option<Artifact> {
    if content.is_empty() {
        return None;
    }

    if content.contains("<video") && content.contains("src=") {
        if let Some(caps) = VIDEO_SRC_RE.captures(content) {
            return Some(Artifact {
                url: caps[1].to_string(),
                thumbnail_url: POSTER_RE.captures(content).map(|c| c[1].to_string()),
            });
        }
    }

    if let Some(caps) = MARKDOWN_VIDEO_RE.captures_iter(content).last() {
        return Some(Artifact {
            url: caps[1].to_string(),
            thumbnail_url: None,
        });
    }

    BARE_URL_RE
        .find_iter(content)
        .last()
        .map(|m| Artifact {
            url: m.as_str().to_string(),
            thumbnail_url: None,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
