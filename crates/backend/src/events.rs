//! Typed events decoded from the generation backend's stream.
//!
//! The upstream speaks an SSE-style protocol: `data: <json>` lines,
//! terminated by `data: [DONE]`. Two payload shapes occur in the wild —
//! a structured video-generation response carrying an explicit progress
//! percentage (and, at 100, artifact URLs), and chat-completion deltas
//! whose free text embeds progress pushes and the final artifact link.
//! Anything unrecognized is a transient skip, never a fatal error.

use genrelay_core::extract::Artifact;
use serde::{Deserialize, Serialize};

/// The job submitted to the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub model: String,
    pub prompt: String,
    /// Reference image for image-to-video jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Domain-specific generation options, passed through verbatim.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// One decoded increment of the backend's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Structured progress report (0–100).
    Progress {
        percent: u8,
        message: Option<String>,
    },
    /// Free-form delta text; the caller accumulates these and applies
    /// the extraction heuristics.
    Delta { text: String },
    /// A final artifact surfaced by the structured response shape.
    Artifact { artifact: Artifact },
    /// End-of-stream marker (`data: [DONE]`).
    Done,
}

/// Decode one raw stream line into a [`BackendEvent`].
///
/// Returns `None` for lines that carry nothing usable — non-`data:`
/// framing, unparseable JSON, or payloads without a recognized shape.
pub fn parse_line(line: &str) -> Option<BackendEvent> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(BackendEvent::Done);
    }

    let value: serde_json::Value = serde_json::from_str(data).ok()?;

    // Structured shape: result.response.streamingVideoGenerationResponse
    if let Some(video) = value
        .pointer("/result/response/streamingVideoGenerationResponse")
        .filter(|v| !v.is_null())
    {
        let percent = video
            .get("progress")
            .and_then(|p| p.as_u64())
            .map(|p| p.min(100) as u8);

        if percent == Some(100) {
            if let Some(url) = video.get("videoUrl").and_then(|u| u.as_str()) {
                if !url.is_empty() {
                    return Some(BackendEvent::Artifact {
                        artifact: Artifact {
                            url: url.to_string(),
                            thumbnail_url: video
                                .get("thumbnailImageUrl")
                                .and_then(|u| u.as_str())
                                .filter(|u| !u.is_empty())
                                .map(String::from),
                        },
                    });
                }
            }
        }

        return percent.map(|percent| BackendEvent::Progress {
            percent,
            message: None,
        });
    }

    // Chat-completion shape: choices[0].delta.content
    let text = value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())?;
    if text.is_empty() {
        return None;
    }
    Some(BackendEvent::Delta {
        text: text.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
