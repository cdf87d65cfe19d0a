//! Finished artifacts and the persistence seam.
//!
//! The sink may save in the same context or delegate across a privileged
//! boundary; [`SinkMessage`] is the wire protocol for the delegated case,
//! including the fallback reply that tells the requester to perform a
//! same-context direct-navigation save instead.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::descriptor::MediaDescriptor;

/// The assembled binary output of a successful acquisition.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    /// The container format actually produced, never assumed from the
    /// source. For captures this is whatever the recorder negotiated.
    pub mime_type: String,
    /// True when a capture was cut short (hard ceiling or recorder
    /// failure) with data already recorded.
    pub partial: bool,
}

impl Artifact {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File extension for the artifact's actual mime type. Codec parameters
    /// (`video/webm;codecs=vp8,opus`) are ignored.
    pub fn extension(&self) -> &'static str {
        let essence = self
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "video/mp4" => "mp4",
            "video/webm" => "webm",
            "video/quicktime" => "mov",
            "video/x-matroska" => "mkv",
            "audio/mpeg" => "mp3",
            "audio/ogg" => "ogg",
            "audio/webm" => "weba",
            _ => "bin",
        }
    }
}

/// Destination for finished artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(&self, artifact: &Artifact, suggested_filename: &str) -> anyhow::Result<()>;
}

/// One deliverable in the delegated-persistence protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub url: String,
    pub filename: String,
}

/// Messages exchanged with a privileged persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SinkMessage {
    /// Request the collaborator fetch and save these items.
    Download { items: Vec<DownloadItem> },
    /// The collaborator could not fetch this item; the requester should
    /// fall back to a same-context direct-navigation save.
    DownloadFallback { item: DownloadItem },
}

/// Base filename for a task, before the extension is known.
///
/// Preference order: the descriptor's suggested name, then the caller's
/// title hint, then a timestamped default.
pub fn base_name(descriptor: Option<&MediaDescriptor>, title_hint: Option<&str>) -> String {
    if let Some(name) = descriptor.and_then(|d| d.suggested_name.as_deref()) {
        if !name.is_empty() {
            return name.to_string();
        }
    }
    if let Some(hint) = title_hint {
        if !hint.is_empty() {
            return hint.to_string();
        }
    }
    format!("media_{}", chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S"))
}

/// Append the artifact's extension unless the name already carries it.
pub fn with_extension(base: &str, artifact: &Artifact) -> String {
    let ext = artifact.extension();
    if base.to_ascii_lowercase().ends_with(&format!(".{ext}")) {
        base.to_string()
    } else {
        format!("{base}.{ext}")
    }
}
