//! Descriptor and source-locator types.
//!
//! A [`MediaDescriptor`] is the normalized identification of a remote media
//! object, produced once by an external resolver and immutable afterwards.
//! It is never partially trusted: a descriptor missing any required field is
//! rejected outright.

use serde::{Deserialize, Serialize};

use crate::errors::AcquireError;
use crate::rpc::ChunkLocation;

/// Where a task's media lives, before (or instead of) descriptor resolution.
///
/// A URL can be fetched directly; an element reference only identifies a
/// playback surface in the host environment and can never be fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceLocator {
    Url { url: String },
    Element { reference: String },
}

impl SourceLocator {
    /// The fetchable URL, if this locator has one.
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url { url } => Some(url),
            Self::Element { .. } => None,
        }
    }
}

/// Normalized identification of a remote media object.
///
/// The `file_reference` is an opaque token the remote side issued; it arrives
/// here already normalized to raw bytes (resolver responsibility) and is
/// serialized as base64 on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub id: i64,
    pub access_token: i64,
    #[serde(with = "base64_bytes")]
    pub file_reference: Vec<u8>,
    pub shard_id: i32,
    pub total_size: u64,
    pub mime_hint: Option<String>,
    pub suggested_name: Option<String>,
}

impl MediaDescriptor {
    /// Reject descriptors that cannot drive a chunked transfer.
    ///
    /// The engine does not guess at missing pieces: an empty file reference
    /// or a zero size means the resolver failed, not that we should improvise.
    pub fn validate(&self) -> Result<(), AcquireError> {
        if self.file_reference.is_empty() {
            return Err(AcquireError::DescriptorMissing(
                "empty file reference".into(),
            ));
        }
        if self.total_size == 0 {
            return Err(AcquireError::DescriptorMissing("zero total size".into()));
        }
        Ok(())
    }

    /// The remote read location derived from this descriptor.
    pub fn location(&self) -> ChunkLocation {
        ChunkLocation {
            id: self.id,
            access_token: self.access_token,
            file_reference: self.file_reference.clone(),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> MediaDescriptor {
        MediaDescriptor {
            id: 7_315_021,
            access_token: -44_210_987,
            file_reference: vec![0x01, 0x02, 0x03, 0x04],
            shard_id: 4,
            total_size: 3_145_728,
            mime_hint: Some("video/mp4".into()),
            suggested_name: Some("clip.mp4".into()),
        }
    }

    #[test]
    fn test_valid_descriptor_passes() {
        assert!(descriptor().validate().is_ok());
    }

    #[test]
    fn test_empty_reference_rejected() {
        let mut d = descriptor();
        d.file_reference.clear();
        assert!(matches!(
            d.validate(),
            Err(AcquireError::DescriptorMissing(_))
        ));
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut d = descriptor();
        d.total_size = 0;
        assert!(matches!(
            d.validate(),
            Err(AcquireError::DescriptorMissing(_))
        ));
    }

    #[test]
    fn test_file_reference_serializes_as_base64() {
        let json = serde_json::to_value(descriptor()).unwrap();
        assert_eq!(json["file_reference"], "AQIDBA==");
        let back: MediaDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back.file_reference, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_source_locator_url() {
        let loc = SourceLocator::Url {
            url: "https://example.com/v.mp4".into(),
        };
        assert_eq!(loc.as_url(), Some("https://example.com/v.mp4"));
        let el = SourceLocator::Element {
            reference: "video-3".into(),
        };
        assert!(el.as_url().is_none());
    }
}
