use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// A self-describing `data:<mime>;base64,<payload>` image blob.
///
/// Produced once (by the normalizer, or from a provider response) and never
/// mutated afterwards. Upstream payloads occasionally arrive as bare base64
/// with no data-URL header; the accessors tolerate that shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedImage(String);

impl EncodedImage {
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
    }

    pub fn from_base64(mime: &str, payload: &str) -> Self {
        Self(format!("data:{mime};base64,{payload}"))
    }

    pub fn from_data_url(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The MIME tag between `data:` and the first `;`. Headerless payloads
    /// report `image/png`, the format the upstream endpoints assume.
    pub fn mime_type(&self) -> &str {
        self.0
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(';'))
            .map(|(mime, _)| mime)
            .filter(|mime| !mime.is_empty())
            .unwrap_or("image/png")
    }

    /// The base64 payload with any data-URL header stripped.
    pub fn payload(&self) -> &str {
        match self.0.split_once(',') {
            Some((_, tail)) => tail,
            None => &self.0,
        }
    }

    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        BASE64
            .decode(self.payload().as_bytes())
            .context("image payload base64 decode failed")
    }
}

#[cfg(test)]
mod tests {
    use super::EncodedImage;

    #[test]
    fn from_bytes_round_trips() -> anyhow::Result<()> {
        let image = EncodedImage::from_bytes("image/jpeg", b"jpeg-bytes");
        assert_eq!(image.mime_type(), "image/jpeg");
        assert_eq!(image.decode()?, b"jpeg-bytes");
        assert!(image.as_str().starts_with("data:image/jpeg;base64,"));
        Ok(())
    }

    #[test]
    fn payload_strips_data_url_header() {
        let image = EncodedImage::from_data_url("data:image/png;base64,AAAA");
        assert_eq!(image.payload(), "AAAA");
        assert_eq!(image.mime_type(), "image/png");
    }

    #[test]
    fn bare_base64_is_tolerated() {
        let image = EncodedImage::from_data_url("AAAA");
        assert_eq!(image.payload(), "AAAA");
        assert_eq!(image.mime_type(), "image/png");
    }

    #[test]
    fn from_base64_does_not_reencode() {
        let image = EncodedImage::from_base64("image/webp", "QUJD");
        assert_eq!(image.as_str(), "data:image/webp;base64,QUJD");
        assert_eq!(image.decode().unwrap(), b"ABC");
    }
}
