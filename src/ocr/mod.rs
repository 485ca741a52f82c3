//! Modular OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait and unified types so different OCR backends
//! (an OCR sidecar, a vision LLM) can be swapped via configuration. Providers
//! only produce text; value/unit extraction happens in [`crate::scanner`].

pub mod sidecar;
pub mod vision;

use anyhow::Context;
use tracing::info;

/// One recognized text fragment, in the order the engine reported it.
#[derive(Debug, Clone)]
pub struct OcrFragment {
    pub text: String,
    pub confidence: Option<f64>,
}

/// Unified OCR result returned by every provider.
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// Fragments joined by a single space.
    pub text: String,
    pub fragments: Vec<OcrFragment>,
    pub provider_name: String,
}

impl OcrResult {
    pub fn from_fragments(provider_name: &str, fragments: Vec<OcrFragment>) -> Self {
        let text = fragments
            .iter()
            .map(|f| f.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            text,
            fragments,
            provider_name: provider_name.to_string(),
        }
    }

    /// Average confidence over fragments that report one.
    pub fn mean_confidence(&self) -> Option<f64> {
        let scores: Vec<f64> = self.fragments.iter().filter_map(|f| f.confidence).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Input to an OCR provider: either raw image bytes or a remote URL.
#[derive(Debug, Clone)]
pub enum OcrInput {
    Bytes { filename: String, data: Vec<u8> },
    Url { url: String },
}

impl OcrInput {
    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            OcrInput::Bytes { filename, data } => format!("{} ({} bytes)", filename, data.len()),
            OcrInput::Url { url } => url.clone(),
        }
    }
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult>;
}

/// Known provider identifiers used for configuration lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrProviderKind {
    Sidecar,
    VisionLlm,
}

impl OcrProviderKind {
    /// Parse a configuration string into a provider kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sidecar" | "easyocr" => Some(Self::Sidecar),
            "openrouter" | "vision" => Some(Self::VisionLlm),
            _ => None,
        }
    }
}

/// Image bytes plus the MIME type sniffed from their magic number.
pub(crate) struct ImageBytes {
    pub filename: String,
    pub data: Vec<u8>,
    pub mime: &'static str,
}

/// Resolve an input to image bytes, downloading URLs first.
pub(crate) async fn load_image(
    client: &reqwest::Client,
    input: &OcrInput,
) -> anyhow::Result<ImageBytes> {
    let (filename, data) = match input {
        OcrInput::Bytes { filename, data } => (filename.clone(), data.clone()),
        OcrInput::Url { url } => {
            info!("Downloading image {}", url);
            let resp = client
                .get(url)
                .send()
                .await
                .with_context(|| format!("Failed to download image {}", url))?;
            if !resp.status().is_success() {
                let status = resp.status();
                anyhow::bail!("Failed to download image from {} ({})", url, status);
            }
            let filename = url
                .rsplit('/')
                .next()
                .and_then(|s| s.split('?').next())
                .filter(|s| !s.is_empty())
                .unwrap_or("image")
                .to_string();
            (filename, resp.bytes().await?.to_vec())
        }
    };

    let mime = image_mime(&data)?;
    Ok(ImageBytes {
        filename,
        data,
        mime,
    })
}

/// MIME type of image bytes; fails for anything that is not a known image format.
pub(crate) fn image_mime(data: &[u8]) -> anyhow::Result<&'static str> {
    if data.is_empty() {
        anyhow::bail!("Empty image data");
    }
    let format = image::guess_format(data).context("Unrecognized image format")?;
    Ok(match format {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Gif => "image/gif",
        image::ImageFormat::WebP => "image/webp",
        image::ImageFormat::Bmp => "image/bmp",
        image::ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fragments_joins_with_single_space() {
        let fragments = vec![
            OcrFragment {
                text: "Net Wt".to_string(),
                confidence: Some(0.9),
            },
            OcrFragment {
                text: "  ".to_string(),
                confidence: None,
            },
            OcrFragment {
                text: " 500 g ".to_string(),
                confidence: Some(0.7),
            },
        ];
        let result = OcrResult::from_fragments("test", fragments);
        assert_eq!(result.text, "Net Wt 500 g");
        assert_eq!(result.fragments.len(), 3);
        assert_eq!(result.provider_name, "test");
        assert_eq!(result.mean_confidence(), Some(0.8));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(OcrProviderKind::parse("sidecar"), Some(OcrProviderKind::Sidecar));
        assert_eq!(OcrProviderKind::parse("OpenRouter"), Some(OcrProviderKind::VisionLlm));
        assert_eq!(OcrProviderKind::parse("tesseract"), None);
    }

    #[test]
    fn test_image_mime() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(image_mime(&png).unwrap(), "image/png");
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0];
        assert_eq!(image_mime(&jpeg).unwrap(), "image/jpeg");
        assert!(image_mime(b"index,prediction").is_err());
        assert!(image_mime(&[]).is_err());
    }
}
