//! OCR sidecar provider (an EasyOCR-style HTTP service).

use super::{load_image, OcrFragment, OcrInput, OcrProvider, OcrResult};
use serde::Deserialize;
use tracing::{debug, info};

/// Sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct SidecarResponse {
    fragments: Vec<SidecarFragment>,
}

#[derive(Debug, Deserialize)]
struct SidecarFragment {
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

pub struct SidecarProvider {
    url: String,
    client: reqwest::Client,
}

impl SidecarProvider {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl OcrProvider for SidecarProvider {
    fn name(&self) -> &str {
        "sidecar"
    }

    async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult> {
        use reqwest::multipart::{Form, Part};

        let image = load_image(&self.client, input).await?;
        info!(
            "SidecarProvider: sending {} ({} bytes, {})",
            image.filename,
            image.data.len(),
            image.mime
        );

        let part = Part::bytes(image.data)
            .file_name(image.filename)
            .mime_str(image.mime)?;

        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/ocr", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OCR sidecar error ({}): {}", status, error_text);
        }

        let sidecar: SidecarResponse = response.json().await?;
        debug!("SidecarProvider: {} fragments", sidecar.fragments.len());

        Ok(OcrResult::from_fragments(
            self.name(),
            sidecar
                .fragments
                .into_iter()
                .map(|f| OcrFragment {
                    text: f.text,
                    confidence: f.confidence,
                })
                .collect(),
        ))
    }
}
