//! Vision-LLM OCR provider (transcribes the image through OpenRouter).

use super::{load_image, OcrFragment, OcrInput, OcrProvider, OcrResult};
use crate::openrouter::{Message, OpenRouterClient};
use tracing::info;

const TRANSCRIBE_SYSTEM_PROMPT: &str = "You are an OCR engine. Transcribe every piece of text \
visible in the image, in reading order (left to right, top to bottom), separated by single \
spaces. Copy numbers and units exactly as printed. Output only the transcription.";

pub struct VisionLlmProvider {
    client: OpenRouterClient,
    http: reqwest::Client,
}

impl VisionLlmProvider {
    pub fn new(client: OpenRouterClient, http: reqwest::Client) -> Self {
        Self { client, http }
    }
}

#[async_trait::async_trait]
impl OcrProvider for VisionLlmProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult> {
        let image = load_image(&self.http, input).await?;
        info!(
            "VisionLlmProvider: transcribing {} with {}",
            image.filename,
            self.client.model()
        );

        let messages = vec![
            Message::system(TRANSCRIBE_SYSTEM_PROMPT),
            Message::user_with_image("Transcribe this image.", &image.data, image.mime),
        ];
        let transcription = self.client.chat(messages).await?;

        Ok(OcrResult::from_fragments(
            self.name(),
            vec![OcrFragment {
                text: transcription.split_whitespace().collect::<Vec<_>>().join(" "),
                confidence: None,
            }],
        ))
    }
}
