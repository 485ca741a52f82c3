//! Prediction pipeline: image -> OCR text -> value/unit for an entity.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::ocr::{OcrInput, OcrProvider};
use crate::ocr_cache::OcrCache;
use crate::scanner::{ExtractedPair, UnitScanner};

/// Pipeline orchestrator. Cheap to clone; all parts are shared.
#[derive(Clone)]
pub struct Predictor {
    provider: Arc<dyn OcrProvider>,
    scanner: Arc<UnitScanner>,
    cache: OcrCache,
}

impl Predictor {
    pub fn new(provider: Arc<dyn OcrProvider>, scanner: Arc<UnitScanner>) -> Self {
        Self {
            provider,
            scanner,
            cache: OcrCache::new(),
        }
    }

    pub fn scanner(&self) -> &UnitScanner {
        &self.scanner
    }

    /// OCR text for an input, served from the cache when the same image was
    /// already read.
    pub async fn ocr_text(&self, input: &OcrInput) -> Result<String> {
        let key = OcrCache::key_for(input);
        if let Some(text) = self.cache.get(&key) {
            debug!("OCR cache hit for {}", input.describe());
            return Ok(text);
        }

        let result = self
            .provider
            .process(input)
            .await
            .with_context(|| format!("OCR failed for {}", input.describe()))?;

        info!(
            "OCR complete for {}: {} fragments, {} chars, confidence {:?} (provider={})",
            input.describe(),
            result.fragments.len(),
            result.text.len(),
            result.mean_confidence(),
            result.provider_name
        );

        self.cache.insert(key, result.text.clone());
        debug!("OCR cache holds {} images", self.cache.len());
        Ok(result.text)
    }

    /// Read the image and resolve `entity` against its text.
    ///
    /// Unsupported entities short-circuit to `Ok(None)` without running OCR.
    pub async fn predict(&self, input: &OcrInput, entity: &str) -> Result<Option<ExtractedPair>> {
        if self.scanner.tables().entity_units(entity).is_none() {
            debug!("Skipping OCR for unsupported entity '{}'", entity);
            return Ok(None);
        }

        let text = self.ocr_text(input).await?;
        Ok(self.scanner.resolve(entity, &text))
    }

    /// Like [`Predictor::predict`], but failures become an absent prediction.
    pub async fn predict_or_absent(&self, input: &OcrInput, entity: &str) -> Option<String> {
        match self.predict(input, entity).await {
            Ok(pair) => pair.map(|p| p.to_string()),
            Err(e) => {
                warn!("Prediction failed for {}: {:#}", input.describe(), e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ocr::{OcrFragment, OcrResult};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// OCR provider that serves canned text per URL and fails for unknown ones.
    /// Stalled URLs never complete.
    pub(crate) struct FakeOcr {
        pub texts: HashMap<String, String>,
        pub stalled: HashSet<String>,
        pub calls: AtomicUsize,
    }

    impl FakeOcr {
        pub(crate) fn new(texts: &[(&str, &str)]) -> Self {
            Self {
                texts: texts
                    .iter()
                    .map(|(url, text)| (url.to_string(), text.to_string()))
                    .collect(),
                stalled: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn with_stalled(mut self, url: &str) -> Self {
            self.stalled.insert(url.to_string());
            self
        }
    }

    #[async_trait::async_trait]
    impl OcrProvider for FakeOcr {
        fn name(&self) -> &str {
            "fake"
        }

        async fn process(&self, input: &OcrInput) -> anyhow::Result<OcrResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = match input {
                OcrInput::Url { url } => url.clone(),
                OcrInput::Bytes { filename, .. } => filename.clone(),
            };
            if self.stalled.contains(&key) {
                std::future::pending::<()>().await;
            }
            let text = self
                .texts
                .get(&key)
                .ok_or_else(|| anyhow::anyhow!("download failed: {}", key))?;
            Ok(OcrResult::from_fragments(
                "fake",
                vec![OcrFragment {
                    text: text.clone(),
                    confidence: None,
                }],
            ))
        }
    }

    fn predictor(fake: Arc<FakeOcr>) -> Predictor {
        Predictor::new(fake, Arc::new(UnitScanner::builtin().unwrap()))
    }

    fn url(u: &str) -> OcrInput {
        OcrInput::Url { url: u.to_string() }
    }

    #[tokio::test]
    async fn test_predict_resolves_entity() {
        let fake = Arc::new(FakeOcr::new(&[("a.jpg", "Max load 150 kg, weight 12 lbs")]));
        let predictor = predictor(fake);

        let pair = predictor.predict(&url("a.jpg"), "maximum_weight_recommendation").await;
        assert_eq!(pair.unwrap().unwrap().to_string(), "150 kilogram");
    }

    #[tokio::test]
    async fn test_ocr_text_is_cached() {
        let fake = Arc::new(FakeOcr::new(&[("a.jpg", "20 cm x 30 cm")]));
        let predictor = predictor(fake.clone());

        assert_eq!(
            predictor.predict_or_absent(&url("a.jpg"), "width").await,
            Some("20 centimetre".to_string())
        );
        assert_eq!(
            predictor.predict_or_absent(&url("a.jpg"), "height").await,
            Some("20 centimetre".to_string())
        );
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_entity_skips_ocr() {
        let fake = Arc::new(FakeOcr::new(&[("a.jpg", "red 10 cm")]));
        let predictor = predictor(fake.clone());

        assert_eq!(predictor.predict(&url("a.jpg"), "color").await.unwrap(), None);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_becomes_absent() {
        let fake = Arc::new(FakeOcr::new(&[]));
        let predictor = predictor(fake);

        assert!(predictor.predict(&url("missing.jpg"), "width").await.is_err());
        assert_eq!(predictor.predict_or_absent(&url("missing.jpg"), "width").await, None);
    }
}
