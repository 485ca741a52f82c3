//! In-memory cache of OCR text keyed by image identity.
//!
//! Batch datasets list the same image once per requested entity, so OCR output
//! is reused instead of recomputed. Keys are `sha256:{hex}` of the image URL or
//! of the raw bytes for uploads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use crate::ocr::OcrInput;

#[derive(Debug, Clone, Default)]
pub struct OcrCache {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl OcrCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for an OCR input.
    pub fn key_for(input: &OcrInput) -> String {
        let mut hasher = Sha256::new();
        match input {
            OcrInput::Url { url } => {
                hasher.update(b"url:");
                hasher.update(url.trim().as_bytes());
            }
            OcrInput::Bytes { data, .. } => {
                hasher.update(b"bytes:");
                hasher.update(data);
            }
        }
        format!("sha256:{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let store = self.inner.read().unwrap_or_else(|e| e.into_inner());
        store.get(key).cloned()
    }

    pub fn insert(&self, key: String, text: String) {
        let text_len = text.len();
        let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
        store.insert(key.clone(), text);
        tracing::debug!("OcrCache: stored '{}' ({} chars)", key, text_len);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_retrieve() {
        let cache = OcrCache::new();
        let key = OcrCache::key_for(&OcrInput::Url {
            url: "https://example.com/a.jpg".to_string(),
        });
        assert!(cache.get(&key).is_none());

        cache.insert(key.clone(), "500 g".to_string());
        assert_eq!(cache.get(&key).as_deref(), Some("500 g"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keys_distinguish_inputs() {
        let a = OcrCache::key_for(&OcrInput::Url {
            url: "https://example.com/a.jpg".to_string(),
        });
        let a_padded = OcrCache::key_for(&OcrInput::Url {
            url: " https://example.com/a.jpg ".to_string(),
        });
        let b = OcrCache::key_for(&OcrInput::Bytes {
            filename: "a.jpg".to_string(),
            data: b"https://example.com/a.jpg".to_vec(),
        });
        assert_eq!(a, a_padded);
        assert_ne!(a, b);
        assert!(a.starts_with("sha256:"));
    }

    #[test]
    fn test_clones_share_storage() {
        let cache = OcrCache::new();
        let clone = cache.clone();
        clone.insert("k".to_string(), "v".to_string());
        assert_eq!(cache.len(), 1);
    }
}
