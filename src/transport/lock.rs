//! Document Lock Manager (§3 `DocumentLock`, §4.2).
//!
//! Serializes operations per logical document identity so at most one
//! holder mutates a given document at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::TransportError;

/// Held while a command is in flight for a document key; releases the
/// underlying per-key mutex on drop.
#[derive(Debug)]
pub struct DocumentLockGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Keyed mutex: one `tokio::sync::Mutex` per document key, created lazily.
#[derive(Default)]
pub struct DocumentLockManager {
    keys: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn key_mutex(&self, key: &str) -> Arc<Mutex<()>> {
        let mut keys = self.keys.lock().await;
        keys.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key` with a bounded wait. On timeout, returns
    /// `TransportError::DocumentLocked` (§4.2).
    pub async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<DocumentLockGuard, TransportError> {
        let mutex = self.key_mutex(key).await;
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(DocumentLockGuard { _guard: guard }),
            Err(_) => Err(TransportError::DocumentLocked {
                key: key.to_string(),
            }),
        }
    }

    /// Derive the document identity key from a command's argument payload,
    /// falling back to the application tag as a single global key (§4.2).
    pub fn derive_key(application: &str, args: &serde_json::Value) -> String {
        args.get("documentId")
            .and_then(|v| v.as_str())
            .map(|s| format!("{application}:{s}"))
            .unwrap_or_else(|| format!("{application}:__global__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_blocks_until_first_releases() {
        let manager = Arc::new(DocumentLockManager::new());
        let guard = manager.acquire("doc-1", Duration::from_secs(1)).await.unwrap();

        let manager2 = manager.clone();
        let waiter = tokio::spawn(async move {
            manager2.acquire("doc-1", Duration::from_millis(200)).await
        });

        // The waiter should still be pending shortly after: held by `guard`.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn timeout_returns_document_locked() {
        let manager = Arc::new(DocumentLockManager::new());
        let _guard = manager.acquire("doc-1", Duration::from_secs(5)).await.unwrap();

        let err = manager
            .acquire("doc-1", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::DocumentLocked { .. }));
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let manager = DocumentLockManager::new();
        let _a = manager.acquire("doc-a", Duration::from_secs(1)).await.unwrap();
        let _b = manager.acquire("doc-b", Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn key_derivation_falls_back_to_application_global() {
        let args = serde_json::json!({});
        assert_eq!(
            DocumentLockManager::derive_key("indesign", &args),
            "indesign:__global__"
        );
        let args = serde_json::json!({"documentId": "brochure-1"});
        assert_eq!(
            DocumentLockManager::derive_key("indesign", &args),
            "indesign:brochure-1"
        );
    }
}
