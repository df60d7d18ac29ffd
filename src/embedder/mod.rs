//! Embedder port
//!
//! Turns a text document into a unit vector of fixed dimension D. The port
//! is best-effort everywhere: when the provider is unreachable the registry
//! stores no embedding and search falls back to token overlap.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::config::EmbedderConfig;
use crate::error::{Error, Result};

/// Text → unit vector of dimension D
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The fixed dimension D every vector must have
    fn dimension(&self) -> usize;

    /// Embed a document; `Error::Embedder` when the provider is unavailable
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// HTTP embedding provider client
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbedderConfig,
}

impl HttpEmbedder {
    /// Build a client for the configured provider
    pub fn new(config: EmbedderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Embedder(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self.client.post(&self.config.endpoint).json(&json!({
            "model": self.config.model,
            "input": text,
        }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Embedder(format!("Provider unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Embedder(format!(
                "Provider returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Embedder(format!("Undecodable provider response: {e}")))?;
        let raw = extract_vector(&body)
            .ok_or_else(|| Error::Embedder("No embedding in provider response".into()))?;

        if raw.len() != self.config.dimension {
            return Err(Error::Embedder(format!(
                "Provider returned dimension {} (expected {})",
                raw.len(),
                self.config.dimension
            )));
        }

        normalize(raw)
    }
}

/// Accepts both `{"embedding": [...]}` and the OpenAI-style
/// `{"data": [{"embedding": [...]}]}` response shapes.
fn extract_vector(body: &serde_json::Value) -> Option<Vec<f32>> {
    let raw = body
        .get("embedding")
        .or_else(|| body.get("data")?.get(0)?.get("embedding"))?;
    raw.as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Scale a vector to unit length
///
/// A zero vector cannot be normalized and is reported as a provider error.
pub fn normalize(mut vector: Vec<f32>) -> Result<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return Err(Error::Embedder("Provider returned a zero vector".into()));
    }
    for x in &mut vector {
        *x /= norm;
    }
    Ok(vector)
}

/// Pack a vector into the little-endian f32 blob stored under `embed:{id}`
#[must_use]
pub fn pack_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for x in vector {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

/// Unpack a stored blob; `None` when the length is not a multiple of 4
#[must_use]
pub fn unpack_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize(vec![3.0, 4.0]).unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_rejects_zero() {
        assert!(normalize(vec![0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.75];
        let unpacked = unpack_vector(&pack_vector(&v)).unwrap();
        assert_eq!(unpacked, v);
    }

    #[test]
    fn test_unpack_rejects_ragged_blob() {
        assert!(unpack_vector(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_extract_vector_shapes() {
        let flat = serde_json::json!({"embedding": [0.1, 0.2]});
        assert_eq!(extract_vector(&flat).unwrap().len(), 2);

        let nested = serde_json::json!({"data": [{"embedding": [0.1, 0.2, 0.3]}]});
        assert_eq!(extract_vector(&nested).unwrap().len(), 3);

        let empty = serde_json::json!({"status": "ok"});
        assert!(extract_vector(&empty).is_none());
    }
}
