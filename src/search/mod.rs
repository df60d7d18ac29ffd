//! Semantic search over registry embeddings
//!
//! Candidates come from the registry indexes; scoring is cosine similarity
//! against stored embeddings, with a token-overlap fallback whenever the
//! query (or a candidate) has no vector. Ranking is deterministic: score
//! descending, then `last_seen` descending, then `agent_id` ascending.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::pagination::{paginate, PageInfo, PageParams};
use crate::registry::{AgentStatus, ListFilter, Registry, SearchCandidate};

/// Weighting applied to the reputation re-rank: `0.7 + 0.3 · reputation`
const REPUTATION_FLOOR: f32 = 0.7;
const REPUTATION_SPAN: f32 = 0.3;

/// Search request body
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default)]
    pub weighted: bool,
    #[serde(default)]
    pub agent_type: Option<String>,
    /// Candidates must advertise every listed capability
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub page: Option<PageParams>,
}

/// One ranked result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub agent_id: String,
    pub name: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub context_brief: String,
    pub status: AgentStatus,
    pub score: f32,
    pub reputation: f64,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

/// Search response with ranking metadata
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub pagination: PageInfo,
    /// Effective `top_k` after clamping to the configured maximum
    pub top_k_applied: usize,
    pub min_similarity_applied: f32,
    pub weighted: bool,
    /// True when scoring used token overlap instead of embeddings
    pub fallback_used: bool,
}

/// The search engine
#[derive(Clone)]
pub struct SearchEngine {
    registry: Registry,
    embedder: Option<Arc<dyn Embedder>>,
    config: SearchConfig,
}

impl SearchEngine {
    /// Engine over the registry's candidates and the optional embedder
    #[must_use]
    pub fn new(
        registry: Registry,
        embedder: Option<Arc<dyn Embedder>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            config,
        }
    }

    /// Run a search
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let top_k_requested = request.top_k.unwrap_or(self.config.top_k);
        let top_k = top_k_requested.min(self.config.max_top_k);
        let min_similarity = request
            .min_similarity
            .unwrap_or(self.config.min_similarity);
        let page = request.page.unwrap_or_default().clamped(self.config.max_top_k);

        if top_k == 0 {
            return Ok(SearchResponse {
                results: Vec::new(),
                pagination: PageInfo::new(page, 0),
                top_k_applied: 0,
                min_similarity_applied: min_similarity,
                weighted: request.weighted,
                fallback_used: false,
            });
        }

        let filter = ListFilter {
            agent_type: request.agent_type.clone(),
            capability: request.capabilities.first().cloned(),
            status: Some(request.status.unwrap_or(AgentStatus::Alive)),
        };
        let mut candidates = self.registry.search_candidates(&filter).await?;
        if request.capabilities.len() > 1 {
            candidates.retain(|c| {
                request
                    .capabilities
                    .iter()
                    .all(|cap| c.record.capabilities.contains(cap))
            });
        }

        let query_vector = match &self.embedder {
            Some(embedder) => match embedder.embed(&request.query).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::debug!(error = %e, "Query embedding failed, using token overlap");
                    None
                }
            },
            None => None,
        };
        let fallback_used = query_vector.is_none();

        let mut hits = rank(
            candidates,
            query_vector.as_deref(),
            &request.query,
            min_similarity,
            request.weighted,
        );
        hits.truncate(top_k);

        let (results, pagination) = paginate(hits, page);
        Ok(SearchResponse {
            results,
            pagination,
            top_k_applied: top_k,
            min_similarity_applied: min_similarity,
            weighted: request.weighted,
            fallback_used,
        })
    }
}

/// Score, threshold, weight, and order the candidates
fn rank(
    candidates: Vec<SearchCandidate>,
    query_vector: Option<&[f32]>,
    query_text: &str,
    min_similarity: f32,
    weighted: bool,
) -> Vec<SearchHit> {
    let query_tokens = tokenize(query_text);

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let similarity = match (query_vector, &candidate.embedding) {
                (Some(query), Some(embedding)) => cosine_similarity(query, embedding),
                // Either side lacks a vector: score by token overlap
                _ => token_overlap(&query_tokens, &candidate.record),
            };
            if similarity < min_similarity {
                return None;
            }
            let score = if weighted {
                similarity * (REPUTATION_FLOOR + REPUTATION_SPAN * candidate.reputation as f32)
            } else {
                similarity
            };
            Some(SearchHit {
                agent_id: candidate.record.agent_id,
                name: candidate.record.name,
                agent_type: candidate.record.agent_type,
                capabilities: candidate.record.capabilities,
                context_brief: candidate.record.context_brief,
                status: candidate.record.status,
                score,
                reputation: candidate.reputation,
                last_seen: candidate.record.last_seen,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
    hits
}

/// Cosine similarity; vectors are stored unit-length but the norms are
/// still applied so unnormalized inputs cannot inflate scores
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Share of query tokens covered by the candidate's capability and brief
/// token set
fn token_overlap(query_tokens: &HashSet<String>, record: &crate::registry::AgentRecord) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let mut doc = String::new();
    doc.push_str(&record.context_brief);
    doc.push(' ');
    doc.push_str(&record.capabilities.join(" "));
    doc.push(' ');
    doc.push_str(&record.name);
    let doc_tokens = tokenize(&doc);

    let matched = query_tokens.intersection(&doc_tokens).count();
    matched as f32 / query_tokens.len() as f32
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 2)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentRecord, CommunicationMode};
    use chrono::{Duration, Utc};

    fn record(id: &str, caps: &[&str], brief: &str, seen_offset_secs: i64) -> AgentRecord {
        let now = Utc::now();
        AgentRecord {
            agent_id: id.into(),
            agent_type: "testing".into(),
            owner: String::new(),
            public_key: "k".repeat(40),
            version: String::new(),
            endpoint: "http://localhost:1".into(),
            communication_mode: CommunicationMode::Remote,
            name: id.to_uppercase(),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            features: vec![],
            language_support: vec![],
            policy_tags: vec![],
            max_tokens: None,
            rate_limit: None,
            requirements: None,
            context_brief: brief.into(),
            metadata: serde_json::Map::new(),
            status: AgentStatus::Alive,
            registered_at: now,
            last_seen: now - Duration::seconds(seen_offset_secs),
        }
    }

    fn candidate(
        id: &str,
        caps: &[&str],
        brief: &str,
        embedding: Option<Vec<f32>>,
        reputation: f64,
    ) -> SearchCandidate {
        SearchCandidate {
            record: record(id, caps, brief, 0),
            embedding,
            reputation,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_token_overlap_scenario() {
        // The data-processing trio: C covers the query fully, A partially,
        // B not at all.
        let q = tokenize("analyze data");
        let c = record("c", &["data-processing", "analysis"], "analyze datasets", 0);
        let a = record("a", &["data-processing"], "process CSV", 0);
        let b = record("b", &["image"], "image OCR", 0);
        assert!((token_overlap(&q, &c) - 1.0).abs() < 1e-6);
        assert!((token_overlap(&q, &a) - 0.5).abs() < 1e-6);
        assert_eq!(token_overlap(&q, &b), 0.0);
    }

    #[test]
    fn test_rank_threshold_and_order() {
        let candidates = vec![
            candidate("a", &["data-processing"], "process CSV", None, 0.5),
            candidate("b", &["image"], "image OCR", None, 0.5),
            candidate(
                "c",
                &["data-processing", "analysis"],
                "analyze datasets",
                None,
                0.9,
            ),
        ];
        let hits = rank(candidates, None, "analyze data", 0.3, false);
        let ids: Vec<_> = hits.iter().map(|h| h.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_rank_weighted_preserves_leader() {
        let candidates = vec![
            candidate("a", &["data-processing"], "process CSV", None, 0.5),
            candidate(
                "c",
                &["data-processing", "analysis"],
                "analyze datasets",
                None,
                0.9,
            ),
        ];
        let unweighted = rank(candidates.clone(), None, "analyze data", 0.3, false);
        let weighted = rank(candidates, None, "analyze data", 0.3, true);
        assert_eq!(weighted[0].agent_id, "c");
        // Weighting with a high reputation never lowers the leader's score
        // relative to the unweighted leader ordering.
        assert!(weighted[0].score <= unweighted[0].score);
        assert!(weighted[0].score >= unweighted[0].score * REPUTATION_FLOOR);
    }

    #[test]
    fn test_rank_cosine_path() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            candidate("x", &["cap"], "", Some(vec![1.0, 0.0]), 0.0),
            candidate("y", &["cap"], "", Some(vec![0.6, 0.8]), 0.0),
            candidate("z", &["cap"], "", Some(vec![0.0, 1.0]), 0.0),
        ];
        let hits = rank(candidates, Some(&query), "ignored", 0.5, false);
        let ids: Vec<_> = hits.iter().map(|h| h.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_tie_break_last_seen_then_id() {
        let now = Utc::now();
        let mut newer = candidate("bbb", &["cap"], "same brief", None, 0.0);
        newer.record.last_seen = now;
        let mut older = candidate("aaa", &["cap"], "same brief", None, 0.0);
        older.record.last_seen = now - Duration::seconds(60);
        let mut equal = candidate("aab", &["cap"], "same brief", None, 0.0);
        equal.record.last_seen = now;

        let hits = rank(vec![older, newer, equal], None, "same brief", 0.1, false);
        let ids: Vec<_> = hits.iter().map(|h| h.agent_id.as_str()).collect();
        // Same score: last_seen desc first, then id asc
        assert_eq!(ids, vec!["aab", "bbb", "aaa"]);
    }
}
