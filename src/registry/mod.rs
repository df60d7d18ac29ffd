//! Agent registry
//!
//! Owns agent records, their metric counters, the embedding blobs, and the
//! by-type / by-capability index sets. Mutations on a single agent are
//! serialized through a per-id lock; cross-agent reads are concurrent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::RegistryConfig;
use crate::embedder::{pack_vector, unpack_vector, Embedder};
use crate::error::{Error, Result};
use crate::storage::{keys, Storage, StorageMode};

pub mod events;
pub mod model;

pub use events::{EventBus, RegistryEvent};
pub use model::{
    AgentMetrics, AgentRecord, AgentRequirements, AgentStatus, CommunicationMode,
    PublicAgentView, RegistrationRequest,
};

/// Filters applied by `list` and by the search candidate selection
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ListFilter {
    pub agent_type: Option<String>,
    pub capability: Option<String>,
    pub status: Option<AgentStatus>,
}

/// One search candidate with everything the ranking needs
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub record: AgentRecord,
    pub embedding: Option<Vec<f32>>,
    pub reputation: f64,
}

/// Aggregates produced by one liveness sweep
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepReport {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
    /// Agents transitioned to dead during this sweep
    pub newly_dead: Vec<String>,
    /// alive/dead counts keyed by agent type
    pub per_type: HashMap<String, TypeCounts>,
    /// Sum of `total_requests` across agents
    pub total_requests: u64,
    /// Average response time weighted by request volume
    pub avg_response_time_s: f64,
    /// Agents that could not be read this tick
    pub read_failures: usize,
}

/// Alive/dead split for one agent type
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TypeCounts {
    pub alive: usize,
    pub dead: usize,
}

/// Registry statistics for `GET /agents` summaries and the stats frames
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub alive_agents: usize,
    pub dead_agents: usize,
    pub agent_types: HashMap<String, usize>,
    pub agents_with_embeddings: usize,
    pub storage_mode: StorageMode,
}

/// The agent registry service
#[derive(Clone)]
pub struct Registry {
    storage: Storage,
    embedder: Option<Arc<dyn Embedder>>,
    config: RegistryConfig,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    events: EventBus,
}

impl Registry {
    /// Build the registry over its storage and optional embedder
    #[must_use]
    pub fn new(
        storage: Storage,
        embedder: Option<Arc<dyn Embedder>>,
        config: RegistryConfig,
    ) -> Self {
        let events = EventBus::new(storage.clone());
        Self {
            storage,
            embedder,
            config,
            locks: Arc::new(DashMap::new()),
            events,
        }
    }

    /// The registry's event bus
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The registry configuration
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock_for(&self, agent_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Register a new agent from a validated temp-token context
    ///
    /// The caller has already consumed the temp token and checked that its
    /// `agent_id`/`agent_type` match the request. Embedding failure is
    /// logged and the agent is stored without a vector.
    pub async fn register(&self, request: RegistrationRequest) -> Result<AgentRecord> {
        request.validate(&self.config.allowed_agent_types)?;

        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&request.embedding_document()).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!(
                        agent_id = %request.agent_id,
                        error = %e,
                        "Embedding unavailable, registering without a vector"
                    );
                    None
                }
            },
            None => None,
        };

        let record = AgentRecord::from_request(request, Utc::now());
        let metrics = AgentMetrics::new(record.registered_at);
        let blob = embedding.as_deref().map(pack_vector);

        let lock = self.lock_for(&record.agent_id);
        let _guard = lock.lock().await;

        self.storage
            .register_txn(
                &record.agent_id,
                &record.to_fields()?,
                &metrics.to_fields(),
                &record.agent_type,
                &record.capabilities,
                blob.as_deref(),
            )
            .await?;

        self.events
            .emit(RegistryEvent::Registered {
                agent_id: record.agent_id.clone(),
                agent_type: record.agent_type.clone(),
            })
            .await;

        tracing::info!(
            agent_id = %record.agent_id,
            agent_type = %record.agent_type,
            has_embedding = blob.is_some(),
            "Agent registered"
        );
        Ok(record)
    }

    /// Record a heartbeat: `status=alive`, `last_seen=now`
    pub async fn heartbeat(&self, agent_id: &str) -> Result<()> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let store = self.storage.active();
        let key = keys::agent(agent_id);
        let previous = store
            .hget(&key, "status")
            .await?
            .ok_or_else(|| Error::NotFound(format!("Agent '{agent_id}' is not registered")))?;

        let now = Utc::now();
        store
            .hset_all(
                &key,
                &[
                    ("status".into(), "alive".into()),
                    ("last_seen".into(), now.to_rfc3339()),
                ],
            )
            .await?;

        if previous == "dead" {
            self.events
                .emit(RegistryEvent::StatusChange {
                    agent_id: agent_id.to_string(),
                    status: AgentStatus::Alive,
                })
                .await;
        }
        self.events
            .emit(RegistryEvent::Heartbeat {
                agent_id: agent_id.to_string(),
            })
            .await;
        Ok(())
    }

    /// Fold one request outcome into an agent's metrics
    pub async fn report_metrics(
        &self,
        agent_id: &str,
        response_time_s: f64,
        success: bool,
    ) -> Result<AgentMetrics> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let store = self.storage.active();
        if store.hget(&keys::agent(agent_id), "agent_id").await?.is_none() {
            return Err(Error::NotFound(format!(
                "Agent '{agent_id}' is not registered"
            )));
        }

        let now = Utc::now();
        let fields = store.hget_all(&keys::metrics(agent_id)).await?;
        let mut metrics = AgentMetrics::from_fields(&fields, now);
        metrics.record(response_time_s, success, now);
        store
            .hset_all(&keys::metrics(agent_id), &metrics.to_fields())
            .await?;
        Ok(metrics)
    }

    /// Remove an agent and all of its keys
    pub async fn unregister(&self, agent_id: &str) -> Result<()> {
        let lock = self.lock_for(agent_id);
        {
            let _guard = lock.lock().await;

            let record = self.load_record(agent_id).await?;
            self.storage
                .remove_agent_keys(agent_id, &record.agent_type, &record.capabilities)
                .await;
        }
        self.locks.remove(agent_id);

        self.events
            .emit(RegistryEvent::Unregistered {
                agent_id: agent_id.to_string(),
            })
            .await;
        tracing::info!(agent_id = %agent_id, "Agent unregistered");
        Ok(())
    }

    /// Fetch one agent record
    pub async fn get(&self, agent_id: &str) -> Result<AgentRecord> {
        self.load_record(agent_id).await
    }

    /// Fetch one agent's metrics
    pub async fn get_metrics(&self, agent_id: &str) -> Result<AgentMetrics> {
        let store = self.storage.active();
        if store.hget(&keys::agent(agent_id), "agent_id").await?.is_none() {
            return Err(Error::NotFound(format!(
                "Agent '{agent_id}' is not registered"
            )));
        }
        let fields = store.hget_all(&keys::metrics(agent_id)).await?;
        Ok(AgentMetrics::from_fields(&fields, Utc::now()))
    }

    /// Fetch one agent's stored embedding, if any
    pub async fn embedding_of(&self, agent_id: &str) -> Result<Option<Vec<f32>>> {
        let blob = self.storage.active().get(&keys::embedding(agent_id)).await?;
        Ok(blob.as_deref().and_then(unpack_vector))
    }

    /// Ids matching a filter, resolved through the index sets where possible
    pub async fn filtered_ids(&self, filter: &ListFilter) -> Result<Vec<String>> {
        let store = self.storage.active();
        let mut ids: Vec<String> = match (&filter.agent_type, &filter.capability) {
            (Some(agent_type), None) => store.smembers(&keys::type_index(agent_type)).await?,
            (None, Some(capability)) => {
                store.smembers(&keys::capability_index(capability)).await?
            }
            (Some(agent_type), Some(capability)) => {
                let by_type = store.smembers(&keys::type_index(agent_type)).await?;
                let by_cap = store.smembers(&keys::capability_index(capability)).await?;
                by_type.into_iter().filter(|id| by_cap.contains(id)).collect()
            }
            (None, None) => self.all_ids().await?,
        };
        ids.sort();
        Ok(ids)
    }

    /// Records matching a filter, sorted by agent id
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<AgentRecord>> {
        let ids = self.filtered_ids(filter).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_record(&id).await {
                Ok(record) => {
                    if let Some(status) = filter.status {
                        if record.status != status {
                            continue;
                        }
                    }
                    records.push(record);
                }
                Err(Error::NotFound(_)) => {
                    // Index ahead of record under recovery; reconcile by skipping.
                    tracing::debug!(agent_id = %id, "Index entry without record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// Candidates for the search engine: record + embedding + reputation
    pub async fn search_candidates(&self, filter: &ListFilter) -> Result<Vec<SearchCandidate>> {
        let records = self.list(filter).await?;
        let store = self.storage.active();
        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            let embedding = store
                .get(&keys::embedding(&record.agent_id))
                .await
                .ok()
                .flatten()
                .as_deref()
                .and_then(unpack_vector);
            let metrics_fields = store
                .hget_all(&keys::metrics(&record.agent_id))
                .await
                .unwrap_or_default();
            let reputation =
                AgentMetrics::from_fields(&metrics_fields, record.last_seen).reputation_score;
            candidates.push(SearchCandidate {
                record,
                embedding,
                reputation,
            });
        }
        Ok(candidates)
    }

    /// Registry statistics for the stats frames and `stats()` reads
    pub async fn stats(&self) -> Result<RegistryStats> {
        let records = self.list(&ListFilter::default()).await?;
        let store = self.storage.active();

        let mut agent_types: HashMap<String, usize> = HashMap::new();
        let mut alive = 0;
        let mut with_embeddings = 0;
        for record in &records {
            *agent_types.entry(record.agent_type.clone()).or_default() += 1;
            if record.status == AgentStatus::Alive {
                alive += 1;
            }
            if store
                .get(&keys::embedding(&record.agent_id))
                .await
                .ok()
                .flatten()
                .is_some()
            {
                with_embeddings += 1;
            }
        }

        Ok(RegistryStats {
            total_agents: records.len(),
            alive_agents: alive,
            dead_agents: records.len() - alive,
            agent_types,
            agents_with_embeddings: with_embeddings,
            storage_mode: self.storage.mode(),
        })
    }

    /// One liveness sweep: age out stale agents and aggregate metrics
    ///
    /// Agents whose `last_seen` is older than the heartbeat timeout become
    /// dead; each transition emits `status_change`. A failure to read one
    /// agent is counted and the sweep continues.
    pub async fn sweep(&self) -> SweepReport {
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let now = Utc::now();
        let mut report = SweepReport::default();
        let mut weighted_time = 0.0_f64;

        let ids = match self.all_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Sweep could not enumerate agents");
                report.read_failures += 1;
                return report;
            }
        };

        for agent_id in ids {
            let lock = self.lock_for(&agent_id);
            let _guard = lock.lock().await;

            let mut record = match self.load_record(&agent_id).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "Sweep read failed");
                    report.read_failures += 1;
                    continue;
                }
            };

            if record.status == AgentStatus::Alive && now - record.last_seen > timeout {
                let set = self
                    .storage
                    .active()
                    .hset(&keys::agent(&agent_id), "status", "dead")
                    .await;
                match set {
                    Ok(()) => {
                        record.status = AgentStatus::Dead;
                        report.newly_dead.push(agent_id.clone());
                        self.events
                            .emit(RegistryEvent::StatusChange {
                                agent_id: agent_id.clone(),
                                status: AgentStatus::Dead,
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(agent_id = %agent_id, error = %e, "Sweep write failed");
                        report.read_failures += 1;
                    }
                }
            }

            report.total += 1;
            let counts = report
                .per_type
                .entry(record.agent_type.clone())
                .or_default();
            if record.status == AgentStatus::Alive {
                report.alive += 1;
                counts.alive += 1;
            } else {
                report.dead += 1;
                counts.dead += 1;
            }

            if let Ok(fields) = self
                .storage
                .active()
                .hget_all(&keys::metrics(&agent_id))
                .await
            {
                let metrics = AgentMetrics::from_fields(&fields, record.last_seen);
                report.total_requests += metrics.total_requests;
                weighted_time += metrics.avg_response_time_s * metrics.total_requests as f64;
            }
        }

        if report.total_requests > 0 {
            report.avg_response_time_s = weighted_time / report.total_requests as f64;
        }
        report
    }

    async fn all_ids(&self) -> Result<Vec<String>> {
        let keys = self.storage.active().scan_prefix("agent:").await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix("agent:").map(str::to_string))
            .collect())
    }

    async fn load_record(&self, agent_id: &str) -> Result<AgentRecord> {
        let fields = self
            .storage
            .active()
            .hget_all(&keys::agent(agent_id))
            .await?;
        if fields.is_empty() {
            return Err(Error::NotFound(format!(
                "Agent '{agent_id}' is not registered"
            )));
        }
        AgentRecord::from_fields(&fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;

    fn registry() -> Registry {
        Registry::new(
            Storage::in_memory(),
            None,
            RegistryConfig {
                allowed_agent_types: vec!["testing".into(), "automation".into()],
                heartbeat_timeout_secs: 60,
                cleanup_interval_secs: 0,
            },
        )
    }

    fn request(id: &str) -> RegistrationRequest {
        RegistrationRequest {
            agent_id: id.into(),
            agent_type: "testing".into(),
            owner: "tests".into(),
            public_key: "k".repeat(40),
            version: "1.0.0".into(),
            endpoint: "http://localhost:9000".into(),
            communication_mode: CommunicationMode::Remote,
            name: id.to_uppercase(),
            capabilities: vec!["echo".into()],
            features: vec![],
            language_support: vec![],
            policy_tags: vec![],
            max_tokens: None,
            rate_limit: None,
            requirements: None,
            context_brief: "toy".into(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_register_then_get() {
        let registry = registry();
        let record = registry.register(request("echo-1")).await.unwrap();
        assert_eq!(record.status, AgentStatus::Alive);

        let loaded = registry.get("echo-1").await.unwrap();
        assert_eq!(loaded.capabilities, vec!["echo"]);
        assert_eq!(loaded.status, AgentStatus::Alive);
    }

    #[tokio::test]
    async fn test_duplicate_register_leaves_state_unchanged() {
        let registry = registry();
        registry.register(request("dup")).await.unwrap();

        let mut second = request("dup");
        second.name = "OTHER".into();
        let err = registry.register(second).await.unwrap_err();
        assert_eq!(err.code(), "duplicate_agent_id");

        assert_eq!(registry.get("dup").await.unwrap().name, "DUP");
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_type() {
        let registry = registry();
        let mut bad = request("x");
        bad.agent_type = "rogue".into();
        assert_eq!(
            registry.register(bad).await.unwrap_err().code(),
            "type_not_allowed"
        );
    }

    #[tokio::test]
    async fn test_heartbeat_updates_last_seen() {
        let registry = registry();
        let record = registry.register(request("hb")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.heartbeat("hb").await.unwrap();
        let after = registry.get("hb").await.unwrap();
        assert!(after.last_seen > record.last_seen);
        assert_eq!(after.status, AgentStatus::Alive);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent() {
        let registry = registry();
        assert!(matches!(
            registry.heartbeat("ghost").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_report_metrics_accumulates() {
        let registry = registry();
        registry.register(request("m")).await.unwrap();
        registry.report_metrics("m", 0.5, true).await.unwrap();
        let metrics = registry.report_metrics("m", 1.0, false).await.unwrap();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.error_count, 1);

        let loaded = registry.get_metrics("m").await.unwrap();
        assert_eq!(loaded.total_requests, 2);
    }

    #[tokio::test]
    async fn test_unregister_clears_everything() {
        let registry = registry();
        registry.register(request("bye")).await.unwrap();
        registry.unregister("bye").await.unwrap();

        assert!(matches!(
            registry.get("bye").await.unwrap_err(),
            Error::NotFound(_)
        ));
        let ids = registry
            .filtered_ids(&ListFilter {
                agent_type: Some("testing".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(ids.is_empty());
        let by_cap = registry
            .filtered_ids(&ListFilter {
                capability: Some("echo".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(by_cap.is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_by_type_and_capability() {
        let registry = registry();
        registry.register(request("a")).await.unwrap();
        let mut b = request("b");
        b.agent_type = "automation".into();
        b.capabilities = vec!["analysis".into()];
        registry.register(b).await.unwrap();

        let testing = registry
            .list(&ListFilter {
                agent_type: Some("testing".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(testing.len(), 1);
        assert_eq!(testing[0].agent_id, "a");

        let analysis = registry
            .list(&ListFilter {
                capability: Some("analysis".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(analysis.len(), 1);
        assert_eq!(analysis[0].agent_id, "b");
    }

    #[tokio::test]
    async fn test_sweep_marks_stale_agents_dead() {
        let registry = Registry::new(
            Storage::in_memory(),
            None,
            RegistryConfig {
                allowed_agent_types: vec!["testing".into()],
                heartbeat_timeout_secs: 1,
                cleanup_interval_secs: 0,
            },
        );
        registry.register(request("stale")).await.unwrap();

        // Backdate last_seen past the timeout
        let old = (Utc::now() - chrono::Duration::seconds(5)).to_rfc3339();
        registry
            .storage
            .active()
            .hset(&keys::agent("stale"), "last_seen", &old)
            .await
            .unwrap();

        let mut events = registry.events().subscribe();
        let report = registry.sweep().await;
        assert_eq!(report.newly_dead, vec!["stale"]);
        assert_eq!(report.dead, 1);
        assert_eq!(registry.get("stale").await.unwrap().status, AgentStatus::Dead);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            RegistryEvent::StatusChange {
                status: AgentStatus::Dead,
                ..
            }
        ));

        // A heartbeat brings it back within one tick
        registry.heartbeat("stale").await.unwrap();
        let report = registry.sweep().await;
        assert!(report.newly_dead.is_empty());
        assert_eq!(report.alive, 1);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let registry = registry();
        registry.register(request("s1")).await.unwrap();
        registry.register(request("s2")).await.unwrap();
        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.alive_agents, 2);
        assert_eq!(stats.agent_types.get("testing"), Some(&2));
        assert_eq!(stats.agents_with_embeddings, 0);
    }
}
