//! §4.G: the periodic consolidation tick and its `start`/`stop` lifecycle.
//! Grounded on the poll-and-select shutdown shape used for the event
//! scheduler's own background loop — a `tokio::time::interval` raced
//! against a `watch::Receiver<bool>` so a single shutdown broadcast stops
//! every background task together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use vigil_core::config::ConsolidationConfig;
use vigil_core::llm::{LlmBackend, ModelRole};
use vigil_core::time::MonotonicMs;
use vigil_memory::manager::MemoryStore;
use vigil_extractor::MemoryExtractor;

use crate::capsules::{synthesize_group_capsule, synthesize_public_style_capsule};
use crate::catchup::run_catch_up_extraction;
use crate::error::Result;
use crate::health::HealthTracker;
use crate::lessons::{mirror_promoted_lessons, run_lesson_promotion};
use crate::person::refresh_person_capsule;

const GROUP_CAPSULE_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1_000;
const PUBLIC_STYLE_WINDOW_MS: i64 = 14 * 24 * 60 * 60 * 1_000;
const PERSON_CAPSULE_STALE_MS: i64 = 7 * 24 * 60 * 60 * 1_000;
const DIRTY_LEASE_MS: i64 = 5 * 60 * 1_000;
const EPISODE_SAMPLE_LIMIT: usize = 200;

fn model_role_from_config(role: &str) -> ModelRole {
    match role {
        "fast" => ModelRole::Fast,
        _ => ModelRole::Default,
    }
}

pub struct ConsolidationLoop {
    memory: Arc<MemoryStore>,
    extractor: Arc<MemoryExtractor>,
    llm: Arc<dyn LlmBackend>,
    config: ConsolidationConfig,
    health: Arc<HealthTracker>,
}

impl ConsolidationLoop {
    pub fn new(
        memory: Arc<MemoryStore>,
        extractor: Arc<MemoryExtractor>,
        llm: Arc<dyn LlmBackend>,
        config: ConsolidationConfig,
    ) -> Self {
        Self { memory, extractor, llm, config, health: Arc::new(HealthTracker::new()) }
    }

    pub fn health(&self) -> Arc<HealthTracker> {
        self.health.clone()
    }

    /// Spawns the background tick loop, returning a handle the caller
    /// joins on shutdown. No-op (never spawns) when disabled in config.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("consolidation loop disabled, not starting");
            return None;
        }
        let interval_ms = self.config.interval_ms;
        Some(tokio::spawn(async move {
            info!(interval_ms, "consolidation loop started");
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let started = MonotonicMs::now();
                        match self.run_tick().await {
                            Ok(()) => {
                                let elapsed = started.age_ms(MonotonicMs::now());
                                self.health.record_success(MonotonicMs::now(), elapsed);
                            }
                            Err(err) => {
                                error!(%err, "consolidation tick failed");
                                let elapsed = started.age_ms(MonotonicMs::now());
                                self.health.record_failure(MonotonicMs::now(), elapsed, err.to_string());
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("consolidation loop shutting down");
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Runs every step once. Each step is independently recoverable, so a
    /// failure partway through is logged and the remaining steps still
    /// run rather than aborting the whole tick.
    pub async fn run_tick(&self) -> Result<()> {
        let cancel = CancellationToken::new();
        let role = model_role_from_config(&self.config.model_role);

        if let Err(err) = self.consolidate_group_capsules(role, cancel.clone()).await {
            warn!(%err, "group capsule consolidation step failed");
        }
        if let Err(err) = self.consolidate_public_styles(role, cancel.clone()).await {
            warn!(%err, "public style consolidation step failed");
        }
        if let Err(err) = self.catch_up_extraction(cancel.clone()).await {
            warn!(%err, "catch-up extraction step failed");
        }
        if let Err(err) = self.refresh_person_capsules(role, cancel.clone()).await {
            warn!(%err, "person capsule refresh step failed");
        }
        if let Err(err) = run_lesson_promotion(&self.memory) {
            warn!(%err, "lesson promotion step failed");
        }
        if let Err(err) = mirror_promoted_lessons(&self.memory) {
            warn!(%err, "lesson mirroring step failed");
        }
        Ok(())
    }

    async fn consolidate_group_capsules(&self, role: ModelRole, cancel: CancellationToken) -> Result<()> {
        let claim_id = Uuid::new_v4().to_string();
        let claims = self.memory.claim_dirty_group_capsules(self.config.dirty_group_limit, &claim_id, DIRTY_LEASE_MS)?;
        for claim in claims {
            let since = MonotonicMs::now().minus_ms(GROUP_CAPSULE_WINDOW_MS);
            let episodes = self.memory.list_recent_episodes_for_chat(&claim.key, since, EPISODE_SAMPLE_LIMIT)?;
            if let Some(capsule) = synthesize_group_capsule(&self.llm, role, &episodes, cancel.clone()).await {
                self.memory.set_group_capsule(&claim.key, &capsule)?;
            }
            self.memory.complete_dirty_group_capsule(&claim.key, &claim_id, claim.first_dirty_at_ms)?;
        }
        Ok(())
    }

    async fn consolidate_public_styles(&self, role: ModelRole, cancel: CancellationToken) -> Result<()> {
        let claim_id = Uuid::new_v4().to_string();
        let claims = self.memory.claim_dirty_public_styles(self.config.dirty_public_style_limit, &claim_id, DIRTY_LEASE_MS)?;
        for claim in claims {
            let since = MonotonicMs::now().minus_ms(PUBLIC_STYLE_WINDOW_MS);
            let episodes = self.memory.list_recent_dm_episodes_for_person(&claim.key, since, EPISODE_SAMPLE_LIMIT)?;
            if let Some(capsule) = synthesize_public_style_capsule(&self.llm, role, &episodes, cancel.clone()).await {
                self.memory.set_public_style_capsule(&claim.key, &capsule)?;
            }
            self.memory.complete_dirty_public_style(&claim.key, &claim_id, claim.first_dirty_at_ms)?;
        }
        Ok(())
    }

    async fn catch_up_extraction(&self, cancel: CancellationToken) -> Result<()> {
        let processed =
            run_catch_up_extraction(&self.memory, &self.extractor, self.config.max_episodes_per_run as usize, cancel).await?;
        if processed > 0 {
            info!(processed, "catch-up extraction processed episodes");
        }
        Ok(())
    }

    async fn refresh_person_capsules(&self, role: ModelRole, cancel: CancellationToken) -> Result<()> {
        let stale_before = MonotonicMs::now().minus_ms(PERSON_CAPSULE_STALE_MS);
        let people = self.memory.list_people_with_stale_capsule(stale_before, self.config.dirty_person_limit)?;
        for person in people {
            if cancel.is_cancelled() {
                break;
            }
            refresh_person_capsule(&self.memory, &self.llm, role, &person.person_id, cancel.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_role_defaults_to_default_for_unknown_strings() {
        assert!(matches!(model_role_from_config("default"), ModelRole::Default));
        assert!(matches!(model_role_from_config("fast"), ModelRole::Fast));
        assert!(matches!(model_role_from_config("anything-else"), ModelRole::Default));
    }
}
