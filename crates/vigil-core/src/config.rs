//! Single TOML file + `VIGIL_*` environment overrides (§6).

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level config (`vigil.toml` + `VIGIL_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            proactive: ProactiveConfig::default(),
            engine: EngineConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_context_budget_tokens")]
    pub context_budget_tokens: u32,
    #[serde(default)]
    pub capsule: CapsuleConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_budget_tokens: default_context_budget_tokens(),
            capsule: CapsuleConfig::default(),
            decay: DecayConfig::default(),
            retrieval: RetrievalConfig::default(),
            feedback: FeedbackConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_capsule_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: default_capsule_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            half_life_days: default_half_life_days(),
        }
    }
}

/// Retrieval tuning (§4.C defaults: `rrfK=60, ftsWeight=0.6, vecWeight=0.4,
/// recencyWeight=0.2, halfLifeDays=30`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_fts_weight")]
    pub fts_weight: f64,
    #[serde(default = "default_vec_weight")]
    pub vec_weight: f64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            fts_weight: default_fts_weight(),
            vec_weight: default_vec_weight(),
            recency_weight: default_recency_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_finalize_after_ms")]
    pub finalize_after_ms: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            finalize_after_ms: default_finalize_after_ms(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_model_role")]
    pub model_role: String,
    #[serde(default = "default_max_episodes_per_run")]
    pub max_episodes_per_run: u32,
    #[serde(default = "default_dirty_group_limit")]
    pub dirty_group_limit: u32,
    #[serde(default = "default_dirty_public_style_limit")]
    pub dirty_public_style_limit: u32,
    #[serde(default = "default_dirty_person_limit")]
    pub dirty_person_limit: u32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            model_role: default_model_role(),
            max_episodes_per_run: default_max_episodes_per_run(),
            dirty_group_limit: default_dirty_group_limit(),
            dirty_public_style_limit: default_dirty_public_style_limit(),
            dirty_person_limit: default_dirty_person_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub dm: ScopeLimitsConfig,
    #[serde(default)]
    pub group: ScopeLimitsConfig,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            dm: ScopeLimitsConfig::default(),
            group: ScopeLimitsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeLimitsConfig {
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,
    #[serde(default = "default_max_per_week")]
    pub max_per_week: u32,
    #[serde(default = "default_cooldown_after_user_ms")]
    pub cooldown_after_user_ms: u64,
    #[serde(default = "default_pause_after_ignored")]
    pub pause_after_ignored: u32,
}

impl Default for ScopeLimitsConfig {
    fn default() -> Self {
        Self {
            max_per_day: default_max_per_day(),
            max_per_week: default_max_per_week(),
            cooldown_after_user_ms: default_cooldown_after_user_ms(),
            pause_after_ignored: default_pause_after_ignored(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub limiter: RateLimiterConfig,
    #[serde(default)]
    pub per_chat_limiter: PerChatLimiterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_limiter_capacity")]
    pub capacity: u32,
    #[serde(default = "default_limiter_refill")]
    pub refill_per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_limiter_capacity(),
            refill_per_second: default_limiter_refill(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerChatLimiterConfig {
    #[serde(default = "default_limiter_capacity")]
    pub capacity: u32,
    #[serde(default = "default_limiter_refill")]
    pub refill_per_second: f64,
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval: u64,
}

impl Default for PerChatLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_limiter_capacity(),
            refill_per_second: default_limiter_refill(),
            stale_after_ms: default_stale_after_ms(),
            sweep_interval: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch_limit: default_fetch_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_tokens_default")]
    pub max_tokens_default: u32,
    #[serde(default = "default_identity_prompt_max_tokens")]
    pub identity_prompt_max_tokens: u32,
    #[serde(default = "default_prompt_skills_max_tokens")]
    pub prompt_skills_max_tokens: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens_default: default_max_tokens_default(),
            identity_prompt_max_tokens: default_identity_prompt_max_tokens(),
            prompt_skills_max_tokens: default_prompt_skills_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_reactive_max_steps")]
    pub reactive_max_steps: u32,
    #[serde(default = "default_proactive_max_steps")]
    pub proactive_max_steps: u32,
    #[serde(default = "default_max_regens")]
    pub max_regens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            reactive_max_steps: default_reactive_max_steps(),
            proactive_max_steps: default_proactive_max_steps(),
            max_regens: default_max_regens(),
        }
    }
}

/// `identity_dir`, `skills_dir`, and `data_dir` must be within the project
/// directory after symlink resolution (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub identity_dir: Option<String>,
    pub skills_dir: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            identity_dir: None,
            skills_dir: None,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_context_budget_tokens() -> u32 {
    4000
}
fn default_capsule_max_tokens() -> u32 {
    400
}
fn default_half_life_days() -> f64 {
    30.0
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_fts_weight() -> f64 {
    0.6
}
fn default_vec_weight() -> f64 {
    0.4
}
fn default_recency_weight() -> f64 {
    0.2
}
fn default_finalize_after_ms() -> u64 {
    6 * 60 * 60 * 1000
}
fn default_success_threshold() -> f64 {
    0.7
}
fn default_failure_threshold() -> f64 {
    0.3
}
fn default_interval_ms() -> u64 {
    60_000
}
fn default_model_role() -> String {
    "fast".to_string()
}
fn default_max_episodes_per_run() -> u32 {
    50
}
fn default_dirty_group_limit() -> u32 {
    10
}
fn default_dirty_public_style_limit() -> u32 {
    10
}
fn default_dirty_person_limit() -> u32 {
    10
}
fn default_heartbeat_interval_ms() -> u64 {
    60_000
}
fn default_max_per_day() -> u32 {
    3
}
fn default_max_per_week() -> u32 {
    10
}
fn default_cooldown_after_user_ms() -> u64 {
    2 * 60 * 60 * 1000
}
fn default_pause_after_ignored() -> u32 {
    3
}
fn default_limiter_capacity() -> u32 {
    20
}
fn default_limiter_refill() -> f64 {
    1.0
}
fn default_stale_after_ms() -> u64 {
    30 * 60 * 1000
}
fn default_sweep_interval_ms() -> u64 {
    5 * 60 * 1000
}
fn default_fetch_limit() -> u32 {
    50
}
fn default_max_tokens_default() -> u32 {
    8000
}
fn default_identity_prompt_max_tokens() -> u32 {
    1000
}
fn default_prompt_skills_max_tokens() -> u32 {
    1000
}
fn default_reactive_max_steps() -> u32 {
    6
}
fn default_proactive_max_steps() -> u32 {
    3
}
fn default_max_regens() -> u32 {
    1
}
fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.vigil", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.vigil/vigil.toml", home)
}

impl VigilConfig {
    /// Load config from a TOML file with `VIGIL_*` env var overrides, then
    /// validate numeric bounds and path containment (§6: "any violation is
    /// a fatal config error").
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: VigilConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("VIGIL_").split("_"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Enforce the numeric bounds and path-containment rules §6 requires.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.memory.retrieval;
        for (field, value) in [
            ("memory.retrieval.rrf_k", r.rrf_k),
            ("memory.retrieval.fts_weight", r.fts_weight),
            ("memory.retrieval.vec_weight", r.vec_weight),
            ("memory.retrieval.recency_weight", r.recency_weight),
            ("memory.decay.half_life_days", self.memory.decay.half_life_days),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::OutOfRange {
                    field: field.to_string(),
                    value: value.to_string(),
                    constraint: "must be finite and non-negative".to_string(),
                });
            }
        }

        if self.memory.consolidation.interval_ms < 60_000 {
            return Err(ConfigError::OutOfRange {
                field: "memory.consolidation.interval_ms".to_string(),
                value: self.memory.consolidation.interval_ms.to_string(),
                constraint: "floor is 60000ms".to_string(),
            });
        }

        for (field, path) in [
            ("database.identity_dir", &self.database.identity_dir),
            ("database.skills_dir", &self.database.skills_dir),
        ] {
            if let Some(p) = path {
                check_contained(field, p)?;
            }
        }
        check_contained("database.data_dir", &self.database.data_dir)?;

        Ok(())
    }
}

/// Canonicalize `path` (resolving symlinks) and verify it is contained
/// within the current project directory. Missing paths are skipped — they
/// are created on first use, not validated against a directory that may
/// not exist yet.
fn check_contained(field: &str, path: &str) -> Result<(), ConfigError> {
    let project_root = std::env::current_dir().map_err(|e| ConfigError::Load(e.to_string()))?;
    let candidate = std::path::Path::new(path);
    let canonical = match candidate.canonicalize() {
        Ok(c) => c,
        Err(_) => return Ok(()),
    };
    let canonical_root = match project_root.canonicalize() {
        Ok(c) => c,
        Err(_) => project_root,
    };
    if !canonical.starts_with(&canonical_root) {
        return Err(ConfigError::PathEscape {
            field: field.to_string(),
            path: path.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let cfg = VigilConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn negative_retrieval_weight_is_rejected() {
        let mut cfg = VigilConfig::default();
        cfg.memory.retrieval.fts_weight = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn nan_half_life_is_rejected() {
        let mut cfg = VigilConfig::default();
        cfg.memory.decay.half_life_days = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn consolidation_interval_below_floor_is_rejected() {
        let mut cfg = VigilConfig::default();
        cfg.memory.consolidation.interval_ms = 1_000;
        assert!(cfg.validate().is_err());
    }
}
