//! Workflow rule configuration
//!
//! The transition and effect tables load from a JSON file named by
//! `WORKFLOW_RULES`; absent (or unreadable) rules fall back to the compiled
//! defaults. Adding a status is a config change, not a redeploy.

use crate::actor::Role;
use crate::effects::{EffectKind, EffectTable};
use crate::status::{EntityKind, TransitionTable};
use anyhow::Context;
use serde::Deserialize;
use std::{env, fs};
use tracing::{info, warn};

pub const RULES_ENV: &str = "WORKFLOW_RULES";

pub struct WorkflowConfig {
    pub transitions: TransitionTable,
    pub effects: EffectTable,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            transitions: TransitionTable::default(),
            effects: EffectTable::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawRules {
    #[serde(default)]
    transitions: Vec<RawTransition>,
    #[serde(default)]
    effects: Vec<RawEffect>,
}

#[derive(Deserialize)]
struct RawTransition {
    entity: String,
    from: String,
    to: String,
    roles: Vec<String>,
}

#[derive(Deserialize)]
struct RawEffect {
    entity: String,
    from: Option<String>,
    to: String,
    effects: Vec<String>,
}

impl WorkflowConfig {
    /// Rules from the `WORKFLOW_RULES` file when set, built-in defaults
    /// otherwise. A broken file logs and falls back rather than taking the
    /// workflow down.
    pub fn load() -> Self {
        let Ok(path) = env::var(RULES_ENV) else {
            info!("{RULES_ENV} not set, using built-in workflow rules");
            return Self::default();
        };

        match Self::from_file(&path) {
            Ok(config) => {
                info!("loaded workflow rules from {path}");
                config
            }
            Err(e) => {
                warn!("failed to load workflow rules from {path}: {e:#}, using built-in rules");
                Self::default()
            }
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        Self::from_json(&raw)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let raw: RawRules = serde_json::from_str(json).context("parsing workflow rules")?;

        let mut transitions = TransitionTable::new();
        for rule in &raw.transitions {
            let entity: EntityKind = rule.entity.parse()?;
            let roles = rule
                .roles
                .iter()
                .map(|role| role.parse::<Role>())
                .collect::<anyhow::Result<Vec<_>>>()?;
            transitions.allow(entity, &rule.from, &rule.to, &roles);
        }

        let mut effects = EffectTable::new();
        for rule in &raw.effects {
            let entity: EntityKind = rule.entity.parse()?;
            let kinds = rule
                .effects
                .iter()
                .map(|effect| effect.parse::<EffectKind>())
                .collect::<anyhow::Result<Vec<_>>>()?;
            effects.add(entity, rule.from.as_deref(), &rule.to, &kinds);
        }

        Ok(Self {
            transitions,
            effects,
        })
    }
}
