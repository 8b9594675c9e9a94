//! Process-wide readiness of every source and ranking strategy.
//!
//! Transitions: `Uninitialized -> Ready | Failed` once at startup,
//! `Ready -> Failed` at runtime. `Failed` only leaves through
//! [`ComponentHealthRegistry::reinitialize`], which puts the component back to
//! `Uninitialized` for another startup probe.

use crate::config::ConfigError;
use crate::models::ComponentName;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Uninitialized,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentState {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl ComponentState {
    fn new(status: ComponentStatus, reason: Option<String>) -> Self {
        Self {
            status,
            reason,
            changed_at: Utc::now(),
        }
    }
}

/// A startup probe for one component.
pub type Probe = BoxFuture<'static, Result<(), String>>;

pub struct ComponentHealthRegistry {
    states: RwLock<BTreeMap<ComponentName, ComponentState>>,
    /// Bumped on every status transition.
    epoch: AtomicU64,
}

impl Default for ComponentHealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealthRegistry {
    pub fn new() -> Self {
        let states = ComponentName::ALL
            .into_iter()
            .map(|name| (name, ComponentState::new(ComponentStatus::Uninitialized, None)))
            .collect();
        Self {
            states: RwLock::new(states),
            epoch: AtomicU64::new(0),
        }
    }

    /// Run every probe concurrently. A failing or panicking probe only fails its
    /// own component.
    pub async fn initialize_all(&self, probes: Vec<(ComponentName, Probe)>) {
        let runs = probes.into_iter().map(|(name, probe)| async move {
            let outcome = match AssertUnwindSafe(probe).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(panic_message(panic.as_ref())),
            };
            (name, outcome)
        });

        for (name, outcome) in join_all(runs).await {
            match outcome {
                Ok(()) => {
                    if self.mark_ready(name) {
                        info!(component = %name, "component ready");
                    }
                }
                Err(reason) => {
                    error!(component = %name, reason = %reason, "component failed to initialize");
                    self.mark_failed(name, &reason);
                }
            }
        }
    }

    pub fn status(&self, name: ComponentName) -> ComponentStatus {
        self.states
            .read()
            .get(&name)
            .map(|s| s.status)
            .unwrap_or(ComponentStatus::Uninitialized)
    }

    pub fn is_ready(&self, name: ComponentName) -> bool {
        self.status(name) == ComponentStatus::Ready
    }

    pub fn all_ready(&self, names: &[ComponentName]) -> bool {
        let states = self.states.read();
        names.iter().all(|name| {
            states
                .get(name)
                .map(|s| s.status == ComponentStatus::Ready)
                .unwrap_or(false)
        })
    }

    /// Changes whenever any component changes status, so results computed
    /// under an older health snapshot can be told apart.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn status_snapshot(&self) -> BTreeMap<ComponentName, ComponentState> {
        self.states.read().clone()
    }

    /// `Uninitialized -> Ready`. Returns false if the component was in any other state.
    pub fn mark_ready(&self, name: ComponentName) -> bool {
        let mut states = self.states.write();
        match states.get(&name).map(|s| s.status) {
            Some(ComponentStatus::Uninitialized) | None => {
                states.insert(name, ComponentState::new(ComponentStatus::Ready, None));
                self.bump();
                true
            }
            Some(_) => false,
        }
    }

    /// Any non-failed state `-> Failed`. Returns false if it was already Failed.
    pub fn mark_failed(&self, name: ComponentName, reason: &str) -> bool {
        let mut states = self.states.write();
        if states.get(&name).map(|s| s.status) == Some(ComponentStatus::Failed) {
            return false;
        }
        states.insert(
            name,
            ComponentState::new(ComponentStatus::Failed, Some(reason.to_string())),
        );
        self.bump();
        drop(states);
        warn!(component = %name, reason, "component marked failed");
        true
    }

    /// `Failed -> Uninitialized`, so the next probe run may bring it back.
    pub fn reinitialize(&self, name: ComponentName) -> Result<(), ConfigError> {
        let mut states = self.states.write();
        match states.get(&name).map(|s| s.status) {
            Some(ComponentStatus::Failed) => {
                states.insert(name, ComponentState::new(ComponentStatus::Uninitialized, None));
                self.bump();
                info!(component = %name, "component reset for re-initialization");
                Ok(())
            }
            _ => Err(ConfigError::InvalidValue {
                key: "component".to_string(),
                value: format!("{} is not failed", name),
            }),
        }
    }

    /// Parse a component name coming from outside the process.
    pub fn component(name: &str) -> Result<ComponentName, ConfigError> {
        ComponentName::parse(name).ok_or_else(|| ConfigError::UnknownComponent(name.to_string()))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> Probe {
        async { Ok(()) }.boxed()
    }

    fn err(reason: &'static str) -> Probe {
        async move { Err(reason.to_string()) }.boxed()
    }

    fn panics(message: &'static str) -> Probe {
        async move {
            if !message.is_empty() {
                panic!("{}", message);
            }
            Ok(())
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let registry = ComponentHealthRegistry::new();
        registry
            .initialize_all(vec![
                (ComponentName::Content, ok()),
                (ComponentName::Latent, err("no factors")),
                (ComponentName::Embedding, panics("index corrupted")),
                (ComponentName::WeightedFusion, ok()),
            ])
            .await;

        assert!(registry.is_ready(ComponentName::Content));
        assert!(registry.is_ready(ComponentName::WeightedFusion));
        assert_eq!(registry.status(ComponentName::Latent), ComponentStatus::Failed);
        assert_eq!(registry.status(ComponentName::Embedding), ComponentStatus::Failed);
        assert_eq!(
            registry.status(ComponentName::LearnedRanker),
            ComponentStatus::Uninitialized
        );

        let snapshot = registry.status_snapshot();
        assert_eq!(snapshot[&ComponentName::Latent].reason.as_deref(), Some("no factors"));
        assert!(snapshot[&ComponentName::Embedding]
            .reason
            .as_deref()
            .unwrap()
            .contains("index corrupted"));
    }

    #[test]
    fn test_transitions() {
        let registry = ComponentHealthRegistry::new();
        assert!(registry.mark_ready(ComponentName::Content));
        assert!(!registry.mark_ready(ComponentName::Content));

        assert!(registry.mark_failed(ComponentName::Content, "timeout"));
        assert!(!registry.mark_failed(ComponentName::Content, "timeout again"));
        assert!(!registry.mark_ready(ComponentName::Content));
        assert!(!registry.is_ready(ComponentName::Content));
    }

    #[test]
    fn test_epoch_moves_only_on_transitions() {
        let registry = ComponentHealthRegistry::new();
        let start = registry.epoch();
        registry.mark_ready(ComponentName::Content);
        let ready = registry.epoch();
        assert!(ready > start);

        registry.mark_ready(ComponentName::Content);
        assert_eq!(registry.epoch(), ready);

        registry.mark_failed(ComponentName::Content, "down");
        assert!(registry.epoch() > ready);
    }

    #[test]
    fn test_reinitialize_only_from_failed() {
        let registry = ComponentHealthRegistry::new();
        assert!(registry.reinitialize(ComponentName::Latent).is_err());

        registry.mark_failed(ComponentName::Latent, "boom");
        assert!(registry.reinitialize(ComponentName::Latent).is_ok());
        assert_eq!(
            registry.status(ComponentName::Latent),
            ComponentStatus::Uninitialized
        );
        assert!(registry.mark_ready(ComponentName::Latent));
    }

    #[test]
    fn test_unknown_component_name() {
        assert_eq!(
            ComponentHealthRegistry::component("ranker"),
            Err(ConfigError::UnknownComponent("ranker".into()))
        );
        assert_eq!(
            ComponentHealthRegistry::component("learned_ranker"),
            Ok(ComponentName::LearnedRanker)
        );
    }

    #[test]
    fn test_all_ready() {
        let registry = ComponentHealthRegistry::new();
        registry.mark_ready(ComponentName::Content);
        assert!(registry.all_ready(&[ComponentName::Content]));
        assert!(!registry.all_ready(&[ComponentName::Content, ComponentName::WeightedFusion]));
    }
}
