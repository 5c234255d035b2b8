//! C11: concurrent component health probes with a per-check timeout,
//! synthesized into a single degradation level and system state, with a
//! budget-pressure overlay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetLevel, BudgetState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
    pub last_checked_at: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemState {
    Healthy,
    Degraded,
    Paused,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub state: SystemState,
    pub degradation_level: u8,
    pub components: Vec<ComponentHealth>,
    pub active_agents: u32,
    pub max_parallel_agents: u32,
    pub queue_depth: u64,
    pub dead_letter_count: u64,
    pub last_updated_at: DateTime<Utc>,
}

/// One named probe. Implementations wrap whatever collaborator they're
/// checking (broker connection, queue adapter, workspace) — the registry
/// only ever sees this trait.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> anyhow::Result<ComponentStatus>;
}

pub struct HealthMonitor {
    checks: Vec<Arc<dyn HealthCheck>>,
    check_timeout: Duration,
    last_state: std::sync::Mutex<Option<SystemState>>,
}

impl HealthMonitor {
    pub fn new(checks: Vec<Arc<dyn HealthCheck>>, check_timeout: Duration) -> Self {
        Self {
            checks,
            check_timeout,
            last_state: std::sync::Mutex::new(None),
        }
    }

    /// Runs every registered check concurrently, each under its own
    /// timeout. A timeout, an `Err`, or a panic-unwind-free failure all
    /// become `offline` — the check itself is never awaited past the
    /// timeout; a late result is simply discarded (spec §5).
    pub async fn check_health(
        &self,
        active_agents: u32,
        max_parallel_agents: u32,
        queue_depth: u64,
        dead_letter_count: u64,
        budget: Option<&BudgetState>,
    ) -> SystemHealth {
        let probes = self.checks.iter().map(|check| {
            let check = Arc::clone(check);
            let timeout = self.check_timeout;
            async move {
                let name = check.name().to_string();
                let now = Utc::now();
                match tokio::time::timeout(timeout, check.check()).await {
                    Ok(Ok(status)) => ComponentHealth {
                        name,
                        status,
                        last_checked_at: now,
                        details: None,
                    },
                    Ok(Err(e)) => ComponentHealth {
                        name,
                        status: ComponentStatus::Offline,
                        last_checked_at: now,
                        details: Some(e.to_string()),
                    },
                    Err(_) => ComponentHealth {
                        name,
                        status: ComponentStatus::Offline,
                        last_checked_at: now,
                        details: Some(format!("health check timed out after {}ms", timeout.as_millis())),
                    },
                }
            }
        });

        let components: Vec<ComponentHealth> = futures::future::join_all(probes).await;
        let degradation_level = Self::degradation_level(&components, budget);
        let state = Self::state_for_level(degradation_level);

        {
            let mut last_state = self.last_state.lock().expect("health monitor mutex poisoned");
            if last_state.is_some_and(|previous| previous != state) {
                tracing::warn!(from = ?*last_state, to = ?state, degradation_level, "system health state transition");
            }
            *last_state = Some(state);
        }

        SystemHealth {
            state,
            degradation_level,
            components,
            active_agents,
            max_parallel_agents,
            queue_depth,
            dead_letter_count,
            last_updated_at: Utc::now(),
        }
    }

    fn degradation_level(components: &[ComponentHealth], budget: Option<&BudgetState>) -> u8 {
        let degraded = components.iter().filter(|c| c.status == ComponentStatus::Degraded).count();
        let offline = components.iter().filter(|c| c.status == ComponentStatus::Offline).count();

        let base = if offline == 0 && degraded == 0 {
            0
        } else if offline == 0 {
            1
        } else if offline == 1 {
            2
        } else if offline < components.len() {
            3
        } else {
            4
        };

        match budget.map(|b| b.level) {
            Some(BudgetLevel::Critical) => base.max(2),
            Some(BudgetLevel::Exhausted) => base.max(3),
            _ => base,
        }
    }

    fn state_for_level(level: u8) -> SystemState {
        match level {
            0 => SystemState::Healthy,
            1 | 2 => SystemState::Degraded,
            3 => SystemState::Paused,
            _ => SystemState::Offline,
        }
    }
}
