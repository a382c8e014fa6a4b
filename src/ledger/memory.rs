use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::StepLedger;
use crate::models::{
    AttemptProgress, AttemptStatus, DeployAttempt, DeployStep, LogType, StepKey, StepSection,
    StepStatus,
};

#[derive(Default)]
struct LedgerState {
    next_id: i32,
    attempts: BTreeMap<i32, DeployAttempt>,
    steps: HashMap<i32, Vec<DeployStep>>,
}

impl LedgerState {
    fn progress(&self, attempt: &DeployAttempt) -> AttemptProgress {
        let mut steps = self.steps.get(&attempt.id).cloned().unwrap_or_default();
        steps.sort_by_key(|step| step.order_index);
        AttemptProgress {
            attempt: attempt.clone(),
            steps,
        }
    }
}

/// Process-local ledger with the same semantics as the Postgres one.
#[derive(Default)]
pub struct MemoryStepLedger {
    state: RwLock<LedgerState>,
}

impl MemoryStepLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepLedger for MemoryStepLedger {
    async fn begin_attempt(
        &self,
        module_id: i32,
        environment_id: i32,
        user_id: &str,
        log_type: LogType,
    ) -> Result<i32, String> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let mut attempt =
            DeployAttempt::new(module_id, environment_id, user_id.to_string(), log_type);
        attempt.id = state.next_id;
        let id = attempt.id;
        state.attempts.insert(id, attempt);
        Ok(id)
    }

    async fn record_step(
        &self,
        attempt_id: i32,
        step_key: StepKey,
        section: StepSection,
        status: StepStatus,
        message: Option<&str>,
    ) -> Result<(), String> {
        let mut state = self.state.write().await;
        if !state.attempts.contains_key(&attempt_id) {
            return Err(format!("attempt {} does not exist", attempt_id));
        }

        let now = Utc::now();
        let steps = state.steps.entry(attempt_id).or_default();
        let next_index = steps.len() as i32;
        match steps.iter_mut().find(|step| step.step_key == step_key) {
            Some(step) => {
                step.status = status;
                if let Some(message) = message {
                    step.message = Some(message.to_string());
                }
                if status == StepStatus::Running && step.started_at.is_none() {
                    step.started_at = Some(now);
                }
                step.finished_at = status.is_terminal().then_some(now);
            }
            None => steps.push(DeployStep {
                deploy_attempt_id: attempt_id,
                step_key,
                section,
                status,
                message: message.map(str::to_string),
                order_index: next_index,
                started_at: (status == StepStatus::Running).then_some(now),
                finished_at: status.is_terminal().then_some(now),
            }),
        }
        Ok(())
    }

    async fn complete_attempt(
        &self,
        attempt_id: i32,
        status: AttemptStatus,
        version: Option<&str>,
        output_log: Option<&str>,
    ) -> Result<(), String> {
        let mut state = self.state.write().await;
        let attempt = state
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| format!("attempt {} does not exist", attempt_id))?;
        attempt.status = status;
        attempt.version = version.map(str::to_string);
        attempt.output_log = output_log.map(str::to_string);
        attempt.end_time = Some(Utc::now());
        Ok(())
    }

    async fn fetch_attempt(&self, attempt_id: i32) -> Result<Option<AttemptProgress>, String> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .get(&attempt_id)
            .map(|attempt| state.progress(attempt)))
    }

    async fn list_active_attempts(
        &self,
        user_id: &str,
        window: chrono::Duration,
    ) -> Result<Vec<AttemptProgress>, String> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .attempts
            .values()
            .rev()
            .filter(|attempt| attempt.user_id == user_id && attempt.is_active(now, window))
            .map(|attempt| state.progress(attempt))
            .collect())
    }
}
