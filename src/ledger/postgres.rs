use async_trait::async_trait;
use sqlx::PgPool;

use super::StepLedger;
use crate::db;
use crate::models::{
    AttemptProgress, AttemptStatus, DeployAttempt, DeployStep, LogType, StepKey, StepSection,
    StepStatus,
};

pub struct PgStepLedger {
    pool: PgPool,
}

impl PgStepLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn with_steps(attempts: Vec<DeployAttempt>, steps: Vec<DeployStep>) -> Vec<AttemptProgress> {
    let mut progress: Vec<AttemptProgress> = attempts
        .into_iter()
        .map(|attempt| AttemptProgress {
            attempt,
            steps: vec![],
        })
        .collect();
    for step in steps {
        if let Some(entry) = progress
            .iter_mut()
            .find(|entry| entry.attempt.id == step.deploy_attempt_id)
        {
            entry.steps.push(step);
        }
    }
    progress
}

#[async_trait]
impl StepLedger for PgStepLedger {
    async fn begin_attempt(
        &self,
        module_id: i32,
        environment_id: i32,
        user_id: &str,
        log_type: LogType,
    ) -> Result<i32, String> {
        db::deploy_attempt::insert(&self.pool, module_id, environment_id, user_id, log_type).await
    }

    async fn record_step(
        &self,
        attempt_id: i32,
        step_key: StepKey,
        section: StepSection,
        status: StepStatus,
        message: Option<&str>,
    ) -> Result<(), String> {
        db::deploy_step::upsert(&self.pool, attempt_id, step_key, section, status, message).await
    }

    async fn complete_attempt(
        &self,
        attempt_id: i32,
        status: AttemptStatus,
        version: Option<&str>,
        output_log: Option<&str>,
    ) -> Result<(), String> {
        db::deploy_attempt::complete(&self.pool, attempt_id, status, version, output_log).await
    }

    async fn fetch_attempt(&self, attempt_id: i32) -> Result<Option<AttemptProgress>, String> {
        let Some(attempt) = db::deploy_attempt::fetch(&self.pool, attempt_id).await? else {
            return Ok(None);
        };
        let steps = db::deploy_step::fetch_by_attempts(&self.pool, &[attempt_id]).await?;
        Ok(with_steps(vec![attempt], steps).pop())
    }

    async fn list_active_attempts(
        &self,
        user_id: &str,
        window: chrono::Duration,
    ) -> Result<Vec<AttemptProgress>, String> {
        let window_secs = window.num_milliseconds() as f64 / 1000.0;
        let attempts =
            db::deploy_attempt::fetch_active_by_user(&self.pool, user_id, window_secs).await?;
        let ids: Vec<i32> = attempts.iter().map(|attempt| attempt.id).collect();
        let steps = db::deploy_step::fetch_by_attempts(&self.pool, &ids).await?;
        Ok(with_steps(attempts, steps))
    }
}
