//! Step ledger: the durable record of every attempt and its phases.
//!
//! Each attempt owns a disjoint set of rows, so concurrent attempts never contend
//! on the same records. Polling views are plain reads over this state.

mod memory;
mod postgres;

pub use memory::MemoryStepLedger;
pub use postgres::PgStepLedger;

use async_trait::async_trait;

use crate::models::{AttemptProgress, AttemptStatus, LogType, StepKey, StepSection, StepStatus};

#[async_trait]
pub trait StepLedger: Send + Sync {
    /// Creates an attempt in `deploying` state and returns its id.
    async fn begin_attempt(
        &self,
        module_id: i32,
        environment_id: i32,
        user_id: &str,
        log_type: LogType,
    ) -> Result<i32, String>;

    /// Upserts the step row keyed by (attempt, step key).
    ///
    /// The first write fixes `order_index`; the first `running` stamps `started_at`;
    /// terminal statuses stamp `finished_at`. A `None` message keeps the stored one.
    async fn record_step(
        &self,
        attempt_id: i32,
        step_key: StepKey,
        section: StepSection,
        status: StepStatus,
        message: Option<&str>,
    ) -> Result<(), String>;

    async fn complete_attempt(
        &self,
        attempt_id: i32,
        status: AttemptStatus,
        version: Option<&str>,
        output_log: Option<&str>,
    ) -> Result<(), String>;

    async fn fetch_attempt(&self, attempt_id: i32) -> Result<Option<AttemptProgress>, String>;

    /// Attempts of `user_id` still running, or finished within `window`, newest first.
    async fn list_active_attempts(
        &self,
        user_id: &str,
        window: chrono::Duration,
    ) -> Result<Vec<AttemptProgress>, String>;
}
