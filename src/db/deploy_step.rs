use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;

use crate::models::{DeployStep, StepKey, StepSection, StepStatus};

#[derive(Debug, sqlx::FromRow)]
struct StepRow {
    deploy_attempt_id: i32,
    step_key: String,
    section: String,
    status: String,
    message: Option<String>,
    order_index: i32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<StepRow> for DeployStep {
    type Error = String;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(DeployStep {
            deploy_attempt_id: row.deploy_attempt_id,
            step_key: row.step_key.parse()?,
            section: row.section.parse()?,
            status: row.status.parse()?,
            message: row.message,
            order_index: row.order_index,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// Insert-or-update keyed by (attempt, step key).
///
/// `order_index` is taken from the number of rows the attempt already has and is
/// never touched again. `started_at` is stamped by the first `running` write and
/// `finished_at` by terminal writes. A NULL message leaves the stored one in place.
#[tracing::instrument(name = "Upsert deploy step", skip(pool, message))]
pub async fn upsert(
    pool: &PgPool,
    attempt_id: i32,
    step_key: StepKey,
    section: StepSection,
    status: StepStatus,
    message: Option<&str>,
) -> Result<(), String> {
    let query_span = tracing::info_span!("Saving deploy step to database");
    sqlx::query(
        r#"
        INSERT INTO deploy_step (
            deploy_attempt_id, step_key, section, status, message, order_index,
            started_at, finished_at
        )
        VALUES (
            $1, $2, $3, $4, $5,
            (SELECT COUNT(*) FROM deploy_step WHERE deploy_attempt_id = $1),
            CASE WHEN $4 = 'running' THEN NOW() END,
            CASE WHEN $4 IN ('success', 'failed') THEN NOW() END
        )
        ON CONFLICT (deploy_attempt_id, step_key) DO UPDATE
        SET status = EXCLUDED.status,
            message = COALESCE(EXCLUDED.message, deploy_step.message),
            started_at = COALESCE(deploy_step.started_at, EXCLUDED.started_at),
            finished_at = EXCLUDED.finished_at
        "#,
    )
    .bind(attempt_id)
    .bind(step_key.as_str())
    .bind(section.to_string())
    .bind(status.to_string())
    .bind(message)
    .execute(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to upsert deploy step: {:?}", err);
        format!("Failed to upsert deploy step: {}", err)
    })
    .map(|_| ())
}

#[tracing::instrument(name = "Fetch deploy steps", skip(pool))]
pub async fn fetch_by_attempts(
    pool: &PgPool,
    attempt_ids: &[i32],
) -> Result<Vec<DeployStep>, String> {
    if attempt_ids.is_empty() {
        return Ok(vec![]);
    }

    let query_span = tracing::info_span!("Fetching deploy steps");
    sqlx::query_as::<_, StepRow>(
        r#"
        SELECT deploy_attempt_id, step_key, section, status, message, order_index,
               started_at, finished_at
        FROM deploy_step
        WHERE deploy_attempt_id = ANY($1)
        ORDER BY deploy_attempt_id, order_index
        "#,
    )
    .bind(attempt_ids)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch deploy steps: {:?}", err);
        format!("Failed to fetch deploy steps: {}", err)
    })?
    .into_iter()
    .map(DeployStep::try_from)
    .collect()
}
