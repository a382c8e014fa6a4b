use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;

use crate::models::{AttemptStatus, DeployAttempt, LogType};

#[derive(Debug, sqlx::FromRow)]
struct AttemptRow {
    id: i32,
    module_id: i32,
    environment_id: i32,
    user_id: String,
    status: String,
    log_type: String,
    version: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    output_log: Option<String>,
}

impl TryFrom<AttemptRow> for DeployAttempt {
    type Error = String;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(DeployAttempt {
            id: row.id,
            module_id: row.module_id,
            environment_id: row.environment_id,
            user_id: row.user_id,
            status: row.status.parse()?,
            log_type: row.log_type.parse()?,
            version: row.version,
            start_time: row.start_time,
            end_time: row.end_time,
            output_log: row.output_log,
        })
    }
}

const COLUMNS: &str = "id, module_id, environment_id, user_id, status, log_type, version, \
                       start_time, end_time, output_log";

#[tracing::instrument(name = "Insert deploy attempt", skip(pool))]
pub async fn insert(
    pool: &PgPool,
    module_id: i32,
    environment_id: i32,
    user_id: &str,
    log_type: LogType,
) -> Result<i32, String> {
    let query_span = tracing::info_span!("Saving deploy attempt to database");
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO deploy_attempt (module_id, environment_id, user_id, status, log_type, start_time)
        VALUES ($1, $2, $3, $4, $5, NOW())
        RETURNING id
        "#,
    )
    .bind(module_id)
    .bind(environment_id)
    .bind(user_id)
    .bind(AttemptStatus::Deploying.to_string())
    .bind(log_type.to_string())
    .fetch_one(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to insert deploy attempt: {:?}", err);
        format!("Failed to insert deploy attempt: {}", err)
    })
}

#[tracing::instrument(name = "Complete deploy attempt", skip(pool, output_log))]
pub async fn complete(
    pool: &PgPool,
    attempt_id: i32,
    status: AttemptStatus,
    version: Option<&str>,
    output_log: Option<&str>,
) -> Result<(), String> {
    let query_span = tracing::info_span!("Updating deploy attempt");
    let result = sqlx::query(
        r#"
        UPDATE deploy_attempt
        SET status = $2, version = $3, output_log = $4, end_time = NOW()
        WHERE id = $1
        "#,
    )
    .bind(attempt_id)
    .bind(status.to_string())
    .bind(version)
    .bind(output_log)
    .execute(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to complete deploy attempt: {:?}", err);
        format!("Failed to complete deploy attempt: {}", err)
    })?;

    if result.rows_affected() == 0 {
        return Err(format!("attempt {} does not exist", attempt_id));
    }
    Ok(())
}

#[tracing::instrument(name = "Fetch deploy attempt", skip(pool))]
pub async fn fetch(pool: &PgPool, attempt_id: i32) -> Result<Option<DeployAttempt>, String> {
    let query_span = tracing::info_span!("Fetching deploy attempt");
    let sql = format!("SELECT {} FROM deploy_attempt WHERE id = $1", COLUMNS);
    sqlx::query_as::<_, AttemptRow>(&sql)
        .bind(attempt_id)
        .fetch_optional(pool)
        .instrument(query_span)
        .await
        .map_err(|err| {
            tracing::error!("Failed to fetch deploy attempt: {:?}", err);
            format!("Failed to fetch deploy attempt: {}", err)
        })?
        .map(DeployAttempt::try_from)
        .transpose()
}

/// Attempts still running, or finished less than `window_secs` ago, newest first.
#[tracing::instrument(name = "Fetch active deploy attempts", skip(pool))]
pub async fn fetch_active_by_user(
    pool: &PgPool,
    user_id: &str,
    window_secs: f64,
) -> Result<Vec<DeployAttempt>, String> {
    let query_span = tracing::info_span!("Fetching active deploy attempts");
    let sql = format!(
        r#"
        SELECT {}
        FROM deploy_attempt
        WHERE user_id = $1
          AND (status IN ('pending', 'deploying')
               OR end_time >= NOW() - make_interval(secs => $2))
        ORDER BY start_time DESC, id DESC
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, AttemptRow>(&sql)
        .bind(user_id)
        .bind(window_secs)
        .fetch_all(pool)
        .instrument(query_span)
        .await
        .map_err(|err| {
            tracing::error!("Failed to fetch active deploy attempts: {:?}", err);
            format!("Failed to fetch active deploy attempts: {}", err)
        })?
        .into_iter()
        .map(DeployAttempt::try_from)
        .collect()
}
