use actix_web::{get, web, Responder, Result};
use std::sync::Arc;

use crate::configuration::DeployerSettings;
use crate::helpers::JsonResponse;
use crate::ledger::StepLedger;
use crate::middleware::Caller;
use crate::models::AttemptProgress;

/// `GET /api/v1/deployments/active`
///
/// The caller's running attempts plus those that finished within the recency window.
#[tracing::instrument(name = "List active attempts", skip(ledger, settings))]
#[get("/active")]
pub async fn active_handler(
    caller: Caller,
    ledger: web::Data<Arc<dyn StepLedger>>,
    settings: web::Data<DeployerSettings>,
) -> Result<impl Responder> {
    let window = chrono::Duration::seconds(settings.active_window_secs);
    let attempts = ledger
        .list_active_attempts(caller.id(), window)
        .await
        .map_err(|err| {
            JsonResponse::<AttemptProgress>::build().internal_server_error(err)
        })?;

    Ok(JsonResponse::build()
        .set_list(attempts)
        .ok("Active attempts fetched"))
}

/// `GET /api/v1/deployments/{attempt_id}`
#[tracing::instrument(name = "Get attempt by ID", skip(ledger))]
#[get("/{attempt_id}")]
pub async fn item_handler(
    caller: Caller,
    path: web::Path<i32>,
    ledger: web::Data<Arc<dyn StepLedger>>,
) -> Result<impl Responder> {
    let attempt_id = path.into_inner();
    let progress = ledger.fetch_attempt(attempt_id).await.map_err(|err| {
        JsonResponse::<AttemptProgress>::build().internal_server_error(err)
    })?;

    match progress {
        // attempts of other users are reported as missing
        Some(progress) if progress.attempt.user_id == caller.id() => Ok(JsonResponse::build()
            .set_item(progress)
            .ok("Attempt fetched")),
        _ => Err(JsonResponse::<AttemptProgress>::build().not_found("Attempt not found")),
    }
}
