use actix_web::{post, web, Responder, Result};
use serde::Serialize;
use serde_valid::Validate;
use std::sync::Arc;

use crate::deploy::DeploymentOrchestrator;
use crate::helpers::JsonResponse;
use crate::middleware::Caller;
use crate::models::DeploymentRequest;
use crate::services::AccessPolicy;

#[derive(Debug, Clone, Serialize)]
pub struct DeployedVersion {
    pub version: String,
}

/// `POST /api/v1/deployments`
///
/// Runs a full deploy and answers once the attempt is finished. Progress is
/// visible meanwhile through the active-attempts endpoint.
#[tracing::instrument(name = "Deploy module", skip(orchestrator, access, request))]
#[post("")]
pub async fn create_handler(
    caller: Caller,
    request: web::Json<DeploymentRequest>,
    orchestrator: web::Data<DeploymentOrchestrator>,
    access: web::Data<Arc<dyn AccessPolicy>>,
) -> Result<impl Responder> {
    let mut request = request.into_inner();
    request.requested_by = caller.id().to_string();

    if let Err(errors) = request.validate() {
        return Err(JsonResponse::<DeployedVersion>::build().bad_request(errors.to_string()));
    }
    if !access.can_operate(caller.id(), request.module_id).await? {
        return Err(JsonResponse::<DeployedVersion>::build()
            .forbidden("You are not allowed to deploy this module"));
    }

    let version = orchestrator.deploy(&request).await?;
    Ok(JsonResponse::build()
        .set_item(DeployedVersion { version })
        .ok("Deployment finished"))
}
