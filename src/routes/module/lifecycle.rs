use actix_web::{post, web, Responder, Result};
use serde::Deserialize;
use std::sync::Arc;

use crate::deploy::DeploymentOrchestrator;
use crate::helpers::JsonResponse;
use crate::middleware::Caller;
use crate::services::AccessPolicy;

#[derive(Debug, Deserialize)]
pub struct LifecycleQuery {
    pub environment_id: Option<i32>,
}

async fn ensure_operator(
    access: &dyn AccessPolicy,
    caller: &Caller,
    module_id: i32,
) -> Result<()> {
    if access.can_operate(caller.id(), module_id).await? {
        Ok(())
    } else {
        Err(JsonResponse::<()>::build().forbidden("You are not allowed to operate this module"))
    }
}

/// `POST /api/v1/modules/{module_id}/restart?environment_id=`
#[tracing::instrument(name = "Restart module handler", skip(orchestrator, access))]
#[post("/{module_id}/restart")]
pub async fn restart_handler(
    caller: Caller,
    path: web::Path<i32>,
    query: web::Query<LifecycleQuery>,
    orchestrator: web::Data<DeploymentOrchestrator>,
    access: web::Data<Arc<dyn AccessPolicy>>,
) -> Result<impl Responder> {
    let module_id = path.into_inner();
    ensure_operator(access.get_ref().as_ref(), &caller, module_id).await?;

    orchestrator
        .restart(module_id, query.environment_id, caller.id())
        .await?;
    Ok(JsonResponse::<()>::build().ok("Module restarted"))
}

/// `POST /api/v1/modules/{module_id}/stop?environment_id=`
#[tracing::instrument(name = "Stop module handler", skip(orchestrator, access))]
#[post("/{module_id}/stop")]
pub async fn stop_handler(
    caller: Caller,
    path: web::Path<i32>,
    query: web::Query<LifecycleQuery>,
    orchestrator: web::Data<DeploymentOrchestrator>,
    access: web::Data<Arc<dyn AccessPolicy>>,
) -> Result<impl Responder> {
    let module_id = path.into_inner();
    ensure_operator(access.get_ref().as_ref(), &caller, module_id).await?;

    orchestrator
        .stop(module_id, query.environment_id, caller.id())
        .await?;
    Ok(JsonResponse::<()>::build().ok("Module stopped"))
}
