use actix_web::{get, web, HttpResponse, Result};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;

use crate::helpers::JsonResponse;
use crate::middleware::Caller;
use crate::services::{AccessPolicy, LogTailer};

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub environment_id: Option<i32>,
    pub path: Option<String>,
}

/// Frames one output chunk as a server-sent event, one `data:` line per line.
pub fn sse_event(chunk: &str) -> String {
    let mut event = String::with_capacity(chunk.len() + 16);
    for line in chunk.lines() {
        event.push_str("data: ");
        event.push_str(line.trim_end_matches('\r'));
        event.push('\n');
    }
    if event.is_empty() {
        event.push_str("data: \n");
    }
    event.push('\n');
    event
}

/// `GET /api/v1/modules/{module_id}/logs?environment_id=&path=`
///
/// Streams the followed log as `text/event-stream`. The remote follower and its
/// session are released as soon as the client goes away.
#[tracing::instrument(name = "Stream module log handler", skip(tailer, access))]
#[get("/{module_id}/logs")]
pub async fn logs_handler(
    caller: Caller,
    path: web::Path<i32>,
    query: web::Query<LogQuery>,
    tailer: web::Data<LogTailer>,
    access: web::Data<Arc<dyn AccessPolicy>>,
) -> Result<HttpResponse> {
    let module_id = path.into_inner();
    if !access.can_operate(caller.id(), module_id).await? {
        return Err(JsonResponse::<()>::build().forbidden("You are not allowed to read this log"));
    }

    let stream = tailer
        .stream_log(module_id, query.environment_id, query.path.as_deref())
        .await?;
    let events =
        stream.map(|chunk| Ok::<_, std::convert::Infallible>(web::Bytes::from(sse_event(&chunk))));

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(events))
}
