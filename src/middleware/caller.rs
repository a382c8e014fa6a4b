use actix_web::{dev::Payload, http::header::HeaderName, FromRequest, HttpRequest};
use std::future::{ready, Ready};

use crate::helpers::JsonResponse;

/// Header the upstream gateway sets after authenticating the user.
pub const CALLER_HEADER: &str = "x-user-id";

/// Authenticated caller identity, taken from [`CALLER_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl Caller {
    pub fn id(&self) -> &str {
        &self.0
    }
}

fn get_caller(req: &HttpRequest) -> Result<Caller, String> {
    let header_value = req
        .headers()
        .get(HeaderName::from_static(CALLER_HEADER))
        .ok_or_else(|| format!("header {CALLER_HEADER} is not set"))?;

    let user_id = header_value
        .to_str()
        .map_err(|_| format!("header {CALLER_HEADER} can't be converted to string"))?
        .trim();
    if user_id.is_empty() {
        return Err(format!("header {CALLER_HEADER} is empty"));
    }
    Ok(Caller(user_id.to_string()))
}

impl FromRequest for Caller {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(get_caller(req).map_err(|err| {
            tracing::debug!("Rejecting request without caller: {}", err);
            JsonResponse::<()>::build().unauthorized(err)
        }))
    }
}
