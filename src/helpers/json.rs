use actix_web::{error::InternalError, http::StatusCode, web, Error, HttpResponse};
use serde::Serialize;

/// Envelope shared by every JSON endpoint.
#[derive(Serialize)]
pub(crate) struct JsonResponse<T> {
    pub(crate) status: String,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) item: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) list: Option<Vec<T>>,
}

pub(crate) struct JsonResponseBuilder<T> {
    item: Option<T>,
    list: Option<Vec<T>>,
}

impl<T> JsonResponse<T>
where
    T: Serialize,
{
    pub(crate) fn build() -> JsonResponseBuilder<T> {
        JsonResponseBuilder {
            item: None,
            list: None,
        }
    }
}

impl<T> JsonResponseBuilder<T>
where
    T: Serialize,
{
    pub(crate) fn set_item(mut self, item: T) -> Self {
        self.item = Some(item);
        self
    }

    pub(crate) fn set_list(mut self, list: Vec<T>) -> Self {
        self.list = Some(list);
        self
    }

    pub(crate) fn ok<S: Into<String>>(self, message: S) -> web::Json<JsonResponse<T>> {
        web::Json(JsonResponse {
            status: "OK".to_string(),
            message: message.into(),
            item: self.item,
            list: self.list,
        })
    }

    fn error<S: Into<String>>(self, status: StatusCode, message: S) -> Error {
        let message = message.into();
        let body = JsonResponse::<T> {
            status: "Error".to_string(),
            message: message.clone(),
            item: None,
            list: None,
        };
        InternalError::from_response(message, HttpResponse::build(status).json(body)).into()
    }

    pub(crate) fn bad_request<S: Into<String>>(self, message: S) -> Error {
        self.error(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn unauthorized<S: Into<String>>(self, message: S) -> Error {
        self.error(StatusCode::UNAUTHORIZED, message)
    }

    pub(crate) fn forbidden<S: Into<String>>(self, message: S) -> Error {
        self.error(StatusCode::FORBIDDEN, message)
    }

    pub(crate) fn not_found<S: Into<String>>(self, message: S) -> Error {
        self.error(StatusCode::NOT_FOUND, message)
    }

    pub(crate) fn internal_server_error<S: Into<String>>(self, message: S) -> Error {
        self.error(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}
