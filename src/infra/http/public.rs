use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use crate::{
    application::{error::HttpError, render::RenderService},
    domain::render::RenderRequest,
};

use super::middleware::{log_responses, set_request_context};

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const CONTENT_DISPOSITION_VALUE: &str = "attachment;filename=text.meshx";
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Clone)]
pub struct HttpState {
    pub renderer: Arc<RenderService>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(render_mesh))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// Values of every occurrence of `name`, joined with `,` in query order.
///
/// `?text=a&text=b` reads as `"a,b"`; an absent parameter is `None`.
fn query_value(pairs: &[(String, String)], name: &str) -> Option<String> {
    let values: Vec<&str> = pairs
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .collect();
    (!values.is_empty()).then(|| values.join(","))
}

async fn render_mesh(
    State(state): State<HttpState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, HttpError> {
    let request = RenderRequest::new(query_value(&pairs, "text"), query_value(&pairs, "font"))?;
    let outcome = state.renderer.render(&request).await?;

    let content_length = HeaderValue::from(outcome.bytes.len());
    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM)),
        (
            CONTENT_DISPOSITION,
            HeaderValue::from_static(CONTENT_DISPOSITION_VALUE),
        ),
        (CONTENT_LENGTH, content_length),
        (X_CACHE, HeaderValue::from_static(outcome.status.as_str())),
    ];

    Ok((StatusCode::OK, headers, outcome.bytes).into_response())
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
