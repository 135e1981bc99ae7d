//! Endpoint table and request dispatch
//!
//! Every request except `/health` goes through the axum fallback into
//! [`dispatch`], which resolves it against the device route table.

use axum::extract::{Request, State};
use axum::http;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{ContentLength, HeaderMapExt};
use fwrest_core::{Matcher, Method, RequestHead, Resolution, RouteTable};

use crate::error::ApiError;
use crate::handlers;
use crate::state::AppState;
use crate::transport::DeviceRequest;

/// Endpoints served by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    GetChannels,
    GetPins,
    GetLogConfig,
    SerialLog,
    GetFsBlock,
    GetFile,
    DeleteFile,
    Info,
    GetFlash,
    App,
    PostChannels,
    PostPins,
    PostLogConfig,
    Reboot,
    Ota,
    PostFlash,
    Command,
    PostFsBlock,
    PostFile,
}

/// The device route table, first match wins
pub fn route_table() -> RouteTable<Endpoint> {
    use Endpoint::*;
    use Matcher::{Exact, Prefix};

    RouteTable::new("api/")
        .route(Method::Get, Exact("api/channels"), GetChannels)
        .route(Method::Get, Exact("api/pins"), GetPins)
        .route(Method::Get, Exact("api/logconfig"), GetLogConfig)
        .route(Method::Get, Prefix("api/seriallog"), SerialLog)
        .route(Method::Get, Exact("api/fsblock"), GetFsBlock)
        .route(Method::Get, Prefix("api/lfs/"), GetFile)
        .route(Method::Get, Prefix("api/del/"), DeleteFile)
        .route(Method::Get, Exact("api/info"), Info)
        .route(Method::Get, Prefix("api/flash/"), GetFlash)
        .route(Method::Get, Exact("app"), App)
        .route(Method::Post, Exact("api/channels"), PostChannels)
        .route(Method::Post, Exact("api/pins"), PostPins)
        .route(Method::Post, Exact("api/logconfig"), PostLogConfig)
        .route(Method::Post, Exact("api/reboot"), Reboot)
        .route(Method::Post, Exact("api/ota"), Ota)
        .route(Method::Post, Prefix("api/flash/"), PostFlash)
        .route(Method::Post, Exact("api/cmnd"), Command)
        .route(Method::Post, Exact("api/fsblock"), PostFsBlock)
        .route(Method::Post, Prefix("api/lfs/"), PostFile)
}

/// Fallback handler resolving every request through the route table
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let method = match *request.method() {
        http::Method::GET => Method::Get,
        http::Method::POST => Method::Post,
        ref other => {
            return ApiError::MethodNotAllowed(format!("{} not supported", other)).into_response()
        }
    };
    let content_length = request.headers().typed_get::<ContentLength>().map(|len| len.0);
    let head = RequestHead::new(method, request.uri().path(), content_length);
    tracing::debug!(method = %head.method, path = %head.path, content_length = head.content_length, "request");

    let (handler, param) = match state.routes().resolve(head.method, &head.path) {
        Resolution::Route { handler, param } => (handler, param.to_string()),
        Resolution::Echo => {
            let request = DeviceRequest::new(head, "", request.into_body());
            return handlers::echo::echo(request).await;
        }
        Resolution::NotFound => {
            return ApiError::NotFound(format!("no such resource: /{}", head.path)).into_response()
        }
    };

    let request = DeviceRequest::new(head, param, request.into_body());
    match handlers::handle(handler, state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}
