//! HTTP request handlers for the device API
//!
//! Handlers receive the shared [`AppState`] and a routed [`DeviceRequest`];
//! the endpoint decides which one runs.

pub mod config;
pub mod echo;
pub mod files;
pub mod flash;
pub mod ota;
pub mod system;

use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::routes::Endpoint;
use crate::state::AppState;
use crate::transport::DeviceRequest;

/// Upper bound for JSON and command bodies
pub const SMALL_BODY_LIMIT: usize = 4096;

/// Run the handler for `endpoint`
pub async fn handle(
    endpoint: Endpoint,
    state: AppState,
    request: DeviceRequest,
) -> Result<Response, ApiError> {
    match endpoint {
        Endpoint::GetChannels => config::get_channels(state).await.map(IntoResponse::into_response),
        Endpoint::PostChannels => config::post_channels(state, request).await.map(IntoResponse::into_response),
        Endpoint::GetPins => config::get_pins(state).await.map(IntoResponse::into_response),
        Endpoint::PostPins => config::post_pins(state, request).await.map(IntoResponse::into_response),
        Endpoint::GetLogConfig => config::get_logconfig(state).await.map(IntoResponse::into_response),
        Endpoint::PostLogConfig => config::post_logconfig(state, request).await.map(IntoResponse::into_response),
        Endpoint::SerialLog => config::serial_log(state, request).await.map(IntoResponse::into_response),
        Endpoint::Command => config::post_command(state, request).await.map(IntoResponse::into_response),
        Endpoint::Info => system::get_info(state).await.map(IntoResponse::into_response),
        Endpoint::Reboot => system::post_reboot(state).await.map(IntoResponse::into_response),
        Endpoint::App => system::get_app(state).await.map(IntoResponse::into_response),
        Endpoint::Ota => ota::post_ota(state, request).await.map(IntoResponse::into_response),
        Endpoint::GetFlash => flash::get_flash(state, request).await,
        Endpoint::PostFlash => flash::post_flash(state, request).await.map(IntoResponse::into_response),
        Endpoint::GetFsBlock => flash::get_fsblock(state).await,
        Endpoint::PostFsBlock => flash::post_fsblock(state, request).await.map(IntoResponse::into_response),
        Endpoint::GetFile => files::get_file(state, request).await,
        Endpoint::PostFile => files::post_file(state, request).await.map(IntoResponse::into_response),
        Endpoint::DeleteFile => files::delete_file(state, request).await.map(IntoResponse::into_response),
    }
}
