//! File store handlers

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use fwrest_core::{FileWritten, ReadTarget};

use crate::error::{ApiError, Success};
use crate::state::AppState;
use crate::transport::DeviceRequest;

/// GET /api/lfs/<path>
/// Stream a file, or list a directory
pub async fn get_file(state: AppState, request: DeviceRequest) -> Result<Response, ApiError> {
    match state.files.open_for_read(&request.param)? {
        ReadTarget::Directory(listing) => Ok(Json(listing).into_response()),
        ReadTarget::File(reader) => {
            let mime = reader.mime();
            let body = async_stream::stream! {
                for page in reader {
                    yield page
                        .map(Bytes::from)
                        .map_err(|e| std::io::Error::other(e.to_string()));
                }
            };
            Ok(([(CONTENT_TYPE, mime)], Body::from_stream(body)).into_response())
        }
    }
}

/// POST /api/lfs/<path>
/// Store the body as a file, creating parent directories
pub async fn post_file(
    state: AppState,
    mut request: DeviceRequest,
) -> Result<Json<FileWritten>, ApiError> {
    let path = request.param.clone();
    let mut cursor = request.cursor().await?;
    let written = state.files.write_file(&path, &mut cursor).await?;
    Ok(Json(written))
}

/// GET /api/del/<path>
/// Remove a file or empty directory
pub async fn delete_file(state: AppState, request: DeviceRequest) -> Result<Json<Success>, ApiError> {
    state.files.delete(&request.param)?;
    Ok(Success::ok())
}
