//! Raw flash handlers
//!
//! Dumps stream page by page straight from the device. Writes go through the
//! paged region writer under the single flash-update guard.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use fwrest_core::routing::{parse_hex, parse_hex_range};
use fwrest_core::{CoreError, FlashRegion};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;
use crate::transport::DeviceRequest;

/// Response for completed flash writes
#[derive(Debug, Serialize)]
pub struct FlashWritten {
    pub size: u64,
}

/// Stream `region` as an octet-stream body
fn stream_region(state: &AppState, region: FlashRegion) -> Result<Response, ApiError> {
    let pages = state.flash.pages(region)?;
    tracing::debug!(
        start = format_args!("0x{:06X}", region.start),
        len = region.len,
        "flash dump"
    );

    let body = async_stream::stream! {
        for page in pages {
            yield page
                .map(Bytes::from)
                .map_err(|e| std::io::Error::other(e.to_string()));
        }
    };

    Ok(([(CONTENT_TYPE, "application/octet-stream")], Body::from_stream(body)).into_response())
}

/// GET /api/flash/<hex-start>-<hex-len>
/// Dump a flash range
pub async fn get_flash(state: AppState, request: DeviceRequest) -> Result<Response, ApiError> {
    let (start, len) = parse_hex_range(&request.param)?;
    stream_region(&state, FlashRegion::new(start, len))
}

/// POST /api/flash/<hex-start>
/// Write the body to flash starting at `start`
pub async fn post_flash(
    state: AppState,
    mut request: DeviceRequest,
) -> Result<Json<FlashWritten>, ApiError> {
    let start = parse_hex(&request.param)?;
    let ota_start = state.settings.layout.ota_start;
    if start < ota_start {
        return Err(CoreError::Bounds(format!(
            "raw flash writes must start at or above 0x{:06X}",
            ota_start
        ))
        .into());
    }
    let region = FlashRegion::from_bounds(start, state.flash.capacity())?;

    let _guard = state.try_begin_update("flash write")?;
    let mut cursor = request.cursor().await?;
    let size = state.flash.write_region(region, &mut cursor).await?;

    tracing::info!(start = format_args!("0x{:06X}", start), size, "raw flash written");
    Ok(Json(FlashWritten { size }))
}

/// GET /api/fsblock
/// Dump the file store block region
pub async fn get_fsblock(state: AppState) -> Result<Response, ApiError> {
    let region = state.settings.lfs.block_region()?;
    stream_region(&state, region)
}

/// POST /api/fsblock
/// Replace the file store block region; the store is remounted afterwards
pub async fn post_fsblock(
    state: AppState,
    mut request: DeviceRequest,
) -> Result<Json<FlashWritten>, ApiError> {
    let region = state.settings.lfs.block_region()?;
    let _guard = state.try_begin_update("fsblock write")?;

    let store = state.files.store();
    if store.is_mounted() {
        tracing::info!("unmounting file store for block write");
        store.unmount();
    }

    let written = match request.cursor().await {
        Ok(mut cursor) => state.flash.write_region(region, &mut cursor).await,
        Err(e) => Err(e),
    };

    // never format here: a store that does not mount stays unmounted
    if let Err(e) = store.mount(false) {
        tracing::warn!(error = %e, "file store did not mount after block write");
    }

    let size = written?;
    tracing::info!(start = format_args!("0x{:06X}", region.start), size, "file store blocks written");
    Ok(Json(FlashWritten { size }))
}
