//! Firmware update handler

use axum::Json;
use fwrest_core::{run_update, OtaReport};

use crate::error::ApiError;
use crate::state::AppState;
use crate::transport::DeviceRequest;

/// POST /api/ota
/// Stream a firmware image into the update destination
pub async fn post_ota(state: AppState, mut request: DeviceRequest) -> Result<Json<OtaReport>, ApiError> {
    let _guard = state.try_begin_update("ota")?;
    tracing::info!(
        format = state.settings.ota.format.name(),
        content_length = request.head.content_length,
        "ota started"
    );

    let mut cursor = request.cursor().await?;
    let report = run_update(&state.settings.ota, &state.flash, &mut cursor).await?;

    if let Some(delay) = state.settings.ota_reboot_delay {
        tracing::info!(delay_secs = delay.as_secs(), "rebooting after update");
        state.devices.reset.schedule_reset(delay);
    }

    Ok(Json(report))
}
