//! Pin, channel, logging and console handlers

use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};

use super::SMALL_BODY_LIMIT;
use crate::error::{ApiError, Success};
use crate::settings::{FEATURE_NAMES, LEVEL_NAMES};
use crate::state::AppState;
use crate::transport::DeviceRequest;

/// Highest flag index `deviceFlag` may set
const MAX_DEVICE_FLAG: u64 = 10;

#[derive(Debug, Serialize)]
pub struct PinsResponse {
    pub rolenames: Vec<String>,
    pub roles: Vec<u8>,
    pub channels: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct LogConfigResponse {
    pub level: i64,
    pub features: i64,
    pub levelnames: &'static [&'static str],
    pub featurenames: &'static [&'static str],
}

async fn json_body(request: &mut DeviceRequest) -> Result<Value, ApiError> {
    let text = request.text(SMALL_BODY_LIMIT).await?;
    Ok(serde_json::from_str(&text)?)
}

/// GET /api/channels
/// Values of the channels bound to pins that have a role
pub async fn get_channels(state: AppState) -> Result<Json<Value>, ApiError> {
    let pins = &state.devices.pins;
    let roles = pins.roles();
    let channels = pins.channels();

    let mut values = Map::new();
    for (pin, role) in roles.iter().enumerate() {
        if *role == 0 {
            continue;
        }
        let channel = channels.get(pin).copied().unwrap_or(0);
        let value = state.devices.channels.get(channel as usize);
        values.insert(channel.to_string(), Value::from(value));
    }
    Ok(Json(Value::Object(values)))
}

/// POST /api/channels
/// Set channel values from a JSON array, index = channel
pub async fn post_channels(
    state: AppState,
    mut request: DeviceRequest,
) -> Result<Json<Success>, ApiError> {
    let Value::Array(values) = json_body(&mut request).await? else {
        return Err(ApiError::BadRequest("Array expected".to_string()));
    };

    for (channel, value) in values.iter().enumerate() {
        let value = value
            .as_i64()
            .ok_or_else(|| ApiError::BadRequest(format!("channel {} value is not a number", channel)))?;
        state.devices.channels.set(channel, value as i32);
        tracing::debug!(channel, value, "channel set");
    }
    Ok(Success::ok())
}

/// GET /api/pins
pub async fn get_pins(state: AppState) -> Result<Json<PinsResponse>, ApiError> {
    let pins = &state.devices.pins;
    Ok(Json(PinsResponse {
        rolenames: pins.role_names(),
        roles: pins.roles(),
        channels: pins.channels(),
    }))
}

fn small_values(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

/// POST /api/pins
/// Update pin roles, channels, a device flag or the startup command
pub async fn post_pins(state: AppState, mut request: DeviceRequest) -> Result<Json<Success>, ApiError> {
    let Value::Object(fields) = json_body(&mut request).await? else {
        return Err(ApiError::BadRequest("Object expected".to_string()));
    };

    let pins = &state.devices.pins;
    let mut changed = 0usize;

    for (key, value) in &fields {
        match key.as_str() {
            "roles" => {
                let Some(roles) = small_values(value) else {
                    continue;
                };
                let current = pins.roles();
                for (pin, role) in roles.into_iter().enumerate() {
                    if current.get(pin) != Some(&role) {
                        pins.set_role(pin, role);
                        changed += 1;
                    }
                }
            }
            "channels" => {
                let Some(channels) = small_values(value) else {
                    continue;
                };
                let current = pins.channels();
                for (pin, channel) in channels.into_iter().enumerate() {
                    if current.get(pin) != Some(&channel) {
                        pins.set_channel(pin, channel);
                        changed += 1;
                    }
                }
            }
            "deviceFlag" => match value.as_u64() {
                Some(flag) if flag <= MAX_DEVICE_FLAG => {
                    pins.set_flag(flag as u32);
                    changed += 1;
                }
                _ => tracing::debug!(%value, "ignoring deviceFlag"),
            },
            "deviceCommand" => {
                if let Some(command) = value.as_str() {
                    tracing::debug!(command, "received deviceCommand");
                    pins.set_startup_command(command);
                    changed += 1;
                }
            }
            other => tracing::warn!(key = other, "unexpected key in pin config"),
        }
    }

    if changed > 0 {
        pins.schedule_save();
        tracing::info!(changed, "pin configuration changed");
    }
    Ok(Success::ok())
}

/// GET /api/logconfig
pub async fn get_logconfig(state: AppState) -> Result<Json<LogConfigResponse>, ApiError> {
    let current = state.log.snapshot();
    Ok(Json(LogConfigResponse {
        level: current.level,
        features: current.features,
        levelnames: LEVEL_NAMES,
        featurenames: FEATURE_NAMES,
    }))
}

/// POST /api/logconfig
/// Set `level` and `features`; unknown keys are reported back as text
pub async fn post_logconfig(state: AppState, mut request: DeviceRequest) -> Result<String, ApiError> {
    let Value::Object(fields) = json_body(&mut request).await? else {
        return Err(ApiError::BadRequest("Object expected".to_string()));
    };

    let mut report = String::new();
    for (key, value) in &fields {
        match (key.as_str(), value.as_i64()) {
            ("level", Some(level)) => state.log.set_level(level),
            ("features", Some(features)) => state.log.set_features(features),
            ("level" | "features", None) => {}
            (other, _) => {
                tracing::warn!(key = other, "unexpected key in log config");
                report.push_str(&format!("Unexpected key: {}\n", other));
            }
        }
    }

    let current = state.log.snapshot();
    tracing::info!(level = current.level, features = current.features, "log config updated");
    Ok(report)
}

/// GET /api/seriallog<flag>
/// A trailing `1` enables direct serial logging, anything else disables it
pub async fn serial_log(state: AppState, request: DeviceRequest) -> Result<String, ApiError> {
    let enabled = request.param.ends_with('1');
    state.log.set_direct_serial(enabled);
    Ok(format!("Direct serial logging set to {}", enabled as u8))
}

/// POST /api/cmnd
/// Run the body as a console command
pub async fn post_command(
    state: AppState,
    mut request: DeviceRequest,
) -> Result<Json<Success>, ApiError> {
    let text = request.text(SMALL_BODY_LIMIT).await?;
    let command = text.trim();
    tracing::info!(command, "console command");
    state.devices.commands.execute(command)?;
    Ok(Success::ok())
}
