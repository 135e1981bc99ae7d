//! Device identity, reboot and web app bootstrap

use std::time::Duration;

use axum::response::Html;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Seconds between a reboot request and the reset
pub const REBOOT_DELAY_SECS: u64 = 3;

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub uptime_s: u64,
    pub build: String,
    pub ip: String,
    pub mac: String,
    #[serde(rename = "mqtthost")]
    pub mqtt_host: String,
    #[serde(rename = "mqtttopic")]
    pub mqtt_topic: String,
    pub chipset: String,
    pub webapp: String,
    #[serde(rename = "supportsSSDP")]
    pub supports_ssdp: u8,
    #[serde(rename = "supportsClientDeviceDB")]
    pub supports_client_device_db: bool,
}

#[derive(Debug, Serialize)]
pub struct RebootResponse {
    pub reboot: u64,
}

/// GET /api/info
pub async fn get_info(state: AppState) -> Result<Json<InfoResponse>, ApiError> {
    let device = &state.settings.device;
    Ok(Json(InfoResponse {
        uptime_s: state.uptime().as_secs(),
        build: device.build.clone(),
        ip: device.ip.clone(),
        mac: device.mac.clone(),
        mqtt_host: format!("{}:{}", device.mqtt_host, device.mqtt_port),
        mqtt_topic: device.mqtt_topic.clone(),
        chipset: device.chipset.clone(),
        webapp: device.webapp_root.clone().unwrap_or_default(),
        supports_ssdp: device.supports_ssdp as u8,
        supports_client_device_db: true,
    }))
}

/// POST /api/reboot
pub async fn post_reboot(state: AppState) -> Result<Json<RebootResponse>, ApiError> {
    tracing::info!(delay_secs = REBOOT_DELAY_SECS, "reboot requested");
    state
        .devices
        .reset
        .schedule_reset(Duration::from_secs(REBOOT_DELAY_SECS));
    Ok(Json(RebootResponse {
        reboot: REBOOT_DELAY_SECS,
    }))
}

/// GET /app
/// Page that loads the hosted web app against this device
pub async fn get_app(state: AppState) -> Result<Html<String>, ApiError> {
    let device = &state.settings.device;
    let page = match device.webapp_root.as_deref().filter(|root| !root.is_empty()) {
        Some(root) => format!(
            "<!DOCTYPE html><html><head><title>{name}</title>\
             <meta charset=\"utf-8\">\
             <script>var root='{root}',device='http://{ip}';</script>\
             <script src='{root}/startup.js'></script>\
             </head><body></body></html>",
            name = device.name,
            root = root,
            ip = device.ip,
        ),
        None => format!(
            "<!DOCTYPE html><html><head><title>{} - Not available</title></head>\
             <body><a href=\"/index\">Return to menu</a><br/>no APP available<br/></body></html>",
            device.name
        ),
    };
    Ok(Html(page))
}
