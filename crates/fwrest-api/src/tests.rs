//! Router tests driving full requests through `create_router`

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use fwrest_core::testing::{MemStore, RamFlash};
use fwrest_core::{
    ChannelBank, CommandDispatcher, CoreResult, FileStore, FlashRegion, ImageFormat, OtaDestination,
    OtaTarget, PinConfig, ResetScheduler,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::*;

const CAPACITY: u32 = 0x20_0000;
const OTA_SLOT: FlashRegion = FlashRegion {
    start: 0x13_2000,
    len: 0x1_0000,
};

#[derive(Default)]
struct FakePins {
    roles: Mutex<Vec<u8>>,
    channels: Mutex<Vec<u8>>,
    flag: Mutex<Option<u32>>,
    command: Mutex<Option<String>>,
    saves: Mutex<usize>,
}

impl FakePins {
    fn with_pins(count: usize) -> Self {
        Self {
            roles: Mutex::new(vec![0; count]),
            channels: Mutex::new(vec![0; count]),
            ..Self::default()
        }
    }
}

impl PinConfig for FakePins {
    fn role_names(&self) -> Vec<String> {
        vec!["none".to_string(), "Relay".to_string(), "Button".to_string()]
    }

    fn roles(&self) -> Vec<u8> {
        self.roles.lock().clone()
    }

    fn set_role(&self, pin: usize, role: u8) {
        if let Some(slot) = self.roles.lock().get_mut(pin) {
            *slot = role;
        }
    }

    fn channels(&self) -> Vec<u8> {
        self.channels.lock().clone()
    }

    fn set_channel(&self, pin: usize, channel: u8) {
        if let Some(slot) = self.channels.lock().get_mut(pin) {
            *slot = channel;
        }
    }

    fn set_flag(&self, flag: u32) {
        *self.flag.lock() = Some(flag);
    }

    fn set_startup_command(&self, command: &str) {
        *self.command.lock() = Some(command.to_string());
    }

    fn schedule_save(&self) {
        *self.saves.lock() += 1;
    }
}

#[derive(Default)]
struct FakeChannels(Mutex<Vec<i32>>);

impl ChannelBank for FakeChannels {
    fn get(&self, channel: usize) -> i32 {
        self.0.lock().get(channel).copied().unwrap_or(0)
    }

    fn set(&self, channel: usize, value: i32) {
        let mut values = self.0.lock();
        if values.len() <= channel {
            values.resize(channel + 1, 0);
        }
        values[channel] = value;
    }
}

#[derive(Default)]
struct FakeCommands(Mutex<Vec<String>>);

impl CommandDispatcher for FakeCommands {
    fn execute(&self, command: &str) -> CoreResult<()> {
        self.0.lock().push(command.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FakeReset(Mutex<Vec<Duration>>);

impl ResetScheduler for FakeReset {
    fn schedule_reset(&self, delay: Duration) {
        self.0.lock().push(delay);
    }
}

struct Harness {
    app: Router,
    state: AppState,
    flash: Arc<RamFlash>,
    store: MemStore,
    pins: Arc<FakePins>,
    channels: Arc<FakeChannels>,
    commands: Arc<FakeCommands>,
    reset: Arc<FakeReset>,
}

fn harness_with(format: ImageFormat, webapp_root: Option<&str>) -> Harness {
    let flash = Arc::new(RamFlash::new(CAPACITY, 0x1000));
    let store = MemStore::mounted();
    let pins = Arc::new(FakePins::with_pins(4));
    let channels = Arc::new(FakeChannels::default());
    let commands = Arc::new(FakeCommands::default());
    let reset = Arc::new(FakeReset::default());

    let devices = Collaborators {
        flash: flash.clone(),
        store: Arc::new(store.clone()),
        pins: pins.clone(),
        channels: channels.clone(),
        commands: commands.clone(),
        reset: reset.clone(),
    };
    let settings = ApiSettings {
        layout: FlashLayout::default(),
        lfs: LfsLayout::default(),
        ota: OtaTarget::new(format, OtaDestination::Region(OTA_SLOT)),
        ota_reboot_delay: None,
        device: DeviceInfo {
            webapp_root: webapp_root.map(str::to_string),
            ip: "192.168.1.50".to_string(),
            ..DeviceInfo::default()
        },
    };
    let state = AppState::new(devices, settings, Arc::new(LogSettings::default()));

    Harness {
        app: create_router(state.clone()),
        state,
        flash,
        store,
        pins,
        channels,
        commands,
        reset,
    }
}

fn harness() -> Harness {
    harness_with(ImageFormat::headered(fwrest_core::ota::HEADERED_DEFAULT_MAGIC), None)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: impl Into<Vec<u8>>) -> Request<Body> {
    let body = body.into();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_LENGTH, body.len().to_string())
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn health_is_outside_the_device_table() {
    let h = harness();
    let (status, _, body) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn unknown_api_path_is_echoed() {
    let h = harness();
    let (status, _, body) = send(&h.app, get("/api/dumpconfig")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("GET of api/dumpconfig"));

    let (_, _, body) = send(&h.app, post("/api/info", "<b>hi</b>")).await;
    let page = String::from_utf8_lossy(&body);
    assert!(page.contains("POST to api/info"));
    assert!(page.contains("Content Length:9"));
    assert!(page.contains("Content:[&lt;b&gt;hi&lt;/b&gt;]"));
}

#[tokio::test]
async fn paths_outside_api_are_not_found() {
    let h = harness();
    let (status, body) = send_json(&h.app, get("/index.html")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], -2);
}

#[tokio::test]
async fn other_methods_are_rejected() {
    let h = harness();
    let request = Request::builder()
        .method("PUT")
        .uri("/api/info")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_json(&h.app, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// OTA
// =============================================================================

#[tokio::test]
async fn ota_writes_verified_image() {
    let h = harness();
    let data = payload(5000);
    let image = h.state.settings.ota.format.build_image(&data);

    let (status, body) = send_json(&h.app, post("/api/ota", image)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["size"], 5000);
    assert_eq!(body["image_len"], 5000);
    assert!(body["digest"].is_string());

    let start = OTA_SLOT.start as usize;
    assert_eq!(&h.flash.snapshot()[start..start + data.len()], &data[..]);
    assert!(h.reset.0.lock().is_empty());
}

#[tokio::test]
async fn ota_rejects_corrupted_payload() {
    let h = harness();
    let mut image = h.state.settings.ota.format.build_image(&payload(2000));
    let last = image.len() - 1;
    image[last] ^= 0x01;

    let (status, body) = send_json(&h.app, post("/api/ota", image)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], -19);
}

#[tokio::test]
async fn ota_rejects_foreign_magic() {
    let h = harness();
    let image = ImageFormat::headered("OTHER_FW").build_image(&payload(600));
    let (status, body) = send_json(&h.app, post("/api/ota", image)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], -1);
    assert_eq!(h.flash.stats().writes, 0);
}

#[tokio::test]
async fn concurrent_update_is_busy() {
    let h = harness();
    let _guard = h.state.try_begin_update("test").unwrap();

    let (status, body) = send_json(&h.app, post("/api/flash/132000", vec![0u8; 16])).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], -16);
}

// =============================================================================
// Raw flash
// =============================================================================

#[tokio::test]
async fn flash_write_then_dump() {
    let h = harness();
    let data = payload(3000);

    let (status, body) = send_json(&h.app, post("/api/flash/132000", data.clone())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body, json!({ "size": 3000 }));

    let (status, headers, body) = send(&h.app, get("/api/flash/132000-BB8")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(&body[..], &data[..]);
}

#[tokio::test]
async fn flash_write_below_update_area_is_refused() {
    let h = harness();
    let (status, body) = send_json(&h.app, post("/api/flash/1000", vec![0u8; 16])).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(body["error"], -20);
    assert_eq!(h.flash.stats().writes, 0);
}

#[tokio::test]
async fn flash_dump_checks_range() {
    let h = harness();
    let (status, _) = send_json(&h.app, get("/api/flash/zz-10")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&h.app, get("/api/flash/1FFF00-200")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn fsblock_write_remounts_store() {
    let h = harness();
    let blocks = vec![0x5Au8; 4096];

    let (status, body) = send_json(&h.app, post("/api/fsblock", blocks.clone())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["size"], 4096);
    assert!(h.store.is_mounted());

    let (status, _, dump) = send(&h.app, get("/api/fsblock")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dump.len(), 0x8000);
    assert_eq!(&dump[..4096], &blocks[..]);
    assert!(dump[4096..].iter().all(|&b| b == 0xFF));
}

// =============================================================================
// File store
// =============================================================================

#[tokio::test]
async fn file_upload_list_read_delete() {
    let h = harness();
    let page = b"<html>hello</html>".to_vec();

    let (status, body) = send_json(&h.app, post("/api/lfs/www/index.html", page.clone())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body, json!({ "fname": "www/index.html", "size": page.len() }));
    assert!(h.store.has_dir("www"));

    let (status, headers, body) = send(&h.app, get("/api/lfs/www/index.html")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/html");
    assert_eq!(&body[..], &page[..]);

    let (status, listing) = send_json(&h.app, get("/api/lfs/www")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["content"][0]["name"], "index.html");

    let (status, body) = send_json(&h.app, get("/api/del/www/index.html")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": 200, "msg": "OK" }));
    assert!(h.store.file("www/index.html").is_none());
}

#[tokio::test]
async fn missing_file_reports_name() {
    let h = harness();
    let (status, body) = send_json(&h.app, get("/api/lfs/nope.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "fname": "nope.txt", "error": -2 }));
}

// =============================================================================
// Configuration and system
// =============================================================================

#[tokio::test]
async fn pins_update_and_channels() {
    let h = harness();
    let update = json!({ "roles": [1, 0, 2, 0], "channels": [5, 0, 6, 0], "color": "red" });

    let (status, body) = send_json(&h.app, post("/api/pins", update.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], 200);
    assert_eq!(h.pins.roles(), vec![1, 0, 2, 0]);
    assert_eq!(*h.pins.saves.lock(), 1);

    let (_, body) = send_json(&h.app, post("/api/channels", "[0,0,0,0,0,1,42]")).await;
    assert_eq!(body["success"], 200);
    assert_eq!(h.channels.get(6), 42);

    let (status, body) = send_json(&h.app, get("/api/channels")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "5": 1, "6": 42 }));

    let (_, body) = send_json(&h.app, get("/api/pins")).await;
    assert_eq!(body["roles"], json!([1, 0, 2, 0]));
    assert_eq!(body["rolenames"][1], "Relay");
}

#[tokio::test]
async fn unchanged_pins_are_not_saved() {
    let h = harness();
    let (_, body) = send_json(&h.app, post("/api/pins", r#"{"roles":[0,0,0,0]}"#)).await;
    assert_eq!(body["success"], 200);
    assert_eq!(*h.pins.saves.lock(), 0);

    let (_, _) = send_json(&h.app, post("/api/pins", r#"{"deviceFlag":11}"#)).await;
    assert_eq!(*h.pins.flag.lock(), None);
}

#[tokio::test]
async fn pins_require_an_object() {
    let h = harness();
    let (status, body) = send_json(&h.app, post("/api/pins", "[1,2]")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Object expected");

    let (status, _) = send_json(&h.app, post("/api/pins", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logconfig_reports_unexpected_keys() {
    let h = harness();
    let (status, _, body) = send(&h.app, post("/api/logconfig", r#"{"level":4,"verbose":1}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"Unexpected key: verbose\n");
    assert_eq!(h.state.log.snapshot().level, 4);

    let (_, body) = send_json(&h.app, get("/api/logconfig")).await;
    assert_eq!(body["level"], 4);
    assert_eq!(body["levelnames"][0], "Disabled");
}

#[tokio::test]
async fn serial_log_flag() {
    let h = harness();
    let (_, _, body) = send(&h.app, get("/api/seriallog1")).await;
    assert_eq!(&body[..], b"Direct serial logging set to 1");
    assert!(h.state.log.snapshot().direct_serial);

    let (_, _, body) = send(&h.app, get("/api/seriallog0")).await;
    assert_eq!(&body[..], b"Direct serial logging set to 0");
}

#[tokio::test]
async fn command_is_trimmed_and_run() {
    let h = harness();
    let (status, _) = send_json(&h.app, post("/api/cmnd", " led_dimmer 40\r\n")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*h.commands.0.lock(), vec!["led_dimmer 40".to_string()]);
}

#[tokio::test]
async fn reboot_schedules_reset() {
    let h = harness();
    let (status, body) = send_json(&h.app, post("/api/reboot", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "reboot": 3 }));
    assert_eq!(*h.reset.0.lock(), vec![Duration::from_secs(3)]);
}

#[tokio::test]
async fn info_describes_device() {
    let h = harness();
    let (status, body) = send_json(&h.app, get("/api/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ip"], "192.168.1.50");
    assert_eq!(body["mqtthost"], ":1883");
    assert_eq!(body["supportsSSDP"], 0);
    assert_eq!(body["supportsClientDeviceDB"], true);
}

#[tokio::test]
async fn app_page_depends_on_webapp_root() {
    let h = harness();
    let (_, _, body) = send(&h.app, get("/app")).await;
    assert!(String::from_utf8_lossy(&body).contains("no APP available"));

    let h = harness_with(ImageFormat::Raw, Some("https://apps.example.net/fw"));
    let (_, headers, body) = send(&h.app, get("/app")).await;
    let page = String::from_utf8_lossy(&body);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    assert!(page.contains("var root='https://apps.example.net/fw',device='http://192.168.1.50';"));
    assert!(page.contains("<script src='https://apps.example.net/fw/startup.js'>"));
}
