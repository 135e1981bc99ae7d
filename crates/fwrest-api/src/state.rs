//! Application state for the device API

use std::sync::Arc;
use std::time::{Duration, Instant};

use fwrest_core::{
    ChannelBank, CommandDispatcher, CoreError, CoreResult, FileStore, FileStoreBridge, FlashDevice,
    OtaTarget, PagedFlash, PinConfig, ResetScheduler, RouteTable,
};
use tokio::sync::{Mutex, MutexGuard};

use crate::routes::{route_table, Endpoint};
use crate::settings::{DeviceInfo, FlashLayout, LfsLayout, LogSettings};

/// Hardware and firmware services the API drives
#[derive(Clone)]
pub struct Collaborators {
    pub flash: Arc<dyn FlashDevice>,
    pub store: Arc<dyn FileStore>,
    pub pins: Arc<dyn PinConfig>,
    pub channels: Arc<dyn ChannelBank>,
    pub commands: Arc<dyn CommandDispatcher>,
    pub reset: Arc<dyn ResetScheduler>,
}

/// Static settings of one device
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub layout: FlashLayout,
    pub lfs: LfsLayout,
    pub ota: OtaTarget,
    /// Reset delay after a committed update; `None` leaves the reboot to the operator
    pub ota_reboot_delay: Option<Duration>,
    pub device: DeviceInfo,
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    routes: Arc<RouteTable<Endpoint>>,
    pub flash: PagedFlash,
    pub files: FileStoreBridge,
    pub devices: Collaborators,
    pub settings: Arc<ApiSettings>,
    pub log: Arc<LogSettings>,
    update_lock: Arc<Mutex<()>>,
    started: Instant,
}

impl AppState {
    pub fn new(devices: Collaborators, settings: ApiSettings, log: Arc<LogSettings>) -> Self {
        let page_size = settings.layout.page_size;
        Self {
            routes: Arc::new(route_table()),
            flash: PagedFlash::new(devices.flash.clone(), page_size),
            files: FileStoreBridge::new(devices.store.clone(), page_size),
            devices,
            settings: Arc::new(settings),
            log,
            update_lock: Arc::new(Mutex::new(())),
            started: Instant::now(),
        }
    }

    pub fn routes(&self) -> &RouteTable<Endpoint> {
        &self.routes
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Claim the single flash-update slot without waiting.
    ///
    /// OTA, raw flash writes and file store block writes all take this guard
    /// for their whole transfer; a second request fails with
    /// [`CoreError::Busy`].
    pub fn try_begin_update(&self, what: &str) -> CoreResult<MutexGuard<'_, ()>> {
        self.update_lock.try_lock().map_err(|_| {
            tracing::warn!(operation = what, "flash update already in progress");
            CoreError::Busy(format!("{}: another flash update is in progress", what))
        })
    }
}
