//! Test fixtures for end-to-end tests of the firmware REST surface
//!
//! [`TestDevice`] wires the simulated device into the API router and serves
//! it on an ephemeral port; tests talk to it with `reqwest` and inspect the
//! simulated hardware directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fwrest_api::{create_router, ApiSettings, AppState, Collaborators, DeviceInfo, FlashLayout, LfsLayout, LogSettings};
use fwrest_core::{FlashRegion, ImageFormat, OtaDestination, OtaTarget};
use fwrest_sim::{AbPartitions, DirStore, MemChannels, MemPins, ResetNotifier, SimConsole, SimFlash};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const CAPACITY: u32 = 0x20_0000;
pub const ERASE_SIZE: u32 = 0x1000;
/// Update region used by region-destination devices
pub const OTA_REGION: FlashRegion = FlashRegion {
    start: 0x13_2000,
    len: 0x1C_8000 - 0x13_2000,
};
pub const SLOTS: [FlashRegion; 2] = [
    FlashRegion {
        start: 0x1_0000,
        len: 0x9_0000,
    },
    FlashRegion {
        start: 0xA_0000,
        len: 0x9_0000,
    },
];

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on an ephemeral localhost port
    pub async fn start(router: axum::Router) -> std::io::Result<Self> {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Where committed updates go
pub enum UpdateTarget {
    Region,
    Partitions,
}

/// Simulated device served over HTTP
pub struct TestDevice {
    pub server: TestServer,
    pub client: reqwest::Client,
    pub state: AppState,
    pub flash: Arc<SimFlash>,
    pub store: Arc<DirStore>,
    pub channels: Arc<MemChannels>,
    pub pins: Arc<MemPins>,
    pub reset: ResetNotifier,
    pub partitions: Arc<AbPartitions>,
    dir: TempDir,
}

impl TestDevice {
    /// Device taking headered images into [`OTA_REGION`]
    pub async fn start() -> Self {
        Self::start_with(
            ImageFormat::headered(fwrest_core::ota::HEADERED_DEFAULT_MAGIC),
            UpdateTarget::Region,
        )
        .await
    }

    pub async fn start_with(format: ImageFormat, target: UpdateTarget) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let flash = Arc::new(
            SimFlash::open(dir.path().join("flash.bin"), CAPACITY, ERASE_SIZE).expect("flash image"),
        );
        // left unformatted: the first upload creates it
        let store = Arc::new(DirStore::new(dir.path().join("lfs")));

        let reset = ResetNotifier::new();
        let channels = Arc::new(MemChannels::new(16));
        let console = Arc::new(SimConsole::new(channels.clone(), Arc::new(reset.clone())));
        let pins = Arc::new(MemPins::new(8).with_console(console.clone()));
        let partitions = Arc::new(AbPartitions::new(SLOTS, 0).expect("partition table"));

        let destination = match target {
            UpdateTarget::Region => OtaDestination::Region(OTA_REGION),
            UpdateTarget::Partitions => OtaDestination::PartitionTable(partitions.clone()),
        };
        let settings = ApiSettings {
            layout: FlashLayout::default(),
            lfs: LfsLayout::default(),
            ota: OtaTarget::new(format, destination),
            ota_reboot_delay: Some(Duration::from_millis(50)),
            device: DeviceInfo::default(),
        };
        let devices = Collaborators {
            flash: flash.clone(),
            store: store.clone(),
            pins: pins.clone(),
            channels: channels.clone(),
            commands: console,
            reset: Arc::new(reset.clone()),
        };

        let state = AppState::new(devices, settings, Arc::new(LogSettings::default()));
        let server = TestServer::start(create_router(state.clone()))
            .await
            .expect("test server");

        Self {
            server,
            client: reqwest::Client::new(),
            state,
            flash,
            store,
            channels,
            pins,
            reset,
            partitions,
            dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.server.base_url(), path.trim_start_matches('/'))
    }

    /// Host directory backing the file store
    pub fn store_root(&self) -> std::path::PathBuf {
        self.dir.path().join("lfs")
    }

    /// Flash bytes of `region`
    pub fn flash_bytes(&self, start: u32, len: usize) -> Vec<u8> {
        let snapshot = self.flash.snapshot();
        snapshot[start as usize..start as usize + len].to_vec()
    }
}

/// Deterministic test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// SHA-256 of `data` in lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
