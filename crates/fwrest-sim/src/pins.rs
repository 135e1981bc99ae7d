//! Pin configuration and channel values held in memory

use std::sync::Arc;

use fwrest_core::{ChannelBank, CommandDispatcher, PinConfig};
use parking_lot::{Mutex, RwLock};

/// Pin role names, indexed by role number
pub const ROLE_NAMES: &[&str] = &[
    " ", "Rel", "Rel_n", "Btn", "Btn_n", "LED", "LED_n", "PWM", "WifiLED", "WifiLED_n",
    "Btn_Tgl_All", "Btn_Tgl_All_n", "DigitalInput", "DigitalInput_n", "ToggleChannelOnToggle",
    "DigitalInput_NoPup", "DigitalInput_NoPup_n", "PWM_n", "AlwaysHigh", "AlwaysLow",
];

#[derive(Debug, Default)]
struct PinTable {
    roles: Vec<u8>,
    channels: Vec<u8>,
    flags: u32,
    startup_command: String,
}

/// Pin configuration of the simulated device
pub struct MemPins {
    table: RwLock<PinTable>,
    saves: Mutex<usize>,
    console: Option<Arc<dyn CommandDispatcher>>,
}

impl MemPins {
    pub fn new(pin_count: usize) -> Self {
        Self {
            table: RwLock::new(PinTable {
                roles: vec![0; pin_count],
                channels: vec![0; pin_count],
                ..PinTable::default()
            }),
            saves: Mutex::new(0),
            console: None,
        }
    }

    /// Run startup commands through `console` when they are set
    pub fn with_console(mut self, console: Arc<dyn CommandDispatcher>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn flags(&self) -> u32 {
        self.table.read().flags
    }

    pub fn startup_command(&self) -> String {
        self.table.read().startup_command.clone()
    }

    /// Number of configuration saves requested so far
    pub fn saves(&self) -> usize {
        *self.saves.lock()
    }
}

impl PinConfig for MemPins {
    fn role_names(&self) -> Vec<String> {
        ROLE_NAMES.iter().map(|name| name.to_string()).collect()
    }

    fn roles(&self) -> Vec<u8> {
        self.table.read().roles.clone()
    }

    fn set_role(&self, pin: usize, role: u8) {
        if usize::from(role) >= ROLE_NAMES.len() {
            tracing::warn!(pin, role, "unknown pin role");
            return;
        }
        match self.table.write().roles.get_mut(pin) {
            Some(slot) => *slot = role,
            None => tracing::warn!(pin, "no such pin"),
        }
    }

    fn channels(&self) -> Vec<u8> {
        self.table.read().channels.clone()
    }

    fn set_channel(&self, pin: usize, channel: u8) {
        match self.table.write().channels.get_mut(pin) {
            Some(slot) => *slot = channel,
            None => tracing::warn!(pin, "no such pin"),
        }
    }

    fn set_flag(&self, flag: u32) {
        self.table.write().flags |= 1 << flag;
        tracing::debug!(flag, "device flag set");
    }

    fn set_startup_command(&self, command: &str) {
        self.table.write().startup_command = command.to_string();
        if let Some(console) = &self.console {
            if let Err(e) = console.execute(command) {
                tracing::warn!(command, error = %e, "startup command failed");
            }
        }
    }

    fn schedule_save(&self) {
        *self.saves.lock() += 1;
        tracing::info!("configuration save scheduled");
    }
}

/// Channel values of the simulated device
#[derive(Debug)]
pub struct MemChannels {
    values: RwLock<Vec<i32>>,
}

impl MemChannels {
    pub fn new(count: usize) -> Self {
        Self {
            values: RwLock::new(vec![0; count]),
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl ChannelBank for MemChannels {
    fn get(&self, channel: usize) -> i32 {
        self.values.read().get(channel).copied().unwrap_or(0)
    }

    fn set(&self, channel: usize, value: i32) {
        match self.values.write().get_mut(channel) {
            Some(slot) => {
                *slot = value;
                tracing::debug!(channel, value, "channel changed");
            }
            None => tracing::warn!(channel, "no such channel"),
        }
    }
}
