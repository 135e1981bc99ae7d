//! Console command interpreter of the simulated device
//!
//! Understands the channel commands and a reboot. `backlog` runs a `;`
//! separated list of commands in order.

use std::sync::Arc;
use std::time::Duration;

use fwrest_core::{ChannelBank, CommandDispatcher, CoreError, CoreResult, ResetScheduler};
use parking_lot::Mutex;

/// Delay applied to console-initiated reboots
const RESTART_DELAY: Duration = Duration::from_secs(1);

pub struct SimConsole {
    channels: Arc<dyn ChannelBank>,
    reset: Arc<dyn ResetScheduler>,
    history: Mutex<Vec<String>>,
}

fn int_arg(command: &str, arg: Option<&str>) -> CoreResult<i64> {
    let arg = arg.ok_or_else(|| CoreError::Parse(format!("{}: missing argument", command)))?;
    arg.parse()
        .map_err(|_| CoreError::Parse(format!("{}: '{}' is not a number", command, arg)))
}

fn channel_arg(command: &str, arg: Option<&str>) -> CoreResult<usize> {
    let channel = int_arg(command, arg)?;
    usize::try_from(channel)
        .map_err(|_| CoreError::Parse(format!("{}: bad channel {}", command, channel)))
}

impl SimConsole {
    pub fn new(channels: Arc<dyn ChannelBank>, reset: Arc<dyn ResetScheduler>) -> Self {
        Self {
            channels,
            reset,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Commands executed so far, oldest first
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    fn run_one(&self, line: &str) -> CoreResult<()> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(());
        };
        self.history.lock().push(line.to_string());

        match command.to_ascii_lowercase().as_str() {
            "setchannel" => {
                let channel = channel_arg(command, words.next())?;
                let value = int_arg(command, words.next())?;
                self.channels.set(channel, value as i32);
            }
            "addchannel" => {
                let channel = channel_arg(command, words.next())?;
                let delta = int_arg(command, words.next())?;
                let value = self.channels.get(channel).saturating_add(delta as i32);
                self.channels.set(channel, value);
            }
            "togglechannel" => {
                let channel = channel_arg(command, words.next())?;
                let value = if self.channels.get(channel) == 0 { 1 } else { 0 };
                self.channels.set(channel, value);
            }
            "restart" | "reboot" => self.reset.schedule_reset(RESTART_DELAY),
            "backlog" => {
                let rest = line[command.len()..].trim();
                for part in rest.split(';') {
                    self.run_one(part.trim())?;
                }
            }
            _ => {
                return Err(CoreError::Unsupported(format!("unknown command '{}'", command)));
            }
        }
        Ok(())
    }
}

impl CommandDispatcher for SimConsole {
    fn execute(&self, command: &str) -> CoreResult<()> {
        tracing::debug!(command, "console");
        self.run_one(command.trim()).inspect_err(|e| {
            tracing::warn!(command, error = %e, "console command failed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemChannels, ResetNotifier};

    fn console() -> (SimConsole, Arc<MemChannels>, ResetNotifier) {
        let channels = Arc::new(MemChannels::new(8));
        let reset = ResetNotifier::new();
        let console = SimConsole::new(channels.clone(), Arc::new(reset.clone()));
        (console, channels, reset)
    }

    #[test]
    fn channel_commands() {
        let (console, channels, _) = console();
        console.execute("setChannel 3 40").unwrap();
        console.execute("addChannel 3 -15").unwrap();
        console.execute("toggleChannel 4").unwrap();
        assert_eq!(channels.get(3), 25);
        assert_eq!(channels.get(4), 1);
    }

    #[test]
    fn backlog_runs_in_order() {
        let (console, channels, _) = console();
        console.execute("backlog setChannel 1 5; addChannel 1 2").unwrap();
        assert_eq!(channels.get(1), 7);
        assert_eq!(console.history().len(), 3);
    }

    #[test]
    fn bad_input_is_reported() {
        let (console, _, _) = console();
        assert!(matches!(console.execute("setChannel x 1"), Err(CoreError::Parse(_))));
        assert!(matches!(console.execute("frobnicate"), Err(CoreError::Unsupported(_))));
        assert!(console.execute("   ").is_ok());
    }

    #[tokio::test]
    async fn restart_schedules_reset() {
        let (console, _, reset) = console();
        console.execute("restart").unwrap();
        assert!(reset.is_scheduled());
    }
}
