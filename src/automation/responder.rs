//! Types the configured reply into the chat box below a trigger.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use super::{Automation, TriggerEvent, input, input_position};
use crate::config::ResponseConfig;
use crate::error::AutomationError;

/// Clicks the input box near the trigger, types the message and sends it.
#[derive(Debug)]
pub struct Responder {
    config: ResponseConfig,
    // The cursor and keyboard are shared; one reply at a time.
    busy: Mutex<()>,
}

impl Responder {
    pub fn new(config: &ResponseConfig) -> Self {
        Self {
            config: config.clone(),
            busy: Mutex::new(()),
        }
    }
}

impl Automation for Responder {
    fn perform(&self, event: &TriggerEvent) -> Result<(), AutomationError> {
        let _guard = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        let (x, y) = input_position(event, &self.config);

        log::info!("{}: replying at ({}, {})", event.cell_id, x, y);

        input::click_at(x, y)?;
        thread::sleep(Duration::from_millis(self.config.click_delay_ms));

        if self.config.clear_before_typing {
            input::clear_field()?;
            thread::sleep(Duration::from_millis(self.config.type_delay_ms));
        }

        input::type_text(&self.config.message)?;
        thread::sleep(Duration::from_millis(self.config.type_delay_ms));

        input::press_enter()?;
        thread::sleep(Duration::from_millis(self.config.send_delay_ms));

        log::info!("{}: reply sent", event.cell_id);
        Ok(())
    }
}
