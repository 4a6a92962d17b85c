use std::sync::{Mutex, PoisonError};

use client_core::{ChatRow, ControlState, RenderSurface};
use shared::{domain::ViewHandle, error::Alert};

/// Line-oriented stand-in for the video grid and chat panel.
pub struct TerminalSurface {
    controls: Mutex<ControlState>,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self {
            controls: Mutex::new(ControlState::idle()),
        }
    }
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for TerminalSurface {
    fn create_view(&self, view: ViewHandle, label: &str) {
        println!("[video #{view}] {label}");
    }

    fn remove_view(&self, view: ViewHandle) {
        println!("[video #{view}] removed");
    }

    fn append_message(&self, row: ChatRow) {
        let time = row.created_at.format("%H:%M:%S");
        let marker = if row.local { ">" } else { "<" };
        println!("{time} {marker} {}: {}", row.sender_name, row.content);
    }

    fn clear_messages(&self) {
        println!("--- chat cleared ---");
    }

    fn system_notice(&self, text: &str) {
        println!("* {text}");
    }

    fn alert(&self, alert: &Alert) {
        eprintln!("! {}: {}", alert.code.title(), alert.message);
    }

    fn controls(&self) -> ControlState {
        *self.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_controls(&self, controls: ControlState) {
        *self.controls.lock().unwrap_or_else(PoisonError::into_inner) = controls;
    }
}
