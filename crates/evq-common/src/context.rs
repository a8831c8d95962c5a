//! Host application state shared with storage metrics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the host application is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Foreground,
    Background,
}

/// Thread-safe holder for the current [`AppState`], updated by the host.
#[derive(Debug)]
pub struct AppStateCell {
    in_background: AtomicBool,
}

impl AppStateCell {
    pub fn new(initial: AppState) -> Self {
        Self {
            in_background: AtomicBool::new(initial == AppState::Background),
        }
    }

    pub fn set(&self, state: AppState) {
        self.in_background
            .store(state == AppState::Background, Ordering::SeqCst);
    }

    pub fn current(&self) -> AppState {
        if self.in_background.load(Ordering::SeqCst) {
            AppState::Background
        } else {
            AppState::Foreground
        }
    }

    pub fn is_in_background(&self) -> bool {
        self.current() == AppState::Background
    }
}

impl Default for AppStateCell {
    fn default() -> Self {
        Self::new(AppState::Foreground)
    }
}
