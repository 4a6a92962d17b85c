//! Owner-keyed registry of rendered video views.
//!
//! The registry is closed while the client is outside a channel. A closed
//! registry refuses new views, so a remote publish delivered after leave
//! cannot bring a view back.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use shared::domain::{ParticipantId, ViewHandle};
use tokio::sync::Mutex;
use tracing::debug;

use crate::surface::RenderSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewOwner {
    Local,
    Remote(ParticipantId),
}

#[derive(Default)]
struct RegistryState {
    views: HashMap<ViewOwner, ViewHandle>,
    open: bool,
}

pub struct ViewRegistry {
    surface: Arc<dyn RenderSurface>,
    state: Mutex<RegistryState>,
    next_handle: AtomicU64,
}

impl ViewRegistry {
    pub fn new(surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            surface,
            state: Mutex::new(RegistryState::default()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub async fn open(&self) {
        self.state.lock().await.open = true;
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }

    /// Returns the owner's view, creating it if needed. `None` once closed.
    pub async fn upsert(&self, owner: ViewOwner, label: &str) -> Option<ViewHandle> {
        let mut state = self.state.lock().await;
        if !state.open {
            debug!(?owner, "views: registry closed, refusing view");
            return None;
        }
        if let Some(view) = state.views.get(&owner) {
            return Some(*view);
        }
        let view = ViewHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.surface.create_view(view, label);
        state.views.insert(owner, view);
        Some(view)
    }

    pub async fn remove(&self, owner: ViewOwner) -> bool {
        let removed = self.state.lock().await.views.remove(&owner);
        match removed {
            Some(view) => {
                self.surface.remove_view(view);
                true
            }
            None => false,
        }
    }

    /// Closes the registry and removes every view. Returns how many were removed.
    pub async fn close(&self) -> usize {
        let mut state = self.state.lock().await;
        state.open = false;
        let removed = state.views.len();
        for (_, view) in state.views.drain() {
            self.surface.remove_view(view);
        }
        removed
    }

    pub async fn get(&self, owner: ViewOwner) -> Option<ViewHandle> {
        self.state.lock().await.views.get(&owner).copied()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.views.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
