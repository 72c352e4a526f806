//! Process-wide engine initialization shared by all clients.

use std::sync::{Arc, Mutex, Weak};

/// Token for the process-wide libcurl initialization.
///
/// The first client to come up initializes the engine; every later client
/// attaches to the same token. Nothing else in the crate consults global
/// state: holding the `Arc` is what keeps the engine initialized.
#[derive(Debug)]
pub struct EngineInit(());

static ENGINE: Mutex<Option<Weak<EngineInit>>> = Mutex::new(None);

/// Acquire the engine token, initializing the engine on first acquisition.
pub fn acquire() -> Arc<EngineInit> {
    let mut slot = ENGINE.lock().unwrap();
    if let Some(weak) = slot.as_ref() {
        if let Some(live) = weak.upgrade() {
            return live;
        }
    }
    curl::init();
    tracing::debug!("transfer engine initialized");
    let live = Arc::new(EngineInit(()));
    *slot = Some(Arc::downgrade(&live));
    live
}

impl Drop for EngineInit {
    fn drop(&mut self) {
        // libcurl stays initialized for the life of the process; tearing it
        // down here could invalidate handles still live on other threads.
        tracing::debug!("last engine token released");
    }
}
