//! Shared session and connection caches across handles.
//!
//! Handles built by a shared-mode client all attach one engine share object,
//! so concurrent transfers reuse DNS results, TLS sessions and pooled
//! connections instead of each paying full setup cost. The engine guards its
//! internal access with the lock/unlock callbacks installed here, one lock
//! per engine-defined resource category.

use std::os::raw::{c_int, c_void};
use std::sync::{Arc, Condvar, Mutex};

use curl::easy::{Easy2, Handler};

use crate::error::HttpError;

/// Slots for the engine's lock-data categories. The engine currently
/// defines seven; anything past the table maps to the last slot.
const LOCK_CATEGORIES: usize = 8;

/// Binary lock usable from C lock/unlock callbacks.
///
/// The callbacks arrive as a separate lock call and unlock call, possibly
/// on different stack frames, so no guard can be held across the pair.
#[derive(Debug, Default)]
struct CategoryLock {
    held: Mutex<bool>,
    cv: Condvar,
}

impl CategoryLock {
    fn acquire(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.cv.wait(held).unwrap();
        }
        *held = true;
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap();
        *held = false;
        drop(held);
        self.cv.notify_one();
    }
}

/// Engine share object plus its category locks.
///
/// Create once, pass the `Arc` to every client that should pool sessions.
/// Each handle built by those clients attaches the share object and holds
/// the `Arc`, so the object outlives every handle that references it; the
/// engine share is cleaned up only when the last holder drops.
#[derive(Debug)]
pub struct ShareContext {
    raw: *mut curl_sys::CURLSH,
    locks: [CategoryLock; LOCK_CATEGORIES],
}

// The raw share object is touched by the engine under the category locks
// installed at construction, by attach() while a handle is being built, and
// by cleanup in Drop once no handle references it.
unsafe impl Send for ShareContext {}
unsafe impl Sync for ShareContext {}

impl ShareContext {
    /// Allocate the engine share object, install the lock callbacks and
    /// enable sharing of the DNS cache, TLS session cache and connection
    /// pool.
    pub fn new() -> Result<Arc<Self>, HttpError> {
        // A context may be created before any client initializes the engine.
        curl::init();
        let raw = unsafe { curl_sys::curl_share_init() };
        if raw.is_null() {
            return Err(HttpError::Share("engine share allocation failed".to_string()));
        }
        let ctx = Arc::new(ShareContext {
            raw,
            locks: Default::default(),
        });

        // The Arc allocation gives the callbacks a stable address for as
        // long as any handle holds the context.
        let userdata = Arc::as_ptr(&ctx) as *mut c_void;
        let lock: extern "C" fn(*mut curl_sys::CURL, c_int, c_int, *mut c_void) = share_lock;
        let unlock: extern "C" fn(*mut curl_sys::CURL, c_int, *mut c_void) = share_unlock;
        unsafe {
            share_try(curl_sys::curl_share_setopt(raw, curl_sys::CURLSHOPT_LOCKFUNC, lock))?;
            share_try(curl_sys::curl_share_setopt(raw, curl_sys::CURLSHOPT_UNLOCKFUNC, unlock))?;
            share_try(curl_sys::curl_share_setopt(raw, curl_sys::CURLSHOPT_USERDATA, userdata))?;
            share_try(curl_sys::curl_share_setopt(
                raw,
                curl_sys::CURLSHOPT_SHARE,
                curl_sys::CURL_LOCK_DATA_DNS as c_int,
            ))?;
            share_try(curl_sys::curl_share_setopt(
                raw,
                curl_sys::CURLSHOPT_SHARE,
                curl_sys::CURL_LOCK_DATA_SSL_SESSION as c_int,
            ))?;
            share_try(curl_sys::curl_share_setopt(
                raw,
                curl_sys::CURLSHOPT_SHARE,
                curl_sys::CURL_LOCK_DATA_CONNECT as c_int,
            ))?;
        }
        tracing::debug!("share context initialized");
        Ok(ctx)
    }

    /// Attach the share object to a handle being built.
    pub(crate) fn attach<H: Handler>(&self, handle: &Easy2<H>) -> Result<(), HttpError> {
        let rc = unsafe {
            curl_sys::curl_easy_setopt(handle.raw(), curl_sys::CURLOPT_SHARE, self.raw)
        };
        if rc != curl_sys::CURLE_OK {
            return Err(HttpError::Engine(curl::Error::new(rc)));
        }
        Ok(())
    }

    fn slot(&self, data: c_int) -> &CategoryLock {
        let idx = (data.max(0) as usize).min(LOCK_CATEGORIES - 1);
        &self.locks[idx]
    }
}

impl Drop for ShareContext {
    fn drop(&mut self) {
        // Every attached handle holds an Arc to this context, so no handle
        // references the share object by the time Drop runs.
        let rc = unsafe { curl_sys::curl_share_cleanup(self.raw) };
        if rc != curl_sys::CURLSHE_OK {
            tracing::warn!("share cleanup returned {}", rc);
        }
    }
}

extern "C" fn share_lock(
    _handle: *mut curl_sys::CURL,
    data: c_int,
    _access: c_int,
    userptr: *mut c_void,
) {
    let ctx = unsafe { &*(userptr as *const ShareContext) };
    ctx.slot(data).acquire();
}

extern "C" fn share_unlock(_handle: *mut curl_sys::CURL, data: c_int, userptr: *mut c_void) {
    let ctx = unsafe { &*(userptr as *const ShareContext) };
    ctx.slot(data).release();
}

fn share_try(rc: curl_sys::CURLSHcode) -> Result<(), HttpError> {
    if rc == curl_sys::CURLSHE_OK {
        Ok(())
    } else {
        Err(HttpError::Share(format!("share option rejected: {}", rc)))
    }
}
