//! Serializes tests that touch the socket-activation environment.

use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard};

use crate::activation::{LISTEN_FDNAMES, LISTEN_FDS, LISTEN_PID};

static ENV_LOCK: Mutex<()> = Mutex::new(());

const KEYS: [&str; 3] = [LISTEN_PID, LISTEN_FDS, LISTEN_FDNAMES];

/// Holds the environment lock; activation variables start cleared and are
/// restored to their previous values on drop.
pub(crate) struct EnvGuard {
    saved: Vec<(&'static str, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

pub(crate) fn lock() -> EnvGuard {
    let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let saved = KEYS.iter().map(|&k| (k, std::env::var_os(k))).collect();
    for key in KEYS {
        // SAFETY: every test mutating these variables holds ENV_LOCK.
        unsafe { std::env::remove_var(key) };
    }
    EnvGuard { saved, _lock: lock }
}

impl EnvGuard {
    pub(crate) fn set(&self, key: &str, value: &str) {
        // SAFETY: guarded by ENV_LOCK.
        unsafe { std::env::set_var(key, value) };
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..) {
            // SAFETY: guarded by ENV_LOCK, released after this loop.
            unsafe {
                match value {
                    Some(v) => std::env::set_var(key, v),
                    None => std::env::remove_var(key),
                }
            }
        }
    }
}
