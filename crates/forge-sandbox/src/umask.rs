//! File-creation mode hint
//!
//! A restrictive umask makes files the candidate creates private to the
//! current user. This is a courtesy guard against accidental clutter, NOT a
//! security boundary: the candidate can still write anywhere the user can,
//! open sockets, or reset its own umask.
//!
//! The umask is process-wide. Guards are serialized on one lock so that
//! concurrent executions restore masks in order; hold a guard only around the
//! synchronous spawn, never across an `.await`.

use parking_lot::{const_mutex, Mutex, MutexGuard};

static UMASK_LOCK: Mutex<()> = const_mutex(());

/// Restores the previous umask when dropped
#[derive(Debug)]
pub struct UmaskGuard {
    #[cfg(unix)]
    previous: Option<nix::sys::stat::Mode>,
    // Released after `drop` has restored the mask.
    _serial: Option<MutexGuard<'static, ()>>,
}

impl UmaskGuard {
    /// Install `0o077` if `enabled`, otherwise leave the umask alone
    #[must_use]
    pub fn restrict(enabled: bool) -> Self {
        if !enabled {
            return Self {
                #[cfg(unix)]
                previous: None,
                _serial: None,
            };
        }
        let serial = UMASK_LOCK.lock();
        #[cfg(unix)]
        {
            use nix::sys::stat::{umask, Mode};
            Self {
                previous: Some(umask(Mode::from_bits_truncate(0o077))),
                _serial: Some(serial),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                _serial: Some(serial),
            }
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(previous) = self.previous.take() {
            nix::sys::stat::umask(previous);
        }
    }
}

/// Current process umask, read without racing live guards
#[cfg(unix)]
#[must_use]
pub fn current() -> u32 {
    use nix::sys::stat::{umask, Mode};
    let _serial = UMASK_LOCK.lock();
    let mask = umask(Mode::empty());
    umask(mask);
    u32::from(mask.bits())
}
