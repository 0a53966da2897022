//! Scoped assumption of a filesystem user/group identity.
//!
//! POSIX-family backends perform each native call under the identity the
//! backend (or handle) was configured with. [`UserCtx`] switches the calling
//! thread's filesystem uid/gid on construction, reports whether the switch
//! took effect via [`UserCtx::valid`], and restores the previous identity when
//! dropped, on every exit path.
//!
//! The switch itself sits behind the [`IdentitySwitch`] trait so that the
//! mechanism can be per-thread kernel state ([`ThreadFsIdentity`]), a client
//! library's own setter, or nothing at all ([`NoIdentity`]).

use tracing::trace;

use crate::{FsError, Identity};

/// Mechanism for reading and changing the filesystem identity of the
/// calling thread.
///
/// Setters follow `setfsuid(2)` semantics: they return the previous value and
/// report failure only through a subsequent [`current`](Self::current) read.
pub trait IdentitySwitch: Send + Sync {
    /// Sets the filesystem uid; returns the previous one.
    fn set_uid(&self, uid: u32) -> u32;

    /// Sets the filesystem gid; returns the previous one.
    fn set_gid(&self, gid: u32) -> u32;

    /// Current `(uid, gid)`.
    fn current(&self) -> (u32, u32);

    /// Whether switching actually changes anything on this platform.
    fn enforced(&self) -> bool {
        true
    }
}

/// Per-thread filesystem identity via `setfsuid`/`setfsgid`.
///
/// On platforms without per-thread filesystem credentials this degrades to a
/// no-op that is always valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadFsIdentity;

#[cfg(any(target_os = "linux", target_os = "android"))]
impl IdentitySwitch for ThreadFsIdentity {
    fn set_uid(&self, uid: u32) -> u32 {
        crate::sys::setfsuid(uid)
    }

    fn set_gid(&self, gid: u32) -> u32 {
        crate::sys::setfsgid(gid)
    }

    fn current(&self) -> (u32, u32) {
        // An invalid id leaves the value untouched and returns it.
        (crate::sys::setfsuid(u32::MAX), crate::sys::setfsgid(u32::MAX))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl IdentitySwitch for ThreadFsIdentity {
    fn set_uid(&self, _uid: u32) -> u32 {
        crate::sys::geteuid()
    }

    fn set_gid(&self, _gid: u32) -> u32 {
        crate::sys::getegid()
    }

    fn current(&self) -> (u32, u32) {
        (crate::sys::geteuid(), crate::sys::getegid())
    }

    fn enforced(&self) -> bool {
        false
    }
}

/// A switch for backends that do not enforce identity locally.
///
/// Every requested identity is reported as assumed. Callers must not rely on
/// any enforcement when this switch is in use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentitySwitch for NoIdentity {
    fn set_uid(&self, uid: u32) -> u32 {
        uid
    }

    fn set_gid(&self, gid: u32) -> u32 {
        gid
    }

    fn current(&self) -> (u32, u32) {
        (u32::MAX, u32::MAX)
    }

    fn enforced(&self) -> bool {
        false
    }
}

/// Guard holding an assumed identity for the current scope.
///
/// # Example
///
/// ```rust
/// use storage_helpers::{Identity, NoIdentity, UserCtx};
///
/// let ctx = UserCtx::enter(&NoIdentity, Identity::new(1000, 1000));
/// assert!(ctx.valid());
/// // previous identity is restored when `ctx` goes out of scope
/// ```
#[must_use = "the identity is restored as soon as the guard is dropped"]
pub struct UserCtx<'a> {
    switch: &'a dyn IdentitySwitch,
    previous_uid: Option<u32>,
    previous_gid: Option<u32>,
    valid: bool,
}

impl<'a> UserCtx<'a> {
    /// Captures the current identity and switches to `identity`.
    pub fn enter(switch: &'a dyn IdentitySwitch, identity: Identity) -> Self {
        if !switch.enforced() || identity.is_unspecified() {
            return Self {
                switch,
                previous_uid: None,
                previous_gid: None,
                valid: true,
            };
        }

        let previous_uid = identity.uid.map(|uid| switch.set_uid(uid));
        let previous_gid = identity.gid.map(|gid| switch.set_gid(gid));

        let (uid, gid) = switch.current();
        let valid = identity.uid.is_none_or(|u| u == uid) && identity.gid.is_none_or(|g| g == gid);

        if !valid {
            trace!(?identity, "failed to assume identity");
        }

        Self {
            switch,
            previous_uid,
            previous_gid,
            valid,
        }
    }

    /// Returns `true` if every specified field of the requested identity is
    /// now in effect.
    pub fn valid(&self) -> bool {
        self.valid
    }
}

impl Drop for UserCtx<'_> {
    fn drop(&mut self) {
        if let Some(uid) = self.previous_uid {
            self.switch.set_uid(uid);
        }
        if let Some(gid) = self.previous_gid {
            self.switch.set_gid(gid);
        }
    }
}

/// Runs `call` under `identity`, failing with [`ErrorCode::Domain`](crate::ErrorCode::Domain)
/// without invoking it if the identity cannot be assumed.
pub fn run_as<T>(
    switch: &dyn IdentitySwitch,
    identity: Identity,
    operation: &'static str,
    call: impl FnOnce() -> Result<T, FsError>,
) -> Result<T, FsError> {
    let ctx = UserCtx::enter(switch, identity);
    if !ctx.valid() {
        return Err(FsError::domain(operation));
    }
    call()
}
