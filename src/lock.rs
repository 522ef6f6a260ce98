//! Translation lock state machine for a single unit.
//!
//! `UNLOCKED -> LOCKED(holder, expires_at) -> UNLOCKED`
//!
//! Expiry is lazy: a lock with `now >= expires_at` is treated as absent by
//! every operation. [`LockSlot::expire`] clears such a lock and hands it
//! back so the caller can report the expiry.

use chrono::{DateTime, Duration, Utc};

use crate::auth::Capability;
use crate::error::ReviewError;
use crate::model::{Lock, UnitKey};

/// Longest lifetime a single acquire or renew may request (one week)
pub const MAX_LOCK_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Expiry of a lock taken at `now` for `ttl`.
///
/// Rejects non-positive lifetimes and anything above [`MAX_LOCK_TTL_SECS`].
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, ReviewError> {
    let invalid = || ReviewError::InvalidLockDuration {
        max_secs: MAX_LOCK_TTL_SECS,
    };
    if ttl <= Duration::zero() || ttl.num_seconds() > MAX_LOCK_TTL_SECS {
        return Err(invalid());
    }
    now.checked_add_signed(ttl).ok_or_else(invalid)
}

/// Lock lifetimes, read from `LOCK_TIME` / `AUTO_LOCK_TIME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// TTL of explicitly requested locks
    pub lock_time: Duration,
    /// TTL of implicit locks taken on edit and of heartbeats
    pub auto_lock_time: Duration,
    /// Whether the first edit of a unit locks it
    pub auto_lock: bool,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lock_time: Duration::seconds(900),
            auto_lock_time: Duration::seconds(60),
            auto_lock: true,
        }
    }
}

/// What [`LockSlot::acquire`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    Renewed,
}

#[derive(Debug, Default, Clone)]
pub struct LockSlot {
    current: Option<Lock>,
}

impl LockSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the lock if it has expired, returning it
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<Lock> {
        if self.current.as_ref().is_some_and(|l| l.is_expired(now)) {
            self.current.take()
        } else {
            None
        }
    }

    /// The lock in force at `now`
    pub fn active(&self, now: DateTime<Utc>) -> Option<&Lock> {
        self.current.as_ref().filter(|l| !l.is_expired(now))
    }

    /// Take the lock, or extend it if `user` already holds it.
    ///
    /// Check and transition happen under the same `&mut self`, so two
    /// callers serialized on the unit can never both succeed.
    pub fn acquire(
        &mut self,
        user: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(Lock, Acquisition), ReviewError> {
        let expires_at = expiry_after(now, ttl)?;
        match self.active(now) {
            Some(lock) if lock.holder != user => Err(ReviewError::LockHeld {
                holder: lock.holder.clone(),
                expires_at: lock.expires_at,
            }),
            Some(lock) => {
                let renewed = Lock {
                    holder: lock.holder.clone(),
                    acquired_at: lock.acquired_at,
                    expires_at,
                };
                self.current = Some(renewed.clone());
                Ok((renewed, Acquisition::Renewed))
            }
            None => {
                let lock = Lock {
                    holder: user.to_string(),
                    acquired_at: now,
                    expires_at,
                };
                self.current = Some(lock.clone());
                Ok((lock, Acquisition::Acquired))
            }
        }
    }

    /// Extend a lock `user` already holds.
    pub fn renew(
        &mut self,
        unit: &UnitKey,
        user: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lock, ReviewError> {
        match self.active(now) {
            None => Err(ReviewError::NotLocked { unit: unit.clone() }),
            Some(lock) if lock.holder != user => Err(ReviewError::LockHeldByOther {
                holder: lock.holder.clone(),
                expires_at: lock.expires_at,
            }),
            Some(_) => self.acquire(user, ttl, now).map(|(lock, _)| lock),
        }
    }

    /// Release the lock. Only the holder, or a user with the override
    /// privilege, may release it.
    pub fn release(
        &mut self,
        unit: &UnitKey,
        user: &str,
        can_override: bool,
        now: DateTime<Utc>,
    ) -> Result<Lock, ReviewError> {
        match self.active(now) {
            None => Err(ReviewError::NotLocked { unit: unit.clone() }),
            Some(lock) if lock.holder != user && !can_override => {
                Err(ReviewError::PermissionDenied {
                    user: user.to_string(),
                    required: Capability::OverrideSuggestionState,
                    detail: "the lock is held by another user",
                })
            }
            Some(_) => self
                .current
                .take()
                .ok_or_else(|| ReviewError::NotLocked { unit: unit.clone() }),
        }
    }

    /// Fails with `LockHeld` if someone other than `user` holds the lock
    pub fn ensure_editable(&self, user: &str, now: DateTime<Utc>) -> Result<(), ReviewError> {
        match self.active(now) {
            Some(lock) if lock.holder != user => Err(ReviewError::LockHeld {
                holder: lock.holder.clone(),
                expires_at: lock.expires_at,
            }),
            _ => Ok(()),
        }
    }
}
