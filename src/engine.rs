//! The review engine: suggestions, votes, acceptance and locks across all units.
//!
//! Every translatable unit is an independently lockable resource. All
//! reads and writes touching a unit's suggestions, votes, lock or accepted
//! translation run inside that unit's critical section, so a vote and the
//! promotion decision it triggers are atomic with respect to every other
//! operation on the same unit. Different units never contend.
//!
//! Lock order is `units map -> unit` and `unit -> suggestion index`; no
//! path takes them in the opposite direction.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

use crate::auth::{Action, Authorizer, PrivilegeGate, PrivilegeSet};
use crate::clock::{Clock, SystemClock};
use crate::components::{ComponentRegistry, ComponentVotingConfig};
use crate::error::ReviewError;
use crate::events::{Notifier, NullNotifier, ReviewEvent};
use crate::lock::{Acquisition, LockSettings, LockSlot};
use crate::metrics::ReviewMetrics;
use crate::model::{
    AcceptedTranslation, AcceptedVia, ComponentKey, Lock, SubmitResult, Suggestion, SuggestionId,
    SuggestionView, UnitKey, UnitSnapshot, Vote, VotePolarity, VoteResult,
};
use crate::policy;
use crate::retry::{with_retry_if, RetryConfig};
use crate::store::SuggestionStore;

/// Everything the engine knows about one unit.
#[derive(Debug, Default)]
struct UnitState {
    store: SuggestionStore,
    lock: LockSlot,
    accepted: Option<AcceptedTranslation>,
}

impl UnitState {
    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.store.is_empty() && self.accepted.is_none() && self.lock.active(now).is_none()
    }
}

pub struct ReviewEngine {
    components: ComponentRegistry,
    authorizer: Arc<dyn Authorizer>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    lock_settings: LockSettings,
    metrics: ReviewMetrics,
    units: RwLock<HashMap<UnitKey, Arc<Mutex<UnitState>>>>,
    suggestion_units: RwLock<HashMap<SuggestionId, UnitKey>>,
    next_suggestion_id: AtomicU64,
}

impl ReviewEngine {
    pub fn new(components: ComponentRegistry, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            components,
            authorizer,
            notifier: Arc::new(NullNotifier),
            clock: Arc::new(SystemClock),
            lock_settings: LockSettings::default(),
            metrics: ReviewMetrics::new(),
            units: RwLock::new(HashMap::new()),
            suggestion_units: RwLock::new(HashMap::new()),
            next_suggestion_id: AtomicU64::new(1),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lock_settings(mut self, settings: LockSettings) -> Self {
        self.lock_settings = settings;
        self
    }

    pub fn metrics(&self) -> &ReviewMetrics {
        &self.metrics
    }

    pub fn lock_settings(&self) -> LockSettings {
        self.lock_settings
    }

    // ==================== Internals ====================

    fn gate(&self) -> PrivilegeGate<'_> {
        PrivilegeGate::new(self.authorizer.as_ref())
    }

    /// Configuration snapshot for the duration of one operation
    fn config_for(&self, component: &ComponentKey) -> Result<Arc<ComponentVotingConfig>, ReviewError> {
        self.components
            .get(component)
            .ok_or_else(|| ReviewError::not_found("component", component))
    }

    fn unit_entry(&self, key: &UnitKey) -> Arc<Mutex<UnitState>> {
        if let Some(unit) = self.existing_unit(key) {
            return unit;
        }
        let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(units.entry(key.clone()).or_default())
    }

    fn existing_unit(&self, key: &UnitKey) -> Option<Arc<Mutex<UnitState>>> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn unit_of(&self, id: SuggestionId) -> Result<UnitKey, ReviewError> {
        self.suggestion_units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| ReviewError::not_found("suggestion", id))
    }

    /// Run `f` inside the unit's critical section, after lazily expiring its lock.
    fn with_unit<R>(
        &self,
        key: &UnitKey,
        f: impl FnOnce(&mut UnitState, DateTime<Utc>) -> Result<R, ReviewError>,
    ) -> Result<R, ReviewError> {
        let unit = self.unit_entry(key);
        let mut state = unit.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        self.expire_lock(key, &mut state, now);
        f(&mut *state, now)
    }

    fn expire_lock(&self, key: &UnitKey, state: &mut UnitState, now: DateTime<Utc>) -> bool {
        match state.lock.expire(now) {
            Some(expired) => {
                info!("Lock on {} held by {} expired", key, expired.holder);
                self.metrics.record_lock_expired();
                self.notifier.notify(ReviewEvent::LockExpired {
                    unit: key.clone(),
                    holder: expired.holder,
                    expired_at: expired.expires_at,
                });
                true
            }
            None => false,
        }
    }

    fn take_lock(
        &self,
        key: &UnitKey,
        state: &mut UnitState,
        user: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lock, ReviewError> {
        self.metrics.record_lock_attempt();
        match state.lock.acquire(user, ttl, now) {
            Ok((lock, Acquisition::Acquired)) => {
                info!("{} locked {} until {}", user, key, lock.expires_at);
                self.notifier.notify(ReviewEvent::LockAcquired {
                    unit: key.clone(),
                    holder: lock.holder.clone(),
                    expires_at: lock.expires_at,
                    at: now,
                });
                Ok(lock)
            }
            Ok((lock, Acquisition::Renewed)) => {
                debug!("{} renewed lock on {} until {}", user, key, lock.expires_at);
                Ok(lock)
            }
            Err(e) => {
                if matches!(e, ReviewError::LockHeld { .. }) {
                    self.metrics.record_lock_conflict();
                }
                debug!("{} could not lock {}: {}", user, key, e);
                Err(e)
            }
        }
    }

    /// Replace the unit's accepted translation. The id of a superseded
    /// accepted suggestion stops resolving.
    fn set_accepted(&self, state: &mut UnitState, accepted: AcceptedTranslation) {
        let superseded = state
            .accepted
            .replace(accepted)
            .and_then(|previous| previous.suggestion_id);
        if let Some(old_id) = superseded {
            self.suggestion_units
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&old_id);
        }
    }

    /// Move a pending suggestion into the unit's accepted translation and
    /// mark the remaining suggestions stale.
    fn promote(
        &self,
        key: &UnitKey,
        state: &mut UnitState,
        id: SuggestionId,
        via: AcceptedVia,
        now: DateTime<Utc>,
    ) -> Result<AcceptedTranslation, ReviewError> {
        let suggestion = state
            .store
            .remove(id)
            .ok_or_else(|| ReviewError::not_found("suggestion", id))?;
        let stale = state.store.mark_all_stale();

        let accepted = AcceptedTranslation {
            text: suggestion.text,
            author: suggestion.author,
            suggestion_id: Some(id),
            via,
            accepted_at: now,
        };
        self.set_accepted(state, accepted.clone());

        match via {
            AcceptedVia::AutoAccept => self.metrics.record_auto_accept(),
            _ => self.metrics.record_manual_accept(),
        }
        info!(
            "Suggestion {} accepted for {} ({:?}), {} other suggestions now stale",
            id, key, via, stale
        );
        self.notifier.notify(ReviewEvent::SuggestionAccepted {
            unit: key.clone(),
            suggestion_id: id,
            author: accepted.author.clone(),
            text: accepted.text.clone(),
            via,
            at: now,
        });
        Ok(accepted)
    }

    /// Run the acceptance policy after a vote mutation
    fn apply_policy(
        &self,
        key: &UnitKey,
        state: &mut UnitState,
        config: &ComponentVotingConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<SuggestionId>, ReviewError> {
        match policy::select_promotion(&state.store, config) {
            Some(id) => {
                self.promote(key, state, id, AcceptedVia::AutoAccept, now)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    // ==================== Suggestions ====================

    /// Submit a suggestion. With voting enabled the author's supporting vote
    /// is registered with it, which alone can satisfy a threshold of 1.
    pub fn add_suggestion(
        &self,
        unit: &UnitKey,
        author: &str,
        text: &str,
    ) -> Result<SubmitResult, ReviewError> {
        let config = self.config_for(&unit.component_key())?;

        self.with_unit(unit, |state, now| {
            let id = SuggestionId(self.next_suggestion_id.fetch_add(1, Ordering::Relaxed));
            let votes = if config.voting_enabled() {
                vec![Vote {
                    voter: author.to_string(),
                    polarity: VotePolarity::For,
                    cast_at: now,
                }]
            } else {
                Vec::new()
            };

            state.store.insert(Suggestion {
                id,
                unit: unit.clone(),
                author: author.to_string(),
                text: text.to_string(),
                created_at: now,
                votes,
                stale: false,
            })?;
            self.suggestion_units
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, unit.clone());

            self.metrics.record_suggestion_added();
            if config.voting_enabled() {
                self.metrics.record_vote();
            }
            info!("{} suggested a translation for {} (suggestion {})", author, unit, id);
            self.notifier.notify(ReviewEvent::SuggestionAdded {
                unit: unit.clone(),
                suggestion_id: id,
                author: author.to_string(),
                at: now,
            });

            let promoted = self.apply_policy(unit, state, &config, now)?;
            Ok(SubmitResult {
                id,
                accepted: promoted == Some(id),
            })
        })
    }

    /// Withdraw a pending suggestion, dropping all of its votes.
    /// Allowed for the author and for users with the override privilege.
    pub fn withdraw_suggestion(&self, id: SuggestionId, actor: &str) -> Result<(), ReviewError> {
        let unit = self.unit_of(id)?;
        let config = self.config_for(&unit.component_key())?;

        self.with_unit(&unit, |state, now| {
            let suggestion = state
                .store
                .get(id)
                .ok_or_else(|| ReviewError::not_found("suggestion", id))?;
            if suggestion.author != actor {
                self.gate().check(
                    actor,
                    &unit.component_key(),
                    &config,
                    Action::OverrideSuggestionState,
                )?;
            }

            state.store.remove(id);
            self.suggestion_units
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);

            self.metrics.record_suggestion_withdrawn();
            info!("Suggestion {} on {} withdrawn by {}", id, unit, actor);
            self.notifier.notify(ReviewEvent::SuggestionWithdrawn {
                unit: unit.clone(),
                suggestion_id: id,
                by: actor.to_string(),
                at: now,
            });
            Ok(())
        })
    }

    /// Pending suggestions of a unit, oldest first
    pub fn list_suggestions(&self, unit: &UnitKey) -> Vec<SuggestionView> {
        match self.existing_unit(unit) {
            Some(entry) => {
                let state = entry.lock().unwrap_or_else(PoisonError::into_inner);
                state.store.list().into_iter().map(SuggestionView::from).collect()
            }
            None => Vec::new(),
        }
    }

    /// Accept a suggestion regardless of its votes. Requires the override
    /// privilege. Accepting the suggestion that is already the unit's
    /// translation is a no-op.
    pub fn accept_suggestion(
        &self,
        id: SuggestionId,
        actor: &str,
    ) -> Result<AcceptedTranslation, ReviewError> {
        let unit = self.unit_of(id)?;
        let config = self.config_for(&unit.component_key())?;
        self.gate().check(
            actor,
            &unit.component_key(),
            &config,
            Action::OverrideSuggestionState,
        )?;

        self.with_unit(&unit, |state, now| {
            if let Some(accepted) = state.accepted.as_ref().filter(|a| a.suggestion_id == Some(id)) {
                return Ok(accepted.clone());
            }
            self.promote(&unit, state, id, AcceptedVia::ManualAccept, now)
        })
    }

    // ==================== Votes ====================

    /// Cast or change a vote. Re-casting overwrites the voter's earlier vote.
    /// The vote and any promotion it triggers happen atomically.
    pub fn cast_vote(
        &self,
        id: SuggestionId,
        voter: &str,
        polarity: VotePolarity,
    ) -> Result<VoteResult, ReviewError> {
        let unit = self.unit_of(id)?;
        let config = self.config_for(&unit.component_key())?;
        self.gate()
            .check(voter, &unit.component_key(), &config, Action::Vote)?;

        self.with_unit(&unit, |state, now| {
            let vote = Vote {
                voter: voter.to_string(),
                polarity,
                cast_at: now,
            };
            let previous = match state.store.insert_vote(id, vote.clone()) {
                Ok(()) => None,
                Err(ReviewError::DuplicateVote { .. }) => state.store.replace_vote(id, vote)?,
                Err(e) => return Err(e),
            };

            let (supporting_votes, opposing_votes) = state
                .store
                .get(id)
                .map(|s| (s.supporting_votes(), s.opposing_votes()))
                .unwrap_or_default();
            self.metrics.record_vote();
            debug!(
                "{} voted {:?} on suggestion {} ({} for, {} against)",
                voter, polarity, id, supporting_votes, opposing_votes
            );

            let promoted = self.apply_policy(&unit, state, &config, now)?;
            Ok(VoteResult {
                suggestion_id: id,
                supporting_votes,
                opposing_votes,
                previous,
                promoted,
            })
        })
    }

    // ==================== Translations ====================

    /// Save a translation directly, bypassing suggestions.
    ///
    /// Honours the unit lock and, in auto-lock mode, takes or renews it for
    /// the saving user. Pending suggestions become stale.
    pub fn save_translation(
        &self,
        unit: &UnitKey,
        user: &str,
        text: &str,
    ) -> Result<AcceptedTranslation, ReviewError> {
        let config = self.config_for(&unit.component_key())?;
        self.gate()
            .check(user, &unit.component_key(), &config, Action::SaveDirect)?;

        self.with_unit(unit, |state, now| {
            if self.lock_settings.auto_lock {
                self.take_lock(unit, state, user, self.lock_settings.auto_lock_time, now)?;
            } else {
                state.lock.ensure_editable(user, now)?;
            }

            let accepted = AcceptedTranslation {
                text: text.to_string(),
                author: user.to_string(),
                suggestion_id: None,
                via: AcceptedVia::DirectSave,
                accepted_at: now,
            };
            self.set_accepted(state, accepted.clone());
            let stale = state.store.mark_all_stale();

            self.metrics.record_direct_save();
            info!("{} saved a translation for {} ({} suggestions now stale)", user, unit, stale);
            self.notifier.notify(ReviewEvent::TranslationSaved {
                unit: unit.clone(),
                author: user.to_string(),
                text: text.to_string(),
                at: now,
            });
            Ok(accepted)
        })
    }

    pub fn accepted_translation(&self, unit: &UnitKey) -> Option<AcceptedTranslation> {
        let entry = self.existing_unit(unit)?;
        let state = entry.lock().unwrap_or_else(PoisonError::into_inner);
        state.accepted.clone()
    }

    // ==================== Locks ====================

    /// Lock a unit for `user`, or extend the lock if they already hold it.
    /// `ttl` defaults to `LOCK_TIME`. Never waits.
    pub fn acquire_lock(
        &self,
        unit: &UnitKey,
        user: &str,
        ttl: Option<Duration>,
    ) -> Result<Lock, ReviewError> {
        self.config_for(&unit.component_key())?;
        let ttl = ttl.unwrap_or(self.lock_settings.lock_time);
        self.with_unit(unit, |state, now| self.take_lock(unit, state, user, ttl, now))
    }

    /// [`acquire_lock`](Self::acquire_lock) retried with backoff while the
    /// lock is held by someone else. Other errors are returned at once.
    pub async fn acquire_lock_waiting(
        &self,
        unit: &UnitKey,
        user: &str,
        ttl: Option<Duration>,
        retry: &RetryConfig,
    ) -> Result<Lock, ReviewError> {
        with_retry_if(
            retry,
            "acquire lock",
            || async { self.acquire_lock(unit, user, ttl) },
            ReviewError::is_retryable,
        )
        .await
    }

    /// Extend a lock `user` holds. `ttl` defaults to `LOCK_TIME`.
    pub fn renew_lock(
        &self,
        unit: &UnitKey,
        user: &str,
        ttl: Option<Duration>,
    ) -> Result<Lock, ReviewError> {
        self.config_for(&unit.component_key())?;
        let ttl = ttl.unwrap_or(self.lock_settings.lock_time);
        self.with_unit(unit, |state, now| {
            let lock = state.lock.renew(unit, user, ttl, now)?;
            debug!("{} renewed lock on {} until {}", user, unit, lock.expires_at);
            Ok(lock)
        })
    }

    /// Release a lock. Only the holder or a user with the override privilege may.
    pub fn release_lock(&self, unit: &UnitKey, user: &str) -> Result<(), ReviewError> {
        let component = unit.component_key();
        let config = self.config_for(&component)?;
        let can_override = self
            .gate()
            .privileges(user, &component, &config)
            .can_override_suggestion_state;

        self.with_unit(unit, |state, now| {
            let released = state.lock.release(unit, user, can_override, now)?;
            info!("Lock on {} held by {} released by {}", unit, released.holder, user);
            self.notifier.notify(ReviewEvent::LockReleased {
                unit: unit.clone(),
                holder: released.holder,
                by: user.to_string(),
                at: now,
            });
            Ok(())
        })
    }

    /// First edit of a unit. In auto-lock mode this locks it for
    /// `AUTO_LOCK_TIME`; otherwise it only reports the current lock.
    pub fn begin_edit(&self, unit: &UnitKey, user: &str) -> Result<Option<Lock>, ReviewError> {
        if !self.lock_settings.auto_lock {
            return Ok(self.lock_status(unit));
        }
        self.acquire_lock(unit, user, Some(self.lock_settings.auto_lock_time))
            .map(Some)
    }

    /// "Still editing" signal. In auto-lock mode this renews the edit lock.
    pub fn heartbeat(&self, unit: &UnitKey, user: &str) -> Result<Option<Lock>, ReviewError> {
        if !self.lock_settings.auto_lock {
            return Ok(self.lock_status(unit));
        }
        self.renew_lock(unit, user, Some(self.lock_settings.auto_lock_time))
            .map(Some)
    }

    /// The lock currently in force on a unit, if any
    pub fn lock_status(&self, unit: &UnitKey) -> Option<Lock> {
        let entry = self.existing_unit(unit)?;
        let mut state = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        self.expire_lock(unit, &mut state, now);
        state.lock.active(now).cloned()
    }

    /// Reclaim expired locks and forget units with no state left.
    /// Returns the number of locks that expired.
    ///
    /// Not needed for correctness: every operation expires locks lazily.
    pub fn sweep_expired_locks(&self) -> usize {
        let entries: Vec<(UnitKey, Arc<Mutex<UnitState>>)> = self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let now = self.clock.now();
        let mut expired = 0;
        for (key, entry) in &entries {
            let mut state = entry.lock().unwrap_or_else(PoisonError::into_inner);
            if self.expire_lock(key, &mut state, now) {
                expired += 1;
            }
        }
        drop(entries);

        // Only entries nobody else holds a handle to can be dropped safely
        let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
        let before = units.len();
        units.retain(|_, entry| {
            Arc::strong_count(entry) > 1
                || entry.try_lock().map(|s| !s.is_idle(now)).unwrap_or(true)
        });
        let forgotten = before - units.len();

        if expired > 0 || forgotten > 0 {
            info!(
                "Lock sweep: {} expired, {} idle units forgotten",
                expired, forgotten
            );
        }
        expired
    }

    // ==================== Queries ====================

    /// Accepted translation, suggestions and lock of a unit, read atomically
    pub fn unit_snapshot(&self, unit: &UnitKey) -> UnitSnapshot {
        let mut snapshot = UnitSnapshot {
            unit: unit.clone(),
            accepted: None,
            suggestions: Vec::new(),
            lock: None,
        };
        if let Some(entry) = self.existing_unit(unit) {
            let mut state = entry.lock().unwrap_or_else(PoisonError::into_inner);
            let now = self.clock.now();
            self.expire_lock(unit, &mut state, now);
            snapshot.accepted = state.accepted.clone();
            snapshot.suggestions = state.store.list().into_iter().map(SuggestionView::from).collect();
            snapshot.lock = state.lock.active(now).cloned();
        }
        snapshot
    }

    /// Effective privileges of `user` on a component
    pub fn privileges(&self, user: &str, component: &ComponentKey) -> Result<PrivilegeSet, ReviewError> {
        let config = self.config_for(component)?;
        Ok(self.gate().privileges(user, component, &config))
    }
}
