//! Privilege gate: decides whether a user may save directly, vote, or
//! override suggestion state on a component.
//!
//! The gate holds no state. Roles and grants live in an [`Authorizer`]
//! supplied by the embedding application; [`StaticAuthorizer`] is the
//! grant table loaded from the component catalog.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::components::ComponentVotingConfig;
use crate::error::ReviewError;
use crate::model::ComponentKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SaveDirect,
    Vote,
    OverrideSuggestionState,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SaveDirect => "save_direct",
            Self::Vote => "vote",
            Self::OverrideSuggestionState => "override_suggestion_state",
        };
        f.write_str(name)
    }
}

/// External authorization collaborator.
pub trait Authorizer: Send + Sync {
    fn has_permission(&self, user: &str, component: &ComponentKey, capability: Capability) -> bool;
}

/// Per-component grant table: component -> user -> capabilities.
#[derive(Debug, Default, Clone)]
pub struct StaticAuthorizer {
    grants: HashMap<ComponentKey, HashMap<String, HashSet<Capability>>>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `capability` to `user` on `component`
    pub fn grant(&mut self, component: &ComponentKey, user: &str, capability: Capability) {
        self.grants
            .entry(component.clone())
            .or_default()
            .entry(user.to_string())
            .or_default()
            .insert(capability);
    }

    /// Builder-style variant of [`grant`](Self::grant)
    pub fn with_grant(mut self, component: &ComponentKey, user: &str, capability: Capability) -> Self {
        self.grant(component, user, capability);
        self
    }
}

impl Authorizer for StaticAuthorizer {
    fn has_permission(&self, user: &str, component: &ComponentKey, capability: Capability) -> bool {
        self.grants
            .get(component)
            .and_then(|users| users.get(user))
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false)
    }
}

/// Mutating actions checked by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SaveDirect,
    Vote,
    OverrideSuggestionState,
}

/// The set of capabilities a user effectively holds on a component, after
/// component configuration has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrivilegeSet {
    pub can_save_direct: bool,
    pub can_vote: bool,
    pub can_override_suggestion_state: bool,
}

/// Stateless gate evaluated before every mutating engine call.
pub struct PrivilegeGate<'a> {
    authorizer: &'a dyn Authorizer,
}

impl<'a> PrivilegeGate<'a> {
    pub fn new(authorizer: &'a dyn Authorizer) -> Self {
        Self { authorizer }
    }

    /// Effective privileges of `user` on `component` under `config`.
    ///
    /// With automatic acceptance enabled, direct saves are only available to
    /// users holding the override privilege.
    pub fn privileges(
        &self,
        user: &str,
        component: &ComponentKey,
        config: &ComponentVotingConfig,
    ) -> PrivilegeSet {
        let has = |cap| self.authorizer.has_permission(user, component, cap);
        let can_override = has(Capability::OverrideSuggestionState);
        let can_save_direct = if config.auto_accept_enabled() {
            can_override
        } else {
            can_override || has(Capability::SaveDirect)
        };

        PrivilegeSet {
            can_save_direct,
            can_vote: config.voting_enabled() && has(Capability::Vote),
            can_override_suggestion_state: can_override,
        }
    }

    /// Allow or deny `action`. Denials name the capability that was missing.
    pub fn check(
        &self,
        user: &str,
        component: &ComponentKey,
        config: &ComponentVotingConfig,
        action: Action,
    ) -> Result<(), ReviewError> {
        let privileges = self.privileges(user, component, config);
        let denied = |required, detail| ReviewError::PermissionDenied {
            user: user.to_string(),
            required,
            detail,
        };

        match action {
            Action::Vote if !config.voting_enabled() => {
                Err(denied(Capability::Vote, "voting is disabled for this component"))
            }
            Action::Vote if !privileges.can_vote => {
                Err(denied(Capability::Vote, "missing vote permission"))
            }
            Action::SaveDirect if !privileges.can_save_direct => {
                if config.auto_accept_enabled() {
                    Err(denied(
                        Capability::OverrideSuggestionState,
                        "automatic acceptance is enabled, translations go through suggestions",
                    ))
                } else {
                    Err(denied(Capability::SaveDirect, "missing save permission"))
                }
            }
            Action::OverrideSuggestionState if !privileges.can_override_suggestion_state => Err(
                denied(Capability::OverrideSuggestionState, "missing override permission"),
            ),
            _ => Ok(()),
        }
    }
}
