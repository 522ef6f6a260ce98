//! Core data model: identities, suggestions, votes, locks and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a user as supplied by the caller (login name).
pub type UserId = String;

/// A (project, component) pair. Voting configuration and permissions are scoped to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentKey {
    pub project: String,
    pub component: String,
}

impl ComponentKey {
    pub fn new(project: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            component: component.into(),
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.component)
    }
}

/// One source string within one translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub project: String,
    pub component: String,
    pub language: String,
    pub string_id: String,
}

impl UnitKey {
    pub fn new(
        project: impl Into<String>,
        component: impl Into<String>,
        language: impl Into<String>,
        string_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            component: component.into(),
            language: language.into(),
            string_id: string_id.into(),
        }
    }

    /// The component this unit belongs to
    pub fn component_key(&self) -> ComponentKey {
        ComponentKey::new(self.project.clone(), self.component.clone())
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project, self.component, self.language, self.string_id
        )
    }
}

/// Engine-wide unique suggestion identifier, allocated in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuggestionId(pub u64);

impl fmt::Display for SuggestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotePolarity {
    For,
    Against,
}

/// A single vote. At most one per (voter, suggestion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: UserId,
    pub polarity: VotePolarity,
    pub cast_at: DateTime<Utc>,
}

/// A proposed translation awaiting acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: SuggestionId,
    pub unit: UnitKey,
    pub author: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Votes in the order they were (last) cast
    pub votes: Vec<Vote>,
    /// Set when the unit was resolved while this suggestion was pending.
    /// Stale suggestions are never auto-accepted.
    pub stale: bool,
}

impl Suggestion {
    /// Number of distinct voters currently supporting the suggestion
    pub fn supporting_votes(&self) -> u32 {
        self.count(VotePolarity::For)
    }

    pub fn opposing_votes(&self) -> u32 {
        self.count(VotePolarity::Against)
    }

    fn count(&self, polarity: VotePolarity) -> u32 {
        self.votes.iter().filter(|v| v.polarity == polarity).count() as u32
    }

    pub fn vote_of(&self, voter: &str) -> Option<&Vote> {
        self.votes.iter().find(|v| v.voter == voter)
    }
}

/// How the current translation of a unit came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptedVia {
    AutoAccept,
    ManualAccept,
    DirectSave,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedTranslation {
    pub text: String,
    pub author: UserId,
    /// Suggestion this translation was promoted from, if any
    pub suggestion_id: Option<SuggestionId>,
    pub via: AcceptedVia,
    pub accepted_at: DateTime<Utc>,
}

/// Exclusive, time-bounded claim on a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub holder: UserId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Read-only view of a suggestion with its tallies, for listing.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestionView {
    pub id: SuggestionId,
    pub author: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub supporting_votes: u32,
    pub opposing_votes: u32,
    pub stale: bool,
    pub votes: Vec<Vote>,
}

impl From<&Suggestion> for SuggestionView {
    fn from(s: &Suggestion) -> Self {
        Self {
            id: s.id,
            author: s.author.clone(),
            text: s.text.clone(),
            created_at: s.created_at,
            supporting_votes: s.supporting_votes(),
            opposing_votes: s.opposing_votes(),
            stale: s.stale,
            votes: s.votes.clone(),
        }
    }
}

/// Full state of a unit at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSnapshot {
    pub unit: UnitKey,
    pub accepted: Option<AcceptedTranslation>,
    pub suggestions: Vec<SuggestionView>,
    pub lock: Option<Lock>,
}

/// Result of submitting a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitResult {
    pub id: SuggestionId,
    /// True when the submission itself pushed the suggestion over the threshold
    pub accepted: bool,
}

/// Result of casting a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteResult {
    pub suggestion_id: SuggestionId,
    pub supporting_votes: u32,
    pub opposing_votes: u32,
    /// Polarity of the voter's earlier vote when this cast overwrote it
    pub previous: Option<VotePolarity>,
    /// Suggestion promoted as a consequence of this vote, if any
    pub promoted: Option<SuggestionId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn suggestion_with(votes: Vec<(&str, VotePolarity)>) -> Suggestion {
        Suggestion {
            id: SuggestionId(1),
            unit: UnitKey::new("p", "c", "de", "greeting"),
            author: "alice".to_string(),
            text: "Hallo".to_string(),
            created_at: at(0),
            votes: votes
                .into_iter()
                .enumerate()
                .map(|(i, (voter, polarity))| Vote {
                    voter: voter.to_string(),
                    polarity,
                    cast_at: at(i as i64),
                })
                .collect(),
            stale: false,
        }
    }

    #[test]
    fn test_unit_key_display() {
        let unit = UnitKey::new("demo", "ui", "fr", "menu.file");
        assert_eq!(unit.to_string(), "demo/ui/fr/menu.file");
        assert_eq!(unit.component_key().to_string(), "demo/ui");
    }

    #[test]
    fn test_vote_tallies() {
        let s = suggestion_with(vec![
            ("alice", VotePolarity::For),
            ("bob", VotePolarity::Against),
            ("carol", VotePolarity::For),
        ]);
        assert_eq!(s.supporting_votes(), 2);
        assert_eq!(s.opposing_votes(), 1);
        assert_eq!(s.vote_of("bob").map(|v| v.polarity), Some(VotePolarity::Against));
        assert!(s.vote_of("dave").is_none());
    }

    #[test]
    fn test_lock_expiry_is_inclusive() {
        let lock = Lock {
            holder: "alice".to_string(),
            acquired_at: at(0),
            expires_at: at(60),
        };
        assert!(!lock.is_expired(at(59)));
        assert!(lock.is_expired(at(60)));
        assert!(lock.is_expired(at(61)));
    }

    #[test]
    fn test_polarity_serialization() {
        assert_eq!(serde_json::to_string(&VotePolarity::For).unwrap(), "\"for\"");
        let parsed: VotePolarity = serde_json::from_str("\"against\"").unwrap();
        assert_eq!(parsed, VotePolarity::Against);
    }

    #[test]
    fn test_suggestion_id_is_transparent() {
        assert_eq!(serde_json::to_string(&SuggestionId(42)).unwrap(), "42");
    }
}
