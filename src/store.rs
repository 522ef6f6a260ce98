//! Suggestion store for a single translatable unit.
//!
//! Holds the unit's pending suggestions and the votes cast on them. The
//! store itself is not synchronized; the engine owns one per unit behind
//! that unit's critical section.

use crate::error::ReviewError;
use crate::model::{Suggestion, SuggestionId, Vote, VotePolarity};

#[derive(Debug, Default, Clone)]
pub struct SuggestionStore {
    suggestions: Vec<Suggestion>,
}

impl SuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a suggestion. Fails if a suggestion with identical text is already pending.
    pub fn insert(&mut self, suggestion: Suggestion) -> Result<(), ReviewError> {
        if self.suggestions.iter().any(|s| s.text == suggestion.text) {
            return Err(ReviewError::DuplicateSuggestion {
                unit: suggestion.unit,
            });
        }
        self.suggestions.push(suggestion);
        Ok(())
    }

    pub fn get(&self, id: SuggestionId) -> Option<&Suggestion> {
        self.suggestions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: SuggestionId) -> Result<&mut Suggestion, ReviewError> {
        self.suggestions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ReviewError::not_found("suggestion", id))
    }

    /// Remove a suggestion together with all of its votes
    pub fn remove(&mut self, id: SuggestionId) -> Option<Suggestion> {
        let index = self.suggestions.iter().position(|s| s.id == id)?;
        Some(self.suggestions.remove(index))
    }

    /// Record a first vote from `vote.voter`. Fails with `DuplicateVote` if
    /// the voter already has a vote on this suggestion.
    pub fn insert_vote(&mut self, id: SuggestionId, vote: Vote) -> Result<(), ReviewError> {
        let suggestion = self.get_mut(id)?;
        if suggestion.vote_of(&vote.voter).is_some() {
            return Err(ReviewError::DuplicateVote {
                voter: vote.voter,
                suggestion: id,
            });
        }
        suggestion.votes.push(vote);
        Ok(())
    }

    /// Overwrite the voter's existing vote, returning its previous polarity.
    ///
    /// The replaced vote moves to the end of the vote list with its new
    /// timestamp, so votes stay ordered by the time they were last cast.
    pub fn replace_vote(
        &mut self,
        id: SuggestionId,
        vote: Vote,
    ) -> Result<Option<VotePolarity>, ReviewError> {
        let suggestion = self.get_mut(id)?;
        let previous = suggestion
            .votes
            .iter()
            .position(|v| v.voter == vote.voter)
            .map(|index| suggestion.votes.remove(index).polarity);
        suggestion.votes.push(vote);
        Ok(previous)
    }

    /// Mark every pending suggestion stale, returning how many changed
    pub fn mark_all_stale(&mut self) -> usize {
        let mut changed = 0;
        for suggestion in self.suggestions.iter_mut().filter(|s| !s.stale) {
            suggestion.stale = true;
            changed += 1;
        }
        changed
    }

    /// Pending suggestions ordered by creation time, oldest first
    pub fn list(&self) -> Vec<&Suggestion> {
        let mut list: Vec<&Suggestion> = self.suggestions.iter().collect();
        list.sort_by_key(|s| (s.created_at, s.id));
        list
    }

    pub fn len(&self) -> usize {
        self.suggestions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }
}
