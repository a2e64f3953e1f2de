//! Per-turn transcript accumulation.
//!
//! Partial transcript spans stream in while a turn is in flight; nothing
//! reaches the chat history until the service marks the turn complete.
//! An interrupt throws the partial turn away entirely.

use crate::channel::Speaker;

/// Accumulated transcript text for the turn currently in flight.
#[derive(Debug, Default)]
pub struct TurnTranscript {
    user: String,
    model: String,
}

impl TurnTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one partial span to the matching side.
    pub fn append(&mut self, speaker: Speaker, text: &str) {
        match speaker {
            Speaker::User => self.user.push_str(text),
            Speaker::Model => self.model.push_str(text),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }

    /// Take the accumulated turn, leaving the accumulator empty.
    ///
    /// Returns `(user, model)`; either side is `None` when the service
    /// transcribed nothing for it.
    pub fn take(&mut self) -> (Option<String>, Option<String>) {
        let user = std::mem::take(&mut self.user);
        let model = std::mem::take(&mut self.model);
        (
            (!user.is_empty()).then_some(user),
            (!model.is_empty()).then_some(model),
        )
    }

    /// Discard the partial turn without committing anything.
    pub fn clear(&mut self) {
        self.user.clear();
        self.model.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_accumulate_per_speaker() {
        let mut turn = TurnTranscript::new();
        turn.append(Speaker::User, "what is ");
        turn.append(Speaker::Model, "I think ");
        turn.append(Speaker::User, "the weather");
        turn.append(Speaker::Model, "it is sunny");

        let (user, model) = turn.take();
        assert_eq!(user.as_deref(), Some("what is the weather"));
        assert_eq!(model.as_deref(), Some("I think it is sunny"));
    }

    #[test]
    fn take_resets_the_accumulator() {
        let mut turn = TurnTranscript::new();
        turn.append(Speaker::User, "hello");
        let _ = turn.take();

        assert!(turn.is_empty());
        let (user, model) = turn.take();
        assert!(user.is_none());
        assert!(model.is_none());
    }

    #[test]
    fn one_sided_turn_yields_none_for_the_silent_side() {
        let mut turn = TurnTranscript::new();
        turn.append(Speaker::Model, "unprompted remark");

        let (user, model) = turn.take();
        assert!(user.is_none());
        assert_eq!(model.as_deref(), Some("unprompted remark"));
    }

    #[test]
    fn clear_discards_partial_turn() {
        let mut turn = TurnTranscript::new();
        turn.append(Speaker::User, "never mind");
        turn.clear();

        assert!(turn.is_empty());
        let (user, model) = turn.take();
        assert!(user.is_none() && model.is_none());
    }
}
