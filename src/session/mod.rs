//! Client-side prompt editing state.
//!
//! [`PromptSession`] is the text field, its single undo slot and the
//! enhancement phase, with every transition the UI can trigger. It does no
//! I/O; [`crate::client::EnhanceClient`] drives it through an enhancement.

use thiserror::Error;

use crate::preset::{BASE_PRESET, CUSTOM_PRESET};
use crate::relay::EnhanceRequest;

/// Quality-tag prefix toggled by the snippet button.
pub const SCORE_SNIPPET: &str =
    "score_9, score_8_up, score_7_up, score_6_up, score_5_up, score_4_up, ";

/// Shown in place of the text when an enhancement fails.
pub const ENHANCE_FAILED_MESSAGE: &str = "Sorry, I encountered an error.";

/// Shown when the reveal animation itself breaks.
pub const RENDER_FAILED_MESSAGE: &str = "Something went wrong";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Enhancing,
    Error,
}

/// The one value an undo can bring back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UndoSlot {
    #[default]
    Empty,
    /// Text displaced by an enhancement.
    Previous(String),
    /// Text displaced by a clear.
    Cleared(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("an enhancement is already in progress")]
    Busy,

    #[error("nothing to enhance: the prompt is blank")]
    EmptyPrompt,
}

/// State of the prompt editor.
///
/// # Examples
///
/// ```
/// use prompt_enhancer::session::{Phase, PromptSession};
///
/// let mut session = PromptSession::new();
/// session.set_text("a cat");
/// let request = session.begin_enhance().unwrap();
/// assert_eq!(request.text, "a cat");
/// assert_eq!(session.phase(), Phase::Enhancing);
///
/// session.complete("A cat sitting.".into());
/// assert!(session.undo());
/// assert_eq!(session.text(), "a cat");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSession {
    text: String,
    undo: UndoSlot,
    phase: Phase,
    preset: String,
    custom_instruction: Option<String>,
}

impl Default for PromptSession {
    fn default() -> Self {
        Self {
            text: String::new(),
            undo: UndoSlot::Empty,
            phase: Phase::Idle,
            preset: BASE_PRESET.to_owned(),
            custom_instruction: None,
        }
    }
}

impl PromptSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn undo_slot(&self) -> &UndoSlot {
        &self.undo
    }

    pub fn preset(&self) -> &str {
        &self.preset
    }

    pub fn custom_instruction(&self) -> Option<&str> {
        self.custom_instruction.as_deref()
    }

    pub fn is_enhancing(&self) -> bool {
        self.phase == Phase::Enhancing
    }

    /// Whether `snippet` currently appears in the text.
    pub fn has_snippet(&self, snippet: &str) -> bool {
        self.text.contains(snippet)
    }

    /// Replaces the text with what the user typed.
    ///
    /// Ignored while enhancing, since the field is being streamed into.
    pub fn set_text(&mut self, text: impl Into<String>) {
        if self.is_enhancing() {
            return;
        }
        self.text = text.into();
        self.phase = Phase::Idle;
    }

    pub fn select_preset(&mut self, preset: impl Into<String>) {
        self.preset = preset.into();
    }

    pub fn set_custom_instruction(&mut self, instruction: impl Into<String>) {
        self.custom_instruction = Some(instruction.into());
    }

    /// Prepends `snippet`, or removes its first occurrence if already present.
    pub fn toggle_snippet(&mut self, snippet: &str) {
        if self.is_enhancing() || snippet.is_empty() {
            return;
        }
        match self.text.find(snippet) {
            Some(start) => self.text.replace_range(start..start + snippet.len(), ""),
            None => self.text.insert_str(0, snippet),
        }
    }

    /// Empties the field, keeping the text for [`undo_clear`](Self::undo_clear).
    ///
    /// Clearing an already empty field changes nothing, so it cannot
    /// overwrite a pending undo.
    pub fn clear(&mut self) {
        if self.is_enhancing() || self.text.is_empty() {
            return;
        }
        self.undo = UndoSlot::Cleared(std::mem::take(&mut self.text));
        self.phase = Phase::Idle;
    }

    /// Restores text removed by [`clear`](Self::clear). Returns whether it did.
    pub fn undo_clear(&mut self) -> bool {
        self.restore(|slot| matches!(slot, UndoSlot::Cleared(_)))
    }

    /// Restores text displaced by an enhancement. Returns whether it did.
    pub fn undo(&mut self) -> bool {
        self.restore(|slot| matches!(slot, UndoSlot::Previous(_)))
    }

    /// Restores whatever the undo slot holds.
    pub fn undo_last(&mut self) -> bool {
        self.restore(|_| true)
    }

    fn restore(&mut self, wanted: impl Fn(&UndoSlot) -> bool) -> bool {
        if self.is_enhancing() || !wanted(&self.undo) {
            return false;
        }
        match std::mem::take(&mut self.undo) {
            UndoSlot::Previous(text) | UndoSlot::Cleared(text) => {
                self.text = text;
                self.phase = Phase::Idle;
                true
            }
            UndoSlot::Empty => false,
        }
    }

    /// Starts an enhancement of the current text.
    ///
    /// The text moves into the undo slot and the field is emptied to
    /// receive the streamed result.
    pub fn begin_enhance(&mut self) -> Result<EnhanceRequest, SessionError> {
        if self.is_enhancing() {
            return Err(SessionError::Busy);
        }
        if self.text.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let mut request = EnhanceRequest::new(self.text.clone()).with_preset(self.preset.clone());
        if self.preset == CUSTOM_PRESET {
            request.custom_instruction = self.custom_instruction.clone();
        }

        self.undo = UndoSlot::Previous(std::mem::take(&mut self.text));
        self.phase = Phase::Enhancing;
        Ok(request)
    }

    /// Shows the text received so far.
    pub fn show_partial(&mut self, text: &str) {
        if self.is_enhancing() {
            text.clone_into(&mut self.text);
        }
    }

    /// Ends an enhancement with its full result.
    pub fn complete(&mut self, full: String) {
        if self.is_enhancing() {
            self.text = full;
            self.phase = Phase::Idle;
        }
    }

    /// Ends an enhancement that failed. Partial text is discarded.
    pub fn fail(&mut self) {
        self.end_with_error(ENHANCE_FAILED_MESSAGE);
    }

    /// Ends an enhancement whose display could not be rendered.
    pub fn render_failed(&mut self) {
        self.end_with_error(RENDER_FAILED_MESSAGE);
    }

    fn end_with_error(&mut self, message: &str) {
        if self.is_enhancing() {
            message.clone_into(&mut self.text);
            self.phase = Phase::Error;
        }
    }

    /// Abandons an enhancement, putting the original text back.
    pub fn cancel_enhance(&mut self) {
        if !self.is_enhancing() {
            return;
        }
        self.phase = Phase::Idle;
        if let UndoSlot::Previous(text) = std::mem::take(&mut self.undo) {
            self.text = text;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(text: &str) -> PromptSession {
        let mut session = PromptSession::new();
        session.set_text(text);
        session
    }

    #[test]
    fn clear_then_undo_clear_restores() {
        let mut s = session("a cat");
        s.clear();
        assert_eq!(s.text(), "");
        assert!(s.undo_clear());
        assert_eq!(s.text(), "a cat");
        assert_eq!(s.undo_slot(), &UndoSlot::Empty);
    }

    #[test]
    fn enhance_then_undo_restores_original() {
        let mut s = session("a cat");
        s.begin_enhance().unwrap();
        s.show_partial("A cat");
        s.complete("A cat sitting.".into());
        assert_eq!(s.text(), "A cat sitting.");
        assert!(s.undo());
        assert_eq!(s.text(), "a cat");
        assert!(!s.undo());
    }

    #[test]
    fn undo_kinds_do_not_consume_each_other() {
        let mut s = session("a cat");
        s.clear();
        assert!(!s.undo());
        assert!(s.undo_clear());

        s.begin_enhance().unwrap();
        s.complete("A cat.".into());
        assert!(!s.undo_clear());
        assert!(s.undo());
    }

    #[test]
    fn slot_holds_only_the_latest_displaced_value() {
        let mut s = session("a cat");
        s.begin_enhance().unwrap();
        s.complete("A cat.".into());
        s.clear();
        assert_eq!(s.undo_slot(), &UndoSlot::Cleared("A cat.".into()));
        assert!(s.undo_last());
        assert_eq!(s.text(), "A cat.");
        assert!(!s.undo_last());
    }

    #[test]
    fn clearing_empty_text_keeps_pending_undo() {
        let mut s = session("a cat");
        s.begin_enhance().unwrap();
        s.complete(String::new());
        s.clear();
        assert!(s.undo());
        assert_eq!(s.text(), "a cat");
    }

    #[test]
    fn second_trigger_is_busy() {
        let mut s = session("a cat");
        s.begin_enhance().unwrap();
        assert_eq!(s.begin_enhance(), Err(SessionError::Busy));
    }

    #[test]
    fn blank_prompt_is_rejected_without_state_change() {
        let mut s = session("   ");
        assert_eq!(s.begin_enhance(), Err(SessionError::EmptyPrompt));
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(s.text(), "   ");
    }

    #[test]
    fn failure_shows_fixed_message_and_keeps_original() {
        let mut s = session("a story");
        s.begin_enhance().unwrap();
        s.show_partial("Once upon");
        s.fail();
        assert_eq!(s.text(), ENHANCE_FAILED_MESSAGE);
        assert_eq!(s.phase(), Phase::Error);
        assert!(s.undo());
        assert_eq!(s.text(), "a story");
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn render_failure_message() {
        let mut s = session("a cat");
        s.begin_enhance().unwrap();
        s.render_failed();
        assert_eq!(s.text(), RENDER_FAILED_MESSAGE);
    }

    #[test]
    fn cancel_restores_text() {
        let mut s = session("a cat");
        s.begin_enhance().unwrap();
        s.show_partial("A");
        s.cancel_enhance();
        assert_eq!(s.text(), "a cat");
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(s.undo_slot(), &UndoSlot::Empty);
    }

    #[test]
    fn custom_instruction_only_sent_with_custom_preset() {
        let mut s = session("a cat");
        s.set_custom_instruction("Be terse.");
        let request = s.begin_enhance().unwrap();
        assert_eq!(request.custom_instruction, None);
        s.cancel_enhance();

        s.select_preset("Custom");
        let request = s.begin_enhance().unwrap();
        assert_eq!(request.preset_selection, "Custom");
        assert_eq!(request.custom_instruction.as_deref(), Some("Be terse."));
    }

    #[test]
    fn snippet_toggles() {
        let mut s = session("a cat");
        s.toggle_snippet(SCORE_SNIPPET);
        assert!(s.text().starts_with("score_9, "));
        assert!(s.has_snippet(SCORE_SNIPPET));
        s.toggle_snippet(SCORE_SNIPPET);
        assert_eq!(s.text(), "a cat");
    }

    #[test]
    fn edits_are_ignored_while_enhancing() {
        let mut s = session("a cat");
        s.begin_enhance().unwrap();
        s.set_text("typed");
        s.clear();
        assert!(!s.undo_last());
        assert_eq!(s.text(), "");
    }
}
