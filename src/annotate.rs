//! Reply annotation: keyword-triggered marker and inline button.
//!
//! Matching is a case-insensitive substring test against the whole
//! reply, so a keyword also fires in the middle of a word.  The reply
//! text itself is never modified.

use crate::comm::InlineButton;
use crate::config::Profile;

/// UI directives derived from one reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    /// Send the marker message before the reply.
    pub emit_marker: bool,
    /// Button to attach to the reply message.
    pub button: Option<InlineButton>,
}

/// Keyword sets, lowercased once at construction.
#[derive(Debug, Clone)]
pub struct Annotator {
    marker_keywords: Vec<String>,
    button_trigger: Option<String>,
    button: InlineButton,
}

impl Annotator {
    /// Build an annotator.  Empty keywords are dropped; an empty trigger
    /// disables the button.
    pub fn new<I, S>(marker_keywords: I, button_trigger: &str, button: InlineButton) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let marker_keywords = marker_keywords
            .into_iter()
            .map(|k| k.as_ref().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let trigger = button_trigger.to_lowercase();
        Self {
            marker_keywords,
            button_trigger: (!trigger.is_empty()).then_some(trigger),
            button,
        }
    }

    pub fn from_profile(profile: &Profile) -> Self {
        Self::new(
            &profile.marker.keywords,
            &profile.button.trigger,
            InlineButton {
                label: profile.button.label.clone(),
                callback: profile.button.callback.clone(),
            },
        )
    }

    pub fn annotate(&self, reply: &str) -> Annotation {
        let lowered = reply.to_lowercase();
        let emit_marker = self
            .marker_keywords
            .iter()
            .any(|k| lowered.contains(k.as_str()));
        let button = self
            .button_trigger
            .as_deref()
            .filter(|t| lowered.contains(t))
            .map(|_| self.button.clone());
        Annotation {
            emit_marker,
            button,
        }
    }
}
