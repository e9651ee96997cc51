use std::path::Path;

use rand::Rng;
use serde::Deserialize;

use crate::Result;

/// One alternative of a [`Phrases`] entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phrase {
    pub text: String,
    /// Relative chance of being picked; 0 never is.
    pub weight: u32,
}

/// A reply text with optional alternatives, one of which is picked per reply.
///
/// Deserializes from a bare string, a list of strings, or a list of
/// `{"word": ..., "weight": ...}` objects (entries may be mixed).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "PhrasesRepr")]
pub struct Phrases(Vec<Phrase>);

#[derive(Deserialize)]
#[serde(untagged)]
enum PhrasesRepr {
    One(String),
    Many(Vec<PhraseRepr>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PhraseRepr {
    Plain(String),
    Weighted { word: String, weight: u32 },
}

impl From<PhrasesRepr> for Phrases {
    fn from(repr: PhrasesRepr) -> Self {
        match repr {
            PhrasesRepr::One(text) => Phrases::one(text),
            PhrasesRepr::Many(items) => Phrases(
                items
                    .into_iter()
                    .map(|p| match p {
                        PhraseRepr::Plain(text) => Phrase { text, weight: 1 },
                        PhraseRepr::Weighted { word, weight } => Phrase { text: word, weight },
                    })
                    .collect(),
            ),
        }
    }
}

impl Phrases {
    pub fn one(text: impl Into<String>) -> Self {
        Phrases(vec![Phrase {
            text: text.into(),
            weight: 1,
        }])
    }

    pub fn alternatives(&self) -> &[Phrase] {
        &self.0
    }

    /// Weighted random pick; empty when nothing has a positive weight.
    pub fn pick(&self) -> &str {
        self.pick_with(&mut rand::thread_rng())
    }

    pub fn pick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let total: u64 = self.0.iter().map(|p| u64::from(p.weight)).sum();
        if total == 0 {
            return "";
        }
        let mut roll = rng.gen_range(0..total);
        for p in &self.0 {
            let w = u64::from(p.weight);
            if roll < w {
                return &p.text;
            }
            roll -= w;
        }
        ""
    }
}

impl From<&str> for Phrases {
    fn from(text: &str) -> Self {
        Phrases::one(text)
    }
}

/// User-facing reply texts.
///
/// Placeholders: `{user}` (mention of the requester), `{name}` (command, topic,
/// target or version), `{text}` (free text such as a listing or an error).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Words {
    pub self_intro: Phrases,
    pub no_help_text: Phrases,
    pub undefined_command: Phrases,
    pub no_permission: Phrases,
    pub malformed_input: Phrases,
    pub invalid_user: Phrases,
    pub master_registered: Phrases,
    pub master_unregistered: Phrases,
    pub banned: Phrases,
    pub unbanned: Phrases,
    pub status_ok: Phrases,
    pub subscribed: Phrases,
    pub unsubscribed: Phrases,
    pub subscription_topics: Phrases,
    pub invalid_chat_id: Phrases,
    pub version_current: Phrases,
    pub version_unset: Phrases,
    pub version_set: Phrases,
    pub change_log: Phrases,
    pub framework_changes: Phrases,
    pub log_added: Phrases,
    pub framework_log_added: Phrases,
    pub log_broadcast: Phrases,
    // List formatting, not replies.
    pub topic_format: String,
    pub topic_separator: String,
    pub topic_and: String,
}

impl Default for Words {
    fn default() -> Self {
        Self {
            self_intro: "I am {name}. Commands:{text}".into(),
            no_help_text: "{user} there is no help text for {name}.".into(),
            undefined_command: "{user} unknown command: {name}. Try help.".into(),
            no_permission: "{user} you are not allowed to use {name}.".into(),
            malformed_input: "{user} could not read that command: {text}".into(),
            invalid_user: "{user} {name} is not a valid user.".into(),
            master_registered: "The user has been registered as master.".into(),
            master_unregistered: "The master has been unregistered.".into(),
            banned: "The user has been banned.".into(),
            unbanned: "The user has been unbanned.".into(),
            status_ok: "√".into(),
            subscribed: "Subscribed to {name}.".into(),
            unsubscribed: "Unsubscribed from {name}.".into(),
            subscription_topics: "Available topics: {text}.".into(),
            invalid_chat_id: "{name} is not a valid chat id.".into(),
            version_current: "Current version: {name}.".into(),
            version_unset: "No version has been set yet.".into(),
            version_set: "Version set to {name}.".into(),
            change_log: "Changes in {name}:{text}".into(),
            framework_changes: "Framework:".into(),
            log_added: "Change log entry added.".into(),
            framework_log_added: "Framework change log entry added.".into(),
            log_broadcast: "Change log sent to {text} chats.".into(),
            topic_format: "{}".to_string(),
            topic_separator: ", ".to_string(),
            topic_and: " and ".to_string(),
        }
    }
}

impl Words {
    /// Load overrides from a JSON file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let txt = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&txt)?)
    }
}

/// Fill `{user}`, `{name}` and `{text}` placeholders.
pub fn render(template: &str, user: &str, name: &str, text: &str) -> String {
    template
        .replace("{user}", user)
        .replace("{name}", name)
        .replace("{text}", text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn render_fills_placeholders() {
        let w = Words::default();
        assert_eq!(
            render(w.no_permission.pick(), "@bob", "ban", ""),
            "@bob you are not allowed to use ban."
        );
    }

    #[test]
    fn partial_overrides_keep_defaults() {
        let w: Words = serde_json::from_str(r#"{"banned": "Gone."}"#).unwrap();
        assert_eq!(w.banned, Phrases::one("Gone."));
        assert_eq!(w.unbanned, Words::default().unbanned);
    }

    #[test]
    fn entries_accept_lists_and_weights() {
        let w: Words = serde_json::from_str(
            r#"{
                "status_ok": ["ok", "fine"],
                "banned": [{"word": "Out.", "weight": 3}, "Bye.", {"word": "never", "weight": 0}]
            }"#,
        )
        .unwrap();

        assert_eq!(w.status_ok.alternatives().len(), 2);
        let weights: Vec<u32> = w.banned.alternatives().iter().map(|p| p.weight).collect();
        assert_eq!(weights, vec![3, 1, 0]);
    }

    #[test]
    fn picks_follow_weights_and_skip_zero() {
        let p: Phrases =
            serde_json::from_str(r#"[{"word": "a", "weight": 3}, "b", {"word": "z", "weight": 0}]"#)
                .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let (mut a, mut b) = (0, 0);
        for _ in 0..4000 {
            match p.pick_with(&mut rng) {
                "a" => a += 1,
                "b" => b += 1,
                other => panic!("unexpected pick {other:?}"),
            }
        }
        // Expected 3:1.
        assert!(a > 2 * b, "a={a} b={b}");
        assert!(b > 500, "a={a} b={b}");
    }

    #[test]
    fn empty_or_weightless_entries_pick_nothing() {
        assert_eq!(Phrases::default().pick(), "");
        let p: Phrases = serde_json::from_str(r#"[{"word": "z", "weight": 0}]"#).unwrap();
        assert_eq!(p.pick(), "");
        assert_eq!(Phrases::one("only").pick(), "only");
    }
}
