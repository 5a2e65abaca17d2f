use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ggs::Directive;

/// `C`-level entries never expire by GC; `T` is reserved for future
/// temporal/episodic tagging and is not written by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MegramLevel {
    M,
    K,
    C,
    T,
}

/// One observed `(space, entity, state)` datum. `space`/`entity` must be
/// `|`-free since the reverse tag index keys on `space|entity|id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Megram {
    pub id: Uuid,
    pub level: MegramLevel,
    pub created_at: DateTime<Utc>,
    pub space: String,
    pub entity: String,
    pub content: String,
    pub state: Directive,
    /// amplitude, [0,1]
    pub f: f64,
    /// valence, [-1,1]
    pub sigma: f64,
    /// decay rate, >=0. 0 means timeless.
    pub k: f64,
}

impl Megram {
    pub fn tag_key(space: &str, entity: &str) -> String {
        format!("{space}|{entity}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Exploit,
    Avoid,
    Caution,
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Potentials {
    pub attention: f64,
    pub decision: f64,
}

impl Potentials {
    /// `att<0.5 → Ignore`; else `dec>+0.2 Exploit`, `dec<-0.2 Avoid`,
    /// otherwise `Caution`.
    pub fn action(&self) -> Action {
        if self.attention < 0.5 {
            Action::Ignore
        } else if self.decision > 0.2 {
            Action::Exploit
        } else if self.decision < -0.2 {
            Action::Avoid
        } else {
            Action::Caution
        }
    }
}

/// One `QueryC` result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SopRecord {
    pub id: Uuid,
    pub content: String,
    pub sigma: f64,
}

/// A deterministic lowercase, non-alphanumeric-stripped, three-word
/// prefix of an intent, used as a memory space tag.
pub fn intent_slug(intent: &str) -> String {
    let words: Vec<String> = intent
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .take(3)
        .collect();
    words.join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn potentials_below_half_attention_is_ignore() {
        let p = Potentials {
            attention: 0.2,
            decision: 0.9,
        };
        assert_eq!(p.action(), Action::Ignore);
    }

    #[test]
    fn potentials_thresholds_match_spec() {
        assert_eq!(
            Potentials {
                attention: 0.9,
                decision: 0.3
            }
            .action(),
            Action::Exploit
        );
        assert_eq!(
            Potentials {
                attention: 0.9,
                decision: -0.3
            }
            .action(),
            Action::Avoid
        );
        assert_eq!(
            Potentials {
                attention: 0.9,
                decision: 0.0
            }
            .action(),
            Action::Caution
        );
    }

    #[test]
    fn intent_slug_is_deterministic_three_word_prefix() {
        assert_eq!(
            intent_slug("What day of the week is today?"),
            "what-day-of"
        );
    }
}
