//! Short-term conversation context
//!
//! Scores retrieval candidates against the tail of the current session:
//! recency with a one-hour half-life, role weighting, and stop-filtered
//! Jaccard overlap between the query and each message. Candidates are
//! memories attached to the session or referenced (by id or title tokens)
//! in the message window.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::memory::Message;

/// Words ignored by keyword overlap
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "i", "we", "you", "he", "she", "it", "they", "is", "are", "was", "were",
    "be", "to", "of", "in", "on", "for", "and", "or", "that", "this", "with", "at", "by",
    "from", "as", "do", "did", "what", "about", "say", "said",
];

/// A candidate memory visible to conversation scoring
#[derive(Debug, Clone)]
pub struct ConversationCandidate {
    pub id: String,
    pub title: String,
}

/// Conversation scorer with a configurable half-life and window
#[derive(Debug, Clone)]
pub struct ConversationContext {
    half_life_minutes: f64,
    window: usize,
}

impl ConversationContext {
    pub fn new(half_life_minutes: f64, window: usize) -> Self {
        Self {
            half_life_minutes: half_life_minutes.max(1e-6),
            window,
        }
    }

    /// How many trailing messages participate
    pub fn window(&self) -> usize {
        self.window
    }

    /// Recency factor of a message at `now`: exp(−ln2 · age / half-life)
    fn recency(&self, message: &Message, now: DateTime<Utc>) -> f64 {
        let age_minutes =
            ((now - message.timestamp).num_milliseconds() as f64 / 60_000.0).max(0.0);
        (-(std::f64::consts::LN_2) * age_minutes / self.half_life_minutes).exp()
    }

    /// Raw conversation scores per candidate id. Candidates referenced by no
    /// message in the window score 0 and are omitted. Scores are raw sums;
    /// the orchestrator min-max normalizes across each source's result set.
    pub fn score(
        &self,
        query: &str,
        messages: &[Message],
        candidates: &[ConversationCandidate],
        now: DateTime<Utc>,
    ) -> HashMap<String, f64> {
        // Pure deictic queries ("what did we say about it") stop-filter to
        // nothing; fall back to unfiltered tokens so overlap stays defined.
        let mut query_tokens = tokens(query);
        let stop_filtered = !query_tokens.is_empty();
        if !stop_filtered {
            query_tokens = raw_tokens(query);
        }
        let window: &[Message] = if messages.len() > self.window {
            &messages[messages.len() - self.window..]
        } else {
            messages
        };

        // Per-message contribution, computed once
        let contributions: Vec<(f64, HashSet<String>, &Message)> = window
            .iter()
            .map(|message| {
                let message_tokens = if stop_filtered {
                    tokens(&message.text)
                } else {
                    raw_tokens(&message.text)
                };
                let overlap = jaccard(&query_tokens, &message_tokens);
                let contribution = self.recency(message, now) * message.role.weight() * overlap;
                (contribution, message_tokens, message)
            })
            .collect();

        let mut scores = HashMap::new();
        for candidate in candidates {
            let title_tokens = title_tokens(&candidate.title);
            let mut total = 0.0;
            let mut referenced = false;
            for (contribution, message_tokens, message) in &contributions {
                let id_mentioned = message.text.contains(&candidate.id);
                let title_overlap = !title_tokens.is_disjoint(message_tokens);
                if id_mentioned || title_overlap {
                    referenced = true;
                    total += contribution;
                }
            }
            if referenced && total > 0.0 {
                scores.insert(candidate.id.clone(), total);
            }
        }
        scores
    }
}

/// Lowercased, stop-filtered word set
pub fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Lowercased word set without stop filtering
fn raw_tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity over two word sets
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    if intersection == 0 {
        return 0.0;
    }
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Tokens of an SAQ title: split on separators and camel-case boundaries
fn title_tokens(title: &str) -> HashSet<String> {
    let mut spaced = String::with_capacity(title.len() + 8);
    let mut prev_lower = false;
    for c in title.chars() {
        if c.is_uppercase() && prev_lower {
            spaced.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        spaced.push(c);
    }
    tokens(&spaced)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;

    fn message(role: Role, text: &str, minutes_ago: i64, now: DateTime<Utc>) -> Message {
        Message {
            session_id: "s1".to_string(),
            role,
            text: text.to_string(),
            timestamp: now - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_jaccard() {
        let a = tokens("dark mode editors");
        let b = tokens("dark mode settings");
        let c = tokens("sales numbers");
        assert!(jaccard(&a, &b) > 0.0);
        assert_eq!(jaccard(&a, &c), 0.0);
        assert_eq!(jaccard(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn test_tokens_drop_stopwords() {
        let t = tokens("What did we say about Project Omega");
        assert!(!t.contains("what"));
        assert!(!t.contains("about"));
        assert!(t.contains("project"));
        assert!(t.contains("omega"));
    }

    #[test]
    fn test_title_tokens_split_camel_case() {
        let t = title_tokens("Self-Pref-DarkMode");
        assert!(t.contains("dark"));
        assert!(t.contains("mode"));
        assert!(t.contains("pref"));
    }

    #[test]
    fn test_recency_decays_with_half_life() {
        let ctx = ConversationContext::new(60.0, 20);
        let now = Utc::now();
        let fresh = message(Role::User, "x", 0, now);
        let hour_old = message(Role::User, "x", 60, now);
        let fresh_recency = ctx.recency(&fresh, now);
        let old_recency = ctx.recency(&hour_old, now);
        assert!((fresh_recency - 1.0).abs() < 1e-6);
        assert!((old_recency - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_score_requires_reference() {
        let ctx = ConversationContext::new(60.0, 20);
        let now = Utc::now();
        let messages = vec![message(Role::User, "We discussed Project Omega", 1, now)];

        let candidates = vec![
            ConversationCandidate {
                id: "m-omega".to_string(),
                title: "ProjectOmega-Fact-Launch".to_string(),
            },
            ConversationCandidate {
                id: "m-other".to_string(),
                title: "Kernel-Fact-Scheduling".to_string(),
            },
        ];

        let scores = ctx.score("what about project omega", &messages, &candidates, now);
        assert!(scores.contains_key("m-omega"));
        assert!(!scores.contains_key("m-other"));
    }

    #[test]
    fn test_user_messages_outweigh_system() {
        let ctx = ConversationContext::new(60.0, 20);
        let now = Utc::now();

        let user_msgs = vec![message(Role::User, "omega launch plan", 1, now)];
        let system_msgs = vec![message(Role::System, "omega launch plan", 1, now)];
        let candidates = vec![ConversationCandidate {
            id: "m1".to_string(),
            title: "Omega-Goal-Launch".to_string(),
        }];

        let user_score = ctx.score("omega launch", &user_msgs, &candidates, now)["m1"];
        let system_score = ctx.score("omega launch", &system_msgs, &candidates, now)["m1"];
        assert!(user_score > system_score);
    }

    #[test]
    fn test_pure_deictic_query_still_scores() {
        let ctx = ConversationContext::new(60.0, 20);
        let now = Utc::now();
        let messages = vec![message(Role::User, "We discussed Project Omega", 1, now)];
        let candidates = vec![ConversationCandidate {
            id: "m-omega".to_string(),
            title: "ProjectOmega-Fact-Notes".to_string(),
        }];

        // Every query word is a stopword; the unfiltered fallback applies
        let scores = ctx.score("what did we say about it", &messages, &candidates, now);
        assert!(scores.get("m-omega").copied().unwrap_or(0.0) > 0.0);
    }

    #[test]
    fn test_window_truncates_old_messages() {
        let ctx = ConversationContext::new(60.0, 2);
        let now = Utc::now();
        let messages = vec![
            message(Role::User, "omega mentioned here", 30, now),
            message(Role::User, "unrelated chatter", 2, now),
            message(Role::User, "more unrelated words", 1, now),
        ];
        let candidates = vec![ConversationCandidate {
            id: "m1".to_string(),
            title: "Omega-Fact-X".to_string(),
        }];
        // The only referencing message fell outside the 2-message window
        let scores = ctx.score("omega", &messages, &candidates, now);
        assert!(scores.is_empty());
    }
}
