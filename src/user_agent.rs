//! Read-only User-Agent pool for outgoing requests.
//!
//! The pool is built once per batch and shared by reference; selection uses the
//! thread-local RNG so no extra synchronization is needed.

use rand::seq::SliceRandom;

/// Desktop browser User-Agents rotated across requests.
const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) \
     Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/119.0.0.0 Safari/537.36",
];

/// A non-empty set of User-Agent strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self {
            agents: DEFAULT_USER_AGENTS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl UserAgentPool {
    /// Builds a pool from custom strings. Blank entries are dropped; returns
    /// `None` when nothing usable remains.
    #[must_use]
    pub fn new<I, S>(agents: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agents: Vec<String> = agents
            .into_iter()
            .map(Into::into)
            .map(|agent| agent.trim().to_string())
            .filter(|agent| !agent.is_empty())
            .collect();
        (!agents.is_empty()).then_some(Self { agents })
    }

    /// Picks a User-Agent at random.
    #[must_use]
    pub fn pick(&self) -> &str {
        self.agents
            .choose(&mut rand::thread_rng())
            .map_or(DEFAULT_USER_AGENTS[0], String::as_str)
    }

    /// Number of entries in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Iterates over the configured strings.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(String::as_str)
    }
}
