use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rule deciding the order in which providers are tried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Ascending configured priority
    #[default]
    Priority,
    /// Priority order rotated by one position on every call
    #[serde(alias = "round_robin", alias = "roundrobin")]
    RoundRobin,
    /// Fresh shuffle on every call
    Random,
}

impl SelectionPolicy {
    /// Indices into a priority-sorted provider list, in attempt order.
    ///
    /// `cursor` is the persistent rotation index shared by every call on the
    /// same pool; only `RoundRobin` advances it.
    pub fn order(&self, len: usize, cursor: &AtomicUsize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();

        match self {
            SelectionPolicy::Priority => {}
            SelectionPolicy::RoundRobin => {
                if len > 0 {
                    let start = cursor.fetch_add(1, Ordering::Relaxed) % len;
                    indices.rotate_left(start);
                }
            }
            SelectionPolicy::Random => {
                indices.shuffle(&mut rand::thread_rng());
            }
        }

        indices
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::Priority => "priority",
            SelectionPolicy::RoundRobin => "round-robin",
            SelectionPolicy::Random => "random",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(SelectionPolicy::Priority),
            "round-robin" | "round_robin" | "roundrobin" => Ok(SelectionPolicy::RoundRobin),
            "random" => Ok(SelectionPolicy::Random),
            other => Err(format!("unknown selection policy: {}", other)),
        }
    }
}
