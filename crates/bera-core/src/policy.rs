//! What to do when a deploy is requested for an application that is
//! already deploying.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPolicy {
    /// Refuse the second request with a conflict.
    #[default]
    Reject,
    /// Hold the second run until the first one finishes.
    Queue,
    /// Let both runs interleave their steps.
    Allow,
}

impl DeployPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployPolicy::Reject => "reject",
            DeployPolicy::Queue => "queue",
            DeployPolicy::Allow => "allow",
        }
    }
}

impl fmt::Display for DeployPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(DeployPolicy::Reject),
            "queue" => Ok(DeployPolicy::Queue),
            "allow" => Ok(DeployPolicy::Allow),
            other => Err(format!(
                "unknown deploy policy '{other}' (expected reject, queue or allow)"
            )),
        }
    }
}
