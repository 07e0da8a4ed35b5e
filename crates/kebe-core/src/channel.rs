//! Channel references: `risk`, `track`, `track/risk` and `track/risk/branch`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Track used when a channel names only a risk.
pub const DEFAULT_TRACK: &str = "latest";

/// Risk level of a channel. Every track carries all four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Stable,
    Candidate,
    Beta,
    Edge,
}

impl Risk {
    /// The fixed set created for every new track, in display order.
    pub const ALL: [Risk; 4] = [Risk::Stable, Risk::Candidate, Risk::Beta, Risk::Edge];

    pub const fn as_str(self) -> &'static str {
        match self {
            Risk::Stable => "stable",
            Risk::Candidate => "candidate",
            Risk::Beta => "beta",
            Risk::Edge => "edge",
        }
    }

    pub fn from_name(name: &str) -> Option<Risk> {
        Risk::ALL.into_iter().find(|r| r.as_str() == name)
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub track: String,
    pub risk: Risk,
    pub branch: Option<String>,
}

impl ChannelRef {
    pub fn new(track: impl Into<String>, risk: Risk) -> Self {
        Self {
            track: track.into(),
            risk,
            branch: None,
        }
    }

    /// Parse a channel that may name a branch.
    pub fn parse_with_branch(s: &str) -> Result<Self, ChannelError> {
        if s.is_empty() {
            return Err(ChannelError::Empty);
        }

        let segments: Vec<&str> = s.split('/').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(ChannelError::EmptySegment(s.to_string()));
        }

        let risk_at = |name: &str| {
            Risk::from_name(name).ok_or_else(|| ChannelError::UnknownRisk {
                channel: s.to_string(),
                risk: name.to_string(),
            })
        };

        match segments.as_slice() {
            [only] => Ok(match Risk::from_name(only) {
                Some(risk) => Self::new(DEFAULT_TRACK, risk),
                None => Self::new(*only, Risk::Stable),
            }),
            [track, risk] => Ok(Self::new(*track, risk_at(*risk)?)),
            [track, risk, branch] => Ok(Self {
                track: track.to_string(),
                risk: risk_at(*risk)?,
                branch: Some(branch.to_string()),
            }),
            _ => Err(ChannelError::TooManySegments(s.to_string())),
        }
    }

    /// Parse a channel for resolution or release. Branches are rejected.
    ///
    /// Any three non-empty segments are a branch, whatever the middle
    /// segment names.
    pub fn parse(s: &str) -> Result<Self, ChannelError> {
        let segments: Vec<&str> = s.split('/').collect();
        if segments.len() == 3 && segments.iter().all(|seg| !seg.is_empty()) {
            return Err(ChannelError::BranchesUnsupported(s.to_string()));
        }
        Self::parse_with_branch(s)
    }

    /// `track/risk`, the key used in channel maps.
    pub fn track_risk(&self) -> String {
        format!("{}/{}", self.track, self.risk)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.track, self.risk)?;
        if let Some(branch) = &self.branch {
            write!(f, "/{}", branch)?;
        }
        Ok(())
    }
}

impl FromStr for ChannelRef {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse a channel for resolution or release.
pub fn parse_channel(s: &str) -> Result<ChannelRef, ChannelError> {
    ChannelRef::parse(s)
}

/// Split the comma-separated channel list sent with uploads.
pub fn split_channel_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}
