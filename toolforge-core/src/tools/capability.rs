//! Capability tokens and capability sets
//!
//! A capability names a permission for a side-effecting operation. Tools
//! declare the capabilities they need; a session grants a set of them; the
//! capability gate compares the two before anything runs.
//!
//! On the wire a requirement list is a list of snake_case tokens. The
//! sentinel token `none` stands for "no capabilities" so that an empty list
//! is never ambiguous.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Token used on the wire for an empty requirement set
pub const NO_CAPABILITIES: &str = "none";

/// Capabilities that tools may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read files inside the workspace
    FileRead,

    /// Create or modify files inside the workspace
    FileWrite,

    /// Spawn child processes
    ProcessSpawn,

    /// Make network requests
    Network,
}

impl Capability {
    /// Get all defined capabilities
    pub fn all() -> &'static [Capability] {
        &[
            Capability::FileRead,
            Capability::FileWrite,
            Capability::ProcessSpawn,
            Capability::Network,
        ]
    }

    /// Get the wire token for this capability
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::FileRead => "file_read",
            Capability::FileWrite => "file_write",
            Capability::ProcessSpawn => "process_spawn",
            Capability::Network => "network",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_read" => Ok(Capability::FileRead),
            "file_write" => Ok(Capability::FileWrite),
            "process_spawn" => Ok(Capability::ProcessSpawn),
            "network" => Ok(Capability::Network),
            other => Err(UnknownCapability(other.to_string())),
        }
    }
}

/// A capability token that is not part of the closed vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability token '{0}'")]
pub struct UnknownCapability(pub String);

/// Why a token list could not be turned into a [`CapabilitySet`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityTokenError {
    /// The list was empty (use `none` explicitly)
    #[error("capability list is empty; use [\"none\"] to require nothing")]
    Empty,

    /// A token is not known
    #[error(transparent)]
    Unknown(#[from] UnknownCapability),

    /// `none` was combined with real capabilities
    #[error("'none' cannot be combined with other capabilities")]
    NoneMixed,
}

/// An ordered set of capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Create an empty capability set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a capability set with all capabilities
    pub fn all() -> Self {
        Self {
            capabilities: Capability::all().iter().copied().collect(),
        }
    }

    /// Create a capability set from an iterator of capabilities
    pub fn from_capabilities(iter: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }

    /// Parse a wire token list (`["file_read", "file_write"]` or `["none"]`)
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self, CapabilityTokenError> {
        if tokens.is_empty() {
            return Err(CapabilityTokenError::Empty);
        }

        let mut set = CapabilitySet::new();
        let mut saw_none = false;
        for token in tokens {
            let token = token.as_ref().trim();
            if token == NO_CAPABILITIES {
                saw_none = true;
            } else {
                set.add(token.parse()?);
            }
        }

        if saw_none && !set.is_empty() {
            return Err(CapabilityTokenError::NoneMixed);
        }
        Ok(set)
    }

    /// Render as wire tokens; an empty set renders as `["none"]`
    pub fn to_tokens(&self) -> Vec<String> {
        if self.capabilities.is_empty() {
            return vec![NO_CAPABILITIES.to_string()];
        }
        self.capabilities.iter().map(|c| c.to_string()).collect()
    }

    /// Add a capability
    pub fn add(&mut self, cap: Capability) -> &mut Self {
        self.capabilities.insert(cap);
        self
    }

    /// Check if capability is present
    pub fn contains(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Check if all capabilities in `required` are present
    pub fn contains_all(&self, required: &CapabilitySet) -> bool {
        required.capabilities.is_subset(&self.capabilities)
    }

    /// Get missing capabilities compared to required set
    pub fn missing(&self, required: &CapabilitySet) -> CapabilitySet {
        CapabilitySet {
            capabilities: required
                .capabilities
                .difference(&self.capabilities)
                .copied()
                .collect(),
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Number of capabilities
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Get iterator over capabilities
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.to_tokens().join(", "))
    }
}
