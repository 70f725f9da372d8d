use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A command a remote object accepts beyond listing.
///
/// Capabilities are advertised per object and checked before a
/// capability-gated command is put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Interruptible,
    Steppable,
    Resumable,
    Killable,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Self::Interruptible,
        Self::Steppable,
        Self::Resumable,
        Self::Killable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Interruptible => "interruptible",
            Self::Steppable => "steppable",
            Self::Resumable => "resumable",
            Self::Killable => "killable",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| TypeError::UnknownCapability(s.to_string()))
    }
}

/// The set of capabilities one object advertises.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Capability::name).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Granularity of a `Step` command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Run until a given location is reached.
    Advance,
    /// Run until the current frame returns.
    Finish,
    /// Step one instruction, entering calls.
    #[default]
    Into,
    /// Step one source line, entering calls.
    Line,
    /// Step one instruction, stepping over calls.
    Over,
    /// Step one source line, stepping over calls.
    OverLine,
    /// Return from the current frame without executing the rest of it.
    Return,
    /// Skip the current instruction without executing it.
    Skip,
    /// Run until a line greater than the current one is reached.
    Until,
    /// An engine-specific step.
    Extended,
}

impl StepKind {
    pub const ALL: [StepKind; 10] = [
        Self::Advance,
        Self::Finish,
        Self::Into,
        Self::Line,
        Self::Over,
        Self::OverLine,
        Self::Return,
        Self::Skip,
        Self::Until,
        Self::Extended,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Finish => "finish",
            Self::Into => "into",
            Self::Line => "line",
            Self::Over => "over",
            Self::OverLine => "over-line",
            Self::Return => "return",
            Self::Skip => "skip",
            Self::Until => "until",
            Self::Extended => "extended",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StepKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| TypeError::UnknownStepKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_membership() {
        let caps = CapabilitySet::new()
            .with(Capability::Interruptible)
            .with(Capability::Steppable);
        assert!(caps.supports(Capability::Steppable));
        assert!(!caps.supports(Capability::Killable));
        assert_eq!(caps.to_string(), "interruptible,steppable");
    }

    #[test]
    fn step_kind_names_parse_back() {
        for kind in StepKind::ALL {
            assert_eq!(kind.name().parse::<StepKind>().unwrap(), kind);
        }
        assert_eq!(
            "sideways".parse::<StepKind>().unwrap_err(),
            TypeError::UnknownStepKind("sideways".into())
        );
    }

    #[test]
    fn capability_parse() {
        assert_eq!("killable".parse::<Capability>().unwrap(), Capability::Killable);
        assert!("flying".parse::<Capability>().is_err());
    }
}
