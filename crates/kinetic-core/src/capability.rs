//! Detector capability composition.
//!
//! A mode is what the user asks for ("swipe control", "posture watch");
//! a capability is a detector category the engine must load. Modes
//! overlap in the capabilities they imply, so composition dedupes into a
//! set that is derived once per engine start and frozen for the life of
//! that process.

use std::collections::BTreeSet;
use std::fmt;

/// A selectable tracking mode, as requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Hand-swipe tab navigation.
    Swipe,
    /// Slouch/upright posture watching.
    Posture,
    /// Wink detection.
    Wink,
    /// Lean-back repository push.
    Push,
    /// Fist-driven copy/paste.
    CopyPaste,
    /// Hands, posture, and face together.
    Unified,
}

impl Mode {
    /// Parse a mode identifier. Unknown identifiers yield `None`; callers
    /// skip them rather than fail.
    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "swipe" | "hands" => Some(Mode::Swipe),
            "posture" => Some(Mode::Posture),
            "wink" | "face" => Some(Mode::Wink),
            "push" => Some(Mode::Push),
            "copy-paste" | "copy_paste" => Some(Mode::CopyPaste),
            "unified" | "all" => Some(Mode::Unified),
            _ => None,
        }
    }

    /// Canonical identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Swipe => "swipe",
            Mode::Posture => "posture",
            Mode::Wink => "wink",
            Mode::Push => "push",
            Mode::CopyPaste => "copy-paste",
            Mode::Unified => "unified",
        }
    }

    /// Detector categories this mode needs.
    fn capabilities(self) -> &'static [Capability] {
        match self {
            Mode::Swipe => &[Capability::Hands],
            Mode::Posture => &[Capability::Posture],
            Mode::Wink => &[Capability::Face],
            Mode::Push => &[Capability::Push],
            Mode::CopyPaste => &[Capability::Hands, Capability::CopyPaste],
            Mode::Unified => &[Capability::Hands, Capability::Posture, Capability::Face],
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enabled detector category in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    Hands,
    Face,
    Posture,
    Push,
    CopyPaste,
}

impl Capability {
    /// The engine CLI flag enabling this detector.
    pub fn flag(self) -> &'static str {
        match self {
            Capability::Hands => "--hands",
            Capability::Face => "--face",
            Capability::Posture => "--posture",
            Capability::Push => "--push",
            Capability::CopyPaste => "--copy-paste",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Hands => "hands",
            Capability::Face => "face",
            Capability::Posture => "posture",
            Capability::Push => "push",
            Capability::CopyPaste => "copy-paste",
        };
        f.write_str(name)
    }
}

/// The immutable detector set an engine process is launched with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: BTreeSet<Capability>,
}

impl CapabilitySet {
    pub fn contains(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.caps.iter().copied()
    }

    /// Engine launch flags, in a stable order.
    pub fn launch_flags(&self) -> Vec<String> {
        self.caps.iter().map(|c| c.flag().to_string()).collect()
    }
}

/// Compose the capability set implied by a mode selection. Pure;
/// overlapping modes contribute each capability at most once.
pub fn compose(modes: &[Mode]) -> CapabilitySet {
    let mut caps = BTreeSet::new();
    for mode in modes {
        caps.extend(mode.capabilities().iter().copied());
    }
    CapabilitySet { caps }
}
