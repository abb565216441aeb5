//! Execution platforms as a closed enumeration with static capability tables.
//!
//! Adding a platform means adding a variant and its table; every dispatch
//! site matches exhaustively, so the compiler points at what is missing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::channel::ChannelDescriptor;
use crate::error::Error;
use crate::plan::OperatorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// In-process engine: single-threaded iteration over materialized rows.
    Local,
    /// Partitioned engine; data travels as a fixed number of partitions.
    Distributed,
}

/// What a platform can do. Registered once per variant, never mutated.
#[derive(Debug)]
pub struct Capabilities {
    pub name: &'static str,
    pub operator_kinds: &'static [OperatorKind],
    pub channels: &'static [ChannelDescriptor],
    /// Prefix of every load-profile specification key owned by this platform.
    pub spec_prefix: &'static str,
}

static LOCAL: Capabilities = Capabilities {
    name: "local",
    operator_kinds: &[
        OperatorKind::CollectionSource,
        OperatorKind::TextFileSource,
        OperatorKind::Filter,
        OperatorKind::Map,
        OperatorKind::Project,
        OperatorKind::Union,
        OperatorKind::Sink,
    ],
    channels: &[ChannelDescriptor::Stream, ChannelDescriptor::Collection],
    spec_prefix: "local",
};

static DISTRIBUTED: Capabilities = Capabilities {
    name: "distributed",
    operator_kinds: &[
        OperatorKind::CollectionSource,
        OperatorKind::TextFileSource,
        OperatorKind::Filter,
        OperatorKind::Map,
        OperatorKind::Project,
        OperatorKind::Union,
        OperatorKind::Sink,
    ],
    channels: &[ChannelDescriptor::Partitioned, ChannelDescriptor::Collection],
    spec_prefix: "distributed",
};

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Local, Platform::Distributed];

    pub fn capabilities(self) -> &'static Capabilities {
        match self {
            Platform::Local => &LOCAL,
            Platform::Distributed => &DISTRIBUTED,
        }
    }

    pub fn name(self) -> &'static str {
        self.capabilities().name
    }

    /// Case-insensitive lookup by registered name.
    pub fn from_name(name: &str) -> Option<Platform> {
        Platform::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn supports(self, kind: OperatorKind) -> bool {
        self.capabilities().operator_kinds.contains(&kind)
    }

    /// Build a specification key like `local.filter.main`.
    pub fn spec_key(self, operator: &str, phase: &str) -> String {
        format!("{}.{}.{}", self.capabilities().spec_prefix, operator, phase)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::from_name(s).ok_or_else(|| Error::Config(format!("unknown platform '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_ignores_case() {
        assert_eq!(Platform::from_name("LOCAL"), Some(Platform::Local));
        assert_eq!("distributed".parse::<Platform>().ok(), Some(Platform::Distributed));
        assert!(Platform::from_name("gpu").is_none());
    }

    #[test]
    fn spec_keys_carry_platform_prefix() {
        assert_eq!(
            Platform::Distributed.spec_key("filter", "main"),
            "distributed.filter.main"
        );
    }

    #[test]
    fn platform_channels_are_producible_by_that_platform() {
        for p in Platform::ALL {
            for c in p.capabilities().channels {
                assert!(c.producers().contains(&p), "{c:?} not producible on {p}");
            }
        }
    }
}
