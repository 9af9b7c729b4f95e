//! Construction-time configuration of the simulator.
//!
//! The spellings accepted by the [`FromStr`] implementations are exactly the
//! ones the command line takes: `implicit`/`explicit` for the free
//! collection and `first-fit`/`best-fit` for the placement policy.

use crate::heap::{FreeCollectionKind, Placement};

use core::fmt;
use core::str::FromStr;

/// Default starting region size in bytes.
pub const INITIAL_REGION_SIZE: usize = 4_000;

/// Default upper bound for region resizing in bytes.
pub const MAXIMUM_REGION_SIZE: usize = 400_000;

/// The configuration record a [`Heap`](crate::Heap) is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// The free-collection variant tracking free blocks.
    pub free_collection: FreeCollectionKind,
    /// The placement policy choosing among fitting free blocks.
    pub placement: Placement,
    /// Starting region size in bytes; a multiple of 8.
    pub initial_size: usize,
    /// Upper bound for region resizing.
    pub maximum_size: usize,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            free_collection: FreeCollectionKind::Implicit,
            placement: Placement::FirstFit,
            initial_size: INITIAL_REGION_SIZE,
            maximum_size: MAXIMUM_REGION_SIZE,
        }
    }
}

/// A configuration option did not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The free-collection option was neither `implicit` nor `explicit`.
    UnknownFreeCollection,
    /// The placement option was neither `first-fit` nor `best-fit`.
    UnknownPlacement,
}
impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::UnknownFreeCollection => "Invalid free list type. Use 'implicit' or 'explicit'.",
            Self::UnknownPlacement => "Invalid allocation strategy. Use 'first-fit' or 'best-fit'.",
        };
        f.write_str(message)
    }
}
impl std::error::Error for ConfigError {}

impl FromStr for FreeCollectionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implicit" => Ok(Self::Implicit),
            "explicit" => Ok(Self::Explicit),
            _ => Err(ConfigError::UnknownFreeCollection),
        }
    }
}

impl FromStr for Placement {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-fit" => Ok(Self::FirstFit),
            "best-fit" => Ok(Self::BestFit),
            _ => Err(ConfigError::UnknownPlacement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError, FreeCollectionKind, Placement};

    #[test]
    fn defaults_match_the_classic_simulator() {
        let config = Config::default();
        assert_eq!(config.free_collection, FreeCollectionKind::Implicit);
        assert_eq!(config.placement, Placement::FirstFit);
        assert_eq!(config.initial_size, 4_000);
        assert_eq!(config.maximum_size, 400_000);
    }

    #[test]
    fn option_spellings() {
        assert_eq!("implicit".parse(), Ok(FreeCollectionKind::Implicit));
        assert_eq!("explicit".parse(), Ok(FreeCollectionKind::Explicit));
        assert_eq!("first-fit".parse(), Ok(Placement::FirstFit));
        assert_eq!("best-fit".parse(), Ok(Placement::BestFit));

        assert_eq!(
            "segregated".parse::<FreeCollectionKind>(),
            Err(ConfigError::UnknownFreeCollection)
        );
        assert_eq!(
            "worst-fit".parse::<Placement>(),
            Err(ConfigError::UnknownPlacement)
        );
    }
}
