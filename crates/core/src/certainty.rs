//! Certainty scale returned by a downloader's URL test.
//!
//! Any integer is a legal score; the named bands are reference points.
//! Everything at or below [`CertaintyScore::UNSUPPORTED`] is excluded from
//! candidate selection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer confidence that a URL is handled by a given downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertaintyScore(i32);

impl CertaintyScore {
    pub const UNSUPPORTED: Self = Self(-100);
    pub const POSSIBLE: Self = Self(0);
    pub const PROBABLE: Self = Self(50);
    pub const CERTAIN: Self = Self(100);

    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i32 {
        self.0
    }

    /// `true` if the score is strictly above the unsupported threshold.
    pub fn is_supported(self) -> bool {
        self > Self::UNSUPPORTED
    }
}

impl From<i32> for CertaintyScore {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for CertaintyScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
