//! Score record model
//!
//! One `ScoreRecord` is the canonical observation of a player's result on a
//! single chart, keyed by (song id, chart type, difficulty). The player half
//! of the identity key is carried by whoever owns the record (the score store
//! partitions rows by player credential).
//!
//! Tier enums keep the numeric codes used by the upstream providers:
//! - `FcType`: lower code = rarer achievement (AP+ = 0)
//! - `FsType`: higher code = better achievement (FDX+ = 4)
//! - `RateType`: lower code = better grade (SSS+ = 0)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::merge::ScoreError;

/// Generates `code`, `from_code`, `as_str`, `Display` and `FromStr` for a
/// tier enum whose serde names are the lowercase variant names.
macro_rules! coded_enum {
    ($name:ident { $($variant:ident = $code:literal => $text:literal),+ $(,)? }) => {
        impl $name {
            /// All variants in code order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Numeric code used by upstream providers
            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            /// Variant for a numeric code
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Stable storage name
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($name), other)),
                }
            }
        }
    };
}

/// Chart variant of a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Standard,
    Dx,
    Utage,
}

coded_enum!(ChartType {
    Standard = 0 => "standard",
    Dx = 1 => "dx",
    Utage = 2 => "utage",
});

/// Difficulty tier of a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LevelIndex {
    Basic,
    Advanced,
    Expert,
    Master,
    ReMaster,
}

coded_enum!(LevelIndex {
    Basic = 0 => "basic",
    Advanced = 1 => "advanced",
    Expert = 2 => "expert",
    Master = 3 => "master",
    ReMaster = 4 => "remaster",
});

impl TryFrom<u8> for LevelIndex {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        LevelIndex::from_code(code).ok_or_else(|| format!("unknown level index: {}", code))
    }
}

impl From<LevelIndex> for u8 {
    fn from(level: LevelIndex) -> u8 {
        level.code()
    }
}

/// Full combo tier (lower code = rarer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FcType {
    /// AP+
    App,
    /// AP
    Ap,
    /// FC+
    Fcp,
    /// FC
    Fc,
}

coded_enum!(FcType {
    App = 0 => "app",
    Ap = 1 => "ap",
    Fcp = 2 => "fcp",
    Fc = 3 => "fc",
});

/// Full sync tier (higher code = better)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Sync,
    /// FS
    Fs,
    /// FS+
    Fsp,
    /// FDX
    Fsd,
    /// FDX+
    Fsdp,
}

coded_enum!(FsType {
    Sync = 0 => "sync",
    Fs = 1 => "fs",
    Fsp = 2 => "fsp",
    Fsd = 3 => "fsd",
    Fsdp = 4 => "fsdp",
});

/// Letter-grade band (lower code = better)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateType {
    Sssp,
    Sss,
    Ssp,
    Ss,
    Sp,
    S,
    Aaa,
    Aa,
    A,
    Bbb,
    Bb,
    B,
    C,
    D,
}

coded_enum!(RateType {
    Sssp = 0 => "sssp",
    Sss = 1 => "sss",
    Ssp = 2 => "ssp",
    Ss = 3 => "ss",
    Sp = 4 => "sp",
    S = 5 => "s",
    Aaa = 6 => "aaa",
    Aa = 7 => "aa",
    A = 8 => "a",
    Bbb = 9 => "bbb",
    Bb = 10 => "bb",
    B = 11 => "b",
    C = 12 => "c",
    D = 13 => "d",
});

impl RateType {
    /// Lower bound (ten-thousandths of a percent) of each band, best first
    const THRESHOLDS: [(u32, RateType); 13] = [
        (1_005_000, RateType::Sssp),
        (1_000_000, RateType::Sss),
        (995_000, RateType::Ssp),
        (990_000, RateType::Ss),
        (980_000, RateType::Sp),
        (970_000, RateType::S),
        (940_000, RateType::Aaa),
        (900_000, RateType::Aa),
        (800_000, RateType::A),
        (750_000, RateType::Bbb),
        (700_000, RateType::Bb),
        (600_000, RateType::B),
        (500_000, RateType::C),
    ];

    /// Grade band for an achievement percentage
    pub fn from_achievement(achievement: Achievement) -> RateType {
        RateType::THRESHOLDS
            .iter()
            .find(|(floor, _)| achievement.ten_thousandths() >= *floor)
            .map(|(_, rate)| *rate)
            .unwrap_or(RateType::D)
    }

    /// True if `self` is a strictly better grade than `other`
    pub fn is_better_than(self, other: RateType) -> bool {
        self.code() < other.code()
    }
}

/// Accuracy percentage with four decimal places, stored as ten-thousandths
/// of a percent (`99.5000%` is `995000`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Achievement(u32);

impl Achievement {
    /// Ten-thousandths per percent
    pub const SCALE: u32 = 10_000;
    /// Highest reachable value (101.0000%)
    pub const MAX: Achievement = Achievement(101 * Achievement::SCALE);

    pub const fn from_ten_thousandths(value: u32) -> Self {
        Achievement(value)
    }

    pub const fn ten_thousandths(self) -> u32 {
        self.0
    }

    /// Round a floating percentage to four decimal places.
    ///
    /// Returns `None` for negative, non-finite or out-of-range input.
    pub fn from_percent(percent: f64) -> Option<Self> {
        if !percent.is_finite() || percent < 0.0 {
            return None;
        }
        let scaled = (percent * Self::SCALE as f64).round();
        if scaled > u32::MAX as f64 {
            return None;
        }
        Some(Achievement(scaled as u32))
    }

    pub fn as_percent(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_in_range(self) -> bool {
        self <= Self::MAX
    }
}

impl fmt::Display for Achievement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

impl Serialize for Achievement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_percent())
    }
}

impl<'de> Deserialize<'de> for Achievement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let percent = f64::deserialize(deserializer)?;
        Achievement::from_percent(percent).ok_or_else(|| {
            serde::de::Error::custom(format!("achievement out of range: {}", percent))
        })
    }
}

/// Identity of a chart within one player's score set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScoreKey {
    pub song_id: u32,
    pub chart_type: ChartType,
    pub level_index: LevelIndex,
}

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.song_id, self.chart_type, self.level_index)
    }
}

/// Canonical score for one chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub song_id: u32,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub level_index: LevelIndex,
    #[serde(default)]
    pub achievements: Achievement,
    #[serde(default)]
    pub dx_score: u32,
    /// Provider-computed rating; absent until some provider reports one
    #[serde(default)]
    pub dx_rating: Option<f64>,
    #[serde(default)]
    pub play_count: u32,
    #[serde(default)]
    pub fc: Option<FcType>,
    #[serde(default)]
    pub fs: Option<FsType>,
    pub rate: RateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ScoreRecord {
    /// Bare observation with every optional measure absent
    pub fn new(song_id: u32, chart_type: ChartType, level_index: LevelIndex, rate: RateType) -> Self {
        Self {
            song_id,
            chart_type,
            level_index,
            achievements: Achievement::default(),
            dx_score: 0,
            dx_rating: None,
            play_count: 0,
            fc: None,
            fs: None,
            rate,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn key(&self) -> ScoreKey {
        ScoreKey {
            song_id: self.song_id,
            chart_type: self.chart_type,
            level_index: self.level_index,
        }
    }

    /// Song id with the DX chart offset removed
    pub fn base_song_id(&self) -> u32 {
        self.song_id % 10_000
    }

    /// Check that every measured field is well-formed
    pub fn validate(&self) -> Result<(), ScoreError> {
        let invalid = |reason: String| ScoreError::InvalidRecord {
            key: self.key(),
            reason,
        };

        if self.song_id == 0 {
            return Err(invalid("song id must be non-zero".to_string()));
        }
        if !self.achievements.is_in_range() {
            return Err(invalid(format!(
                "achievements {} exceeds {}",
                self.achievements,
                Achievement::MAX
            )));
        }
        if let Some(rating) = self.dx_rating {
            if !rating.is_finite() || rating < 0.0 {
                return Err(invalid(format!("rating {} is not a non-negative number", rating)));
            }
        }
        Ok(())
    }

    /// Compare every scored field, ignoring timestamps
    pub fn same_values(&self, other: &ScoreRecord) -> bool {
        self.key() == other.key()
            && self.achievements == other.achievements
            && self.dx_score == other.dx_score
            && self.dx_rating == other.dx_rating
            && self.play_count == other.play_count
            && self.fc == other.fc
            && self.fs == other.fs
            && self.rate == other.rate
    }
}
