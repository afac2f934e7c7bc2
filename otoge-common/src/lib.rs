//! # Otoge Common Library
//!
//! Shared code for the otoge score services:
//! - Score record model and achievement tiers
//! - Merge engine reconciling two observations of one score
//! - Player identity validation
//! - Bootstrap configuration loading
//! - Common error type

pub mod config;
pub mod error;
pub mod identity;
pub mod merge;
pub mod score;
pub mod time;

pub use error::{Error, Result};
pub use identity::{IdentityError, PlayerIdentity};
pub use merge::{merge, MergeOutcome, ScoreError};
pub use score::{Achievement, ChartType, FcType, FsType, LevelIndex, RateType, ScoreKey, ScoreRecord};
