pub mod matcher;
pub mod normalize;

pub use matcher::{MatchConfig, MatchDecision, MatchResult, Matcher, NoMatchReason};
