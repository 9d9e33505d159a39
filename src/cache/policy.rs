//! Time-to-live policy per endpoint category

use std::time::Duration;

const HOUR: u64 = 60 * 60;

/// Expiry category an endpoint falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlCategory {
    /// Meetings and sessions rarely change once published
    Schedule,
    /// Per-session driver entries
    DriverInfo,
    /// Session results can be amended after the flag
    Results,
    /// Laps, stints and pit stops
    RaceData,
    /// Position updates arrive throughout a session
    Position,
    /// Anything not listed above
    Default,
}

impl TtlCategory {
    /// Resolves the category for an endpoint name
    pub fn for_endpoint(endpoint: &str) -> Self {
        match endpoint {
            "meetings" | "sessions" => TtlCategory::Schedule,
            "drivers" => TtlCategory::DriverInfo,
            "session_result" => TtlCategory::Results,
            "laps" | "stints" | "pit" => TtlCategory::RaceData,
            "position" => TtlCategory::Position,
            _ => TtlCategory::Default,
        }
    }

    /// Time-to-live for entries in this category
    pub fn ttl(self) -> Duration {
        match self {
            TtlCategory::Schedule => Duration::from_secs(24 * HOUR),
            TtlCategory::DriverInfo => Duration::from_secs(12 * HOUR),
            TtlCategory::Results => Duration::from_secs(2 * HOUR),
            TtlCategory::RaceData => Duration::from_secs(HOUR),
            TtlCategory::Position => Duration::from_secs(30 * 60),
            TtlCategory::Default => Duration::from_secs(6 * HOUR),
        }
    }
}

/// Time-to-live for an endpoint's cached responses
pub fn ttl_for(endpoint: &str) -> Duration {
    TtlCategory::for_endpoint(endpoint).ttl()
}
