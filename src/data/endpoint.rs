//! Knowledge about OpenF1 endpoints and the filters they understand

/// Season filter
pub const YEAR: &str = "year";
/// Grand Prix weekend filter
pub const MEETING_KEY: &str = "meeting_key";
/// Single session filter
pub const SESSION_KEY: &str = "session_key";
/// Car number filter
pub const DRIVER_NUMBER: &str = "driver_number";

/// Canonical navigation parameters, shallowest first
pub const CANONICAL_PARAMS: [&str; 4] = [YEAR, MEETING_KEY, SESSION_KEY, DRIVER_NUMBER];

const SCHEDULE_FILTERS: &[&str] = &[YEAR, MEETING_KEY];
const SESSION_FILTERS: &[&str] = &[YEAR, MEETING_KEY, SESSION_KEY];
const DRIVER_DATA_FILTERS: &[&str] = &[MEETING_KEY, SESSION_KEY, DRIVER_NUMBER];

/// Canonical parameters an endpoint can be filtered by.
///
/// Unknown endpoints return `None`, meaning "no restriction known".
pub fn accepted_params(endpoint: &str) -> Option<&'static [&'static str]> {
    match endpoint {
        "meetings" => Some(SCHEDULE_FILTERS),
        "sessions" => Some(SESSION_FILTERS),
        "drivers" | "laps" | "stints" | "pit" | "position" | "team_radio" | "car_data"
        | "location" | "intervals" | "session_result" | "starting_grid" => {
            Some(DRIVER_DATA_FILTERS)
        }
        _ => None,
    }
}

/// Whether `endpoint` can be filtered by the canonical parameter `param`
pub fn accepts(endpoint: &str, param: &str) -> bool {
    accepted_params(endpoint).map_or(true, |params| params.contains(&param))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meetings_filter_by_year_not_session() {
        assert!(accepts("meetings", YEAR));
        assert!(accepts("meetings", MEETING_KEY));
        assert!(!accepts("meetings", SESSION_KEY));
        assert!(!accepts("meetings", DRIVER_NUMBER));
    }

    #[test]
    fn test_laps_filter_by_session_and_driver() {
        assert!(accepts("laps", SESSION_KEY));
        assert!(accepts("laps", DRIVER_NUMBER));
        assert!(!accepts("laps", YEAR));
    }

    #[test]
    fn test_unknown_endpoint_accepts_everything() {
        for param in CANONICAL_PARAMS {
            assert!(accepts("weather_forecast", param));
        }
    }
}
