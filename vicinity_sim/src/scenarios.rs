//! Named demo scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Truck crawls toward a citizen from ~2.3 km; one alert, then arrival
    TruckApproach,

    /// Nearest available truck across the Raipur demo fleet
    NearestTruck,

    /// Worker proof gating at 600 / 300 / 80 m from the site
    WorkerGeofence,

    /// Position feed drops out and recovers while a session is watching
    FeedOutage,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::TruckApproach,
            ScenarioId::NearestTruck,
            ScenarioId::WorkerGeofence,
            ScenarioId::FeedOutage,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::TruckApproach => "truck_approach",
            ScenarioId::NearestTruck => "nearest_truck",
            ScenarioId::WorkerGeofence => "worker_geofence",
            ScenarioId::FeedOutage => "feed_outage",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::TruckApproach => {
                "Truck starts ~2.3 km out at 3.3 m per 3 s tick, 500 m alert radius"
            }
            ScenarioId::NearestTruck => "Nearest available truck, busy trucks and far trucks excluded",
            ScenarioId::WorkerGeofence => "Proof upload gated at 600 m (denied), 300 m, 80 m",
            ScenarioId::FeedOutage => "30 s feed outage: one stale, one fresh, polling resumes",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "truck_approach" | "truckapproach" | "approach" => Ok(ScenarioId::TruckApproach),
            "nearest_truck" | "nearesttruck" | "nearest" => Ok(ScenarioId::NearestTruck),
            "worker_geofence" | "workergeofence" | "geofence" => Ok(ScenarioId::WorkerGeofence),
            "feed_outage" | "feedoutage" | "outage" => Ok(ScenarioId::FeedOutage),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
            assert_eq!(id.to_string(), id.name());
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("GEOFENCE".parse::<ScenarioId>().unwrap(), ScenarioId::WorkerGeofence);
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
