//! Nearest-entity search over registry snapshots.
//!
//! Linear scans: fleets here number in the tens. A spatial index could sit
//! behind the same functions if that ever changes.

use serde::Serialize;

use crate::error::{ProximityError, Result};
use crate::geo_math;
use crate::registry::EntityRegistry;
use crate::types::{EntityKind, EntityStatus, Position, TrackedEntity};

/// A registry entry paired with its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub entity: TrackedEntity,
    pub distance_m: f64,
}

impl Candidate {
    /// Travel time to the query point at `speed_mps`.
    pub fn eta_seconds(&self, speed_mps: f64) -> Result<f64> {
        geo_math::eta_seconds(self.distance_m, speed_mps)
    }
}

/// Finds the closest entity of `kind` with `status_filter` (normally
/// `Some(Available)`) no further than `max_radius_m`.
///
/// Candidates beyond the radius are excluded, not ranked last. Equal
/// distances resolve to the entity registered first.
pub fn find_nearest(
    registry: &EntityRegistry,
    from: &Position,
    kind: EntityKind,
    status_filter: Option<EntityStatus>,
    max_radius_m: f64,
) -> Result<Candidate> {
    check_radius(max_radius_m)?;

    let mut best: Option<Candidate> = None;
    for entity in registry.list_by_kind(kind, status_filter) {
        let distance_m = geo_math::distance_meters(from, &entity.position);
        if distance_m > max_radius_m {
            continue;
        }
        // Strict comparison keeps the earliest-registered entity on ties
        if best.as_ref().map_or(true, |b| distance_m < b.distance_m) {
            best = Some(Candidate { entity, distance_m });
        }
    }

    best.ok_or_else(|| {
        ProximityError::not_found(format!("no {kind:?} within {max_radius_m} m"))
    })
}

/// `find_nearest` with the usual defaults: available entities, any distance.
pub fn find_nearest_available(
    registry: &EntityRegistry,
    from: &Position,
    kind: EntityKind,
) -> Result<Candidate> {
    find_nearest(registry, from, kind, Some(EntityStatus::Available), f64::INFINITY)
}

/// Every entity of `kind` within `radius_m`, closest first.
pub fn find_within_radius(
    registry: &EntityRegistry,
    from: &Position,
    kind: EntityKind,
    radius_m: f64,
    status_filter: Option<EntityStatus>,
) -> Result<Vec<Candidate>> {
    check_radius(radius_m)?;

    let mut hits: Vec<Candidate> = registry
        .list_by_kind(kind, status_filter)
        .into_iter()
        .map(|entity| {
            let distance_m = geo_math::distance_meters(from, &entity.position);
            Candidate { entity, distance_m }
        })
        .filter(|c| c.distance_m <= radius_m)
        .collect();

    // Stable sort: ties stay in registry order
    hits.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    Ok(hits)
}

fn check_radius(radius_m: f64) -> Result<()> {
    if radius_m.is_nan() || radius_m < 0.0 {
        return Err(ProximityError::invalid(format!(
            "radius must be non-negative, got {radius_m}"
        )));
    }
    Ok(())
}
