//! Target matching.
//!
//! A name hint is tried first: exact identifier match, then contains match.
//! Only when the hint finds nothing are coordinates used, against fixed
//! targets inside a rectangular tolerance window. Whenever several targets
//! qualify the brightest wins, then the lowest id.

mod types;

pub use types::*;

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::{CatalogError, CatalogStore, CoordinateBox, Target};

/// Links extracted or solved metadata to a catalog target.
pub struct TargetMatcher {
    catalog: Arc<dyn CatalogStore>,
    config: MatcherConfig,
}

impl TargetMatcher {
    pub fn new(catalog: Arc<dyn CatalogStore>, config: MatcherConfig) -> Self {
        Self { catalog, config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Find the best target for a query. `Ok(None)` means no match, which
    /// is an expected outcome.
    pub fn find_match(&self, query: &MatchQuery) -> Result<Option<TargetMatch>, CatalogError> {
        if let Some(hint) = query.name_hint.as_deref() {
            if let Some(target) = self.match_name(hint)? {
                return Ok(Some(TargetMatch {
                    target,
                    method: MatchMethod::Metadata,
                }));
            }
        }

        if let Some((position, source)) = query.position {
            let bounds = CoordinateBox::around(position.ra, position.dec, self.config.tolerance_deg);
            let candidates = self.catalog.find_in_box(&bounds)?;
            let fixed = candidates.into_iter().filter(|t| !t.is_dynamic);
            if let Some(target) = brightest(fixed) {
                debug!(target_id = %target.id, %position, "Coordinate match");
                return Ok(Some(TargetMatch {
                    target,
                    method: source.match_method(),
                }));
            }
        }

        Ok(None)
    }

    fn match_name(&self, hint: &str) -> Result<Option<Target>, CatalogError> {
        let hint = hint.trim();
        if hint.is_empty() {
            return Ok(None);
        }

        if let Some(target) = brightest(self.catalog.find_by_identifier(hint)?) {
            debug!(target_id = %target.id, hint, "Exact name match");
            return Ok(Some(target));
        }

        let target = brightest(self.catalog.search_by_fragment(hint)?);
        if let Some(target) = &target {
            debug!(target_id = %target.id, hint, "Partial name match");
        }
        Ok(target)
    }
}

/// Lowest magnitude first, unknown magnitude last, then lowest id.
fn by_brightness(a: &Target, b: &Target) -> Ordering {
    let magnitude = match (a.magnitude, b.magnitude) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    magnitude.then_with(|| a.id.cmp(&b.id))
}

fn brightest(targets: impl IntoIterator<Item = Target>) -> Option<Target> {
    targets.into_iter().min_by(by_brightness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NewTarget, SqliteCatalogStore};
    use crate::coordinates::SkyPosition;

    fn matcher_with(targets: Vec<NewTarget>) -> TargetMatcher {
        let store = SqliteCatalogStore::in_memory().unwrap();
        for target in targets {
            store.insert_target(target).unwrap();
        }
        TargetMatcher::new(Arc::new(store), MatcherConfig::default())
    }

    fn north_america() -> NewTarget {
        NewTarget::fixed("North America Nebula", 314.75, 44.33)
            .with_id("ngc7000")
            .with_catalog_ids(&["NGC 7000", "C20"])
            .with_magnitude(4.0)
    }

    fn andromeda() -> NewTarget {
        NewTarget::fixed("Andromeda Galaxy", 10.6847, 41.2687)
            .with_id("m31")
            .with_catalog_ids(&["M31"])
            .with_magnitude(3.4)
    }

    #[test]
    fn test_brighter_target_wins_coordinate_tie() {
        let matcher = matcher_with(vec![
            NewTarget::fixed("Faint", 100.0, 20.0)
                .with_id("a")
                .with_magnitude(10.0),
            NewTarget::fixed("Bright", 100.0, 20.0)
                .with_id("b")
                .with_magnitude(8.0),
        ]);
        let query = MatchQuery::new()
            .with_position(SkyPosition::new(100.2, 20.1), CoordinateSource::Metadata);

        let found = matcher.find_match(&query).unwrap().unwrap();
        assert_eq!(found.target_id(), "b");
        assert_eq!(found.method, MatchMethod::Coordinates);
    }

    #[test]
    fn test_equal_magnitude_resolves_by_id() {
        let matcher = matcher_with(vec![
            NewTarget::fixed("Second", 50.0, 10.0)
                .with_id("z")
                .with_magnitude(9.0),
            NewTarget::fixed("First", 50.1, 10.1)
                .with_id("k")
                .with_magnitude(9.0),
        ]);
        let query = MatchQuery::new()
            .with_position(SkyPosition::new(50.0, 10.0), CoordinateSource::PlateSolve);

        let found = matcher.find_match(&query).unwrap().unwrap();
        assert_eq!(found.target_id(), "k");
        assert_eq!(found.method, MatchMethod::PlateSolve);
    }

    #[test]
    fn test_name_hint_beats_coordinates() {
        let matcher = matcher_with(vec![north_america(), andromeda()]);
        let query = MatchQuery::new()
            .with_name_hint(Some("NGC 7000"))
            .with_position(SkyPosition::new(10.68, 41.27), CoordinateSource::Metadata);

        let found = matcher.find_match(&query).unwrap().unwrap();
        assert_eq!(found.target_id(), "ngc7000");
        assert_eq!(found.method, MatchMethod::Metadata);
    }

    #[test]
    fn test_partial_name_match() {
        let matcher = matcher_with(vec![north_america(), andromeda()]);
        let query = MatchQuery::new().with_name_hint(Some("andromeda"));

        let found = matcher.find_match(&query).unwrap().unwrap();
        assert_eq!(found.target_id(), "m31");
        assert_eq!(found.method, MatchMethod::Metadata);
    }

    #[test]
    fn test_unknown_hint_falls_back_to_coordinates() {
        let matcher = matcher_with(vec![north_america(), andromeda()]);
        let query = MatchQuery::new()
            .with_name_hint(Some("Light_Frame_0042"))
            .with_position(SkyPosition::new(10.68, 41.27), CoordinateSource::Metadata);

        let found = matcher.find_match(&query).unwrap().unwrap();
        assert_eq!(found.target_id(), "m31");
        assert_eq!(found.method, MatchMethod::Coordinates);
    }

    #[test]
    fn test_blank_hint_ignored() {
        let matcher = matcher_with(vec![andromeda()]);
        let query = MatchQuery::new().with_name_hint(Some("   "));
        assert!(matcher.find_match(&query).unwrap().is_none());
    }

    #[test]
    fn test_outside_window_is_no_match() {
        let matcher = matcher_with(vec![andromeda()]);
        let query = MatchQuery::new()
            .with_position(SkyPosition::new(11.3, 41.27), CoordinateSource::Metadata);
        assert!(matcher.find_match(&query).unwrap().is_none());
    }

    #[test]
    fn test_dynamic_targets_only_match_by_name() {
        let matcher = matcher_with(vec![NewTarget::dynamic("Jupiter").with_id("jupiter")]);

        let by_name = MatchQuery::new().with_name_hint(Some("jupiter"));
        assert_eq!(
            matcher.find_match(&by_name).unwrap().unwrap().target_id(),
            "jupiter"
        );

        let by_position = MatchQuery::new()
            .with_position(SkyPosition::new(0.0, 0.0), CoordinateSource::Metadata);
        assert!(matcher.find_match(&by_position).unwrap().is_none());
    }
}
