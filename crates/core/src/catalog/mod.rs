//! Target catalog and image records.
//!
//! The pipeline reads catalog targets to match images, then writes the final
//! image record and flips the owner's wishlist entry to captured. Targets are
//! never created or modified by the pipeline itself; `insert_target` exists
//! for seeding and administration.

mod sqlite;
mod types;

pub use sqlite::SqliteCatalogStore;
pub use types::*;

/// Trait for catalog storage backends.
pub trait CatalogStore: Send + Sync {
    /// Add a target to the catalog.
    fn insert_target(&self, target: NewTarget) -> Result<Target, CatalogError>;

    /// Get a target by id.
    fn get_target(&self, id: &str) -> Result<Option<Target>, CatalogError>;

    /// Targets whose catalog identifier or primary name equals `identifier`,
    /// case-insensitively and ignoring whitespace. Brightest first.
    fn find_by_identifier(&self, identifier: &str) -> Result<Vec<Target>, CatalogError>;

    /// Targets whose catalog identifier, name or alternate name contains
    /// `fragment`, case-insensitively. Brightest first.
    fn search_by_fragment(&self, fragment: &str) -> Result<Vec<Target>, CatalogError>;

    /// Fixed targets inside the RA/Dec rectangle, ordered by magnitude
    /// ascending with unknown magnitudes last.
    fn find_in_box(&self, bounds: &CoordinateBox) -> Result<Vec<Target>, CatalogError>;

    /// Create the final image record. One record per job id: a repeat with the
    /// same target and method returns the existing record, a different target
    /// or method rewrites it.
    fn create_image_record(&self, record: NewImageRecord) -> Result<ImageRecord, CatalogError>;

    /// Get an image record by id.
    fn get_image_record(&self, id: &str) -> Result<Option<ImageRecord>, CatalogError>;

    /// Put a target on a user's wishlist.
    fn add_to_wishlist(&self, user_id: &str, target_id: &str) -> Result<(), CatalogError>;

    /// Current wishlist status, if the user tracks this target.
    fn wishlist_status(
        &self,
        user_id: &str,
        target_id: &str,
    ) -> Result<Option<WishlistStatus>, CatalogError>;

    /// Mark a wishlist entry captured. Returns whether an entry changed;
    /// targets the user never tracked are left alone.
    fn mark_target_captured(&self, user_id: &str, target_id: &str) -> Result<bool, CatalogError>;
}
