//! Testing utilities and mock implementations.
//!
//! Mocks for every external collaborator of the pipeline worker, so the full
//! pipeline can run against real SQLite stores without a conversion tool,
//! object store or solving service.
//!
//! # Example
//!
//! ```rust,ignore
//! use skyingest_core::testing::{fixtures, MockObjectStorage, MockPlateSolver};
//!
//! let storage = MockObjectStorage::new();
//! storage.put("user-1/m31.fits", fixtures::fits_with_position(10.68, 41.27)).await;
//!
//! let solver = MockPlateSolver::new();
//! solver.push_result(Ok(MockPlateSolver::outcome(10.68, 41.27))).await;
//! ```

mod mock_converter;
mod mock_solver;
mod mock_storage;

pub use mock_converter::MockConverter;
pub use mock_solver::{MockPlateSolver, RecordedSolve};
pub use mock_storage::MockObjectStorage;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::catalog::{CatalogError, CatalogStore, NewTarget, Target};
    use crate::fits::NewImage;

    /// Minimal 64×48 image.
    pub fn image() -> NewImage {
        NewImage::new(64, 48)
    }

    /// FITS file bytes for an image, with a zeroed data unit.
    ///
    /// # Panics
    ///
    /// Panics if the scratch file cannot be written or read back.
    pub fn fits_bytes(image: &NewImage) -> Vec<u8> {
        let path = std::env::temp_dir().join(format!("skyingest-fixture-{}.fits", uuid::Uuid::new_v4()));
        image.write(&path).expect("write FITS fixture");
        let bytes = std::fs::read(&path).expect("read FITS fixture");
        let _ = std::fs::remove_file(&path);
        bytes
    }

    /// FITS file with numeric RA/DEC keywords.
    pub fn fits_with_position(ra: f64, dec: f64) -> Vec<u8> {
        fits_bytes(&image().with_float("RA", ra).with_float("DEC", dec))
    }

    /// FITS file with an `OBJECT` keyword and optional numeric position.
    pub fn fits_with_object(object: &str, position: Option<(f64, f64)>) -> Vec<u8> {
        let mut image = image().with_text("OBJECT", object);
        if let Some((ra, dec)) = position {
            image = image.with_float("RA", ra).with_float("DEC", dec);
        }
        fits_bytes(&image)
    }

    /// FITS file with exposure data but no target or coordinates.
    pub fn fits_without_position() -> Vec<u8> {
        fits_bytes(
            &image()
                .with_float("EXPTIME", 300.0)
                .with_int("NCOMBINE", 12)
                .with_text("FILTER", "Ha"),
        )
    }

    /// A handful of well-known deep-sky objects plus a planet.
    pub fn sample_targets() -> Vec<NewTarget> {
        vec![
            NewTarget::fixed("Andromeda Galaxy", 10.6847, 41.2687)
                .with_id("m31")
                .with_catalog_ids(&["M31", "NGC 224"])
                .with_alternate_names(&["Great Andromeda Nebula"])
                .with_magnitude(3.4),
            NewTarget::fixed("M32", 10.6743, 40.8652)
                .with_id("m32")
                .with_catalog_ids(&["M32", "NGC 221"])
                .with_magnitude(8.1),
            NewTarget::fixed("Triangulum Galaxy", 23.4621, 30.6599)
                .with_id("m33")
                .with_catalog_ids(&["M33", "NGC 598"])
                .with_magnitude(5.7),
            NewTarget::fixed("North America Nebula", 314.75, 44.33)
                .with_id("ngc7000")
                .with_catalog_ids(&["NGC 7000", "C20"])
                .with_magnitude(4.0),
            NewTarget::dynamic("Jupiter").with_id("jupiter"),
        ]
    }

    /// Insert `sample_targets` into a catalog.
    pub fn seed_catalog(catalog: &dyn CatalogStore) -> Result<Vec<Target>, CatalogError> {
        sample_targets()
            .into_iter()
            .map(|target| catalog.insert_target(target))
            .collect()
    }
}
