//! SQLite-backed target catalog.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};

use super::{
    CatalogError, CatalogStore, CoordinateBox, ImageRecord, NewImageRecord, NewTarget, Target,
    WishlistStatus,
};
use crate::matcher::MatchMethod;

const TARGET_COLUMNS: &str =
    "t.id, t.name, t.catalog_ids, t.alternate_names, t.ra, t.dec, t.magnitude, t.is_dynamic";

const TARGET_ORDER: &str = "t.magnitude IS NULL, t.magnitude ASC, t.id ASC";

const IMAGE_COLUMNS: &str = "id, user_id, target_id, job_id, storage_key, original_filename, \
     match_method, ra, dec, exposure_time, total_integration_time, filter_name, capture_date, \
     metadata, created_at";

/// SQLite-backed target catalog.
pub struct SqliteCatalogStore {
    conn: Mutex<Connection>,
}

impl SqliteCatalogStore {
    /// Open (or create) a catalog database at `path`.
    pub fn new(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path).map_err(|e| CatalogError::Database(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory catalog (useful for testing).
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CatalogError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CatalogError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS targets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                catalog_ids TEXT NOT NULL DEFAULT '[]',
                alternate_names TEXT NOT NULL DEFAULT '[]',
                ra REAL,
                dec REAL,
                magnitude REAL,
                is_dynamic INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_targets_position ON targets(ra, dec);

            -- Lowercased lookup keys; `compact` has all whitespace removed
            CREATE TABLE IF NOT EXISTS target_identifiers (
                target_id TEXT NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
                identifier TEXT NOT NULL,
                compact TEXT NOT NULL,
                kind TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_target_identifiers_identifier ON target_identifiers(identifier);
            CREATE INDEX IF NOT EXISTS idx_target_identifiers_compact ON target_identifiers(compact);

            CREATE TABLE IF NOT EXISTS image_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                target_id TEXT NOT NULL REFERENCES targets(id),
                job_id TEXT UNIQUE,
                storage_key TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                match_method TEXT NOT NULL,
                ra REAL,
                dec REAL,
                exposure_time REAL,
                total_integration_time REAL,
                filter_name TEXT,
                capture_date TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_image_records_user ON image_records(user_id);
            CREATE INDEX IF NOT EXISTS idx_image_records_target ON image_records(target_id);

            CREATE TABLE IF NOT EXISTS user_targets (
                user_id TEXT NOT NULL,
                target_id TEXT NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, target_id)
            );
            "#,
        )
        .map_err(|e| CatalogError::Database(e.to_string()))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.conn
            .lock()
            .map_err(|_| CatalogError::Database("catalog connection poisoned".to_string()))
    }

    fn query_targets<P: Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<Target>, CatalogError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params, row_to_target)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CatalogError::Database(e.to_string()))
    }
}

/// Lowercase and trim an identifier for lookup.
fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Normalized identifier with every whitespace character removed.
fn compact(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Escape LIKE wildcards so a fragment matches literally.
fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_target(row: &Row<'_>) -> rusqlite::Result<Target> {
    let catalog_ids: String = row.get(2)?;
    let alternate_names: String = row.get(3)?;
    let is_dynamic: i64 = row.get(7)?;

    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        catalog_ids: serde_json::from_str(&catalog_ids).unwrap_or_default(),
        alternate_names: serde_json::from_str(&alternate_names).unwrap_or_default(),
        ra: row.get(4)?,
        dec: row.get(5)?,
        magnitude: row.get(6)?,
        is_dynamic: is_dynamic != 0,
    })
}

fn row_to_image_record(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    let match_method: String = row.get(6)?;
    let capture_date: Option<String> = row.get(12)?;
    let metadata: Option<String> = row.get(13)?;
    let created_at: String = row.get(14)?;

    Ok(ImageRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        target_id: row.get(2)?,
        job_id: row.get(3)?,
        storage_key: row.get(4)?,
        original_filename: row.get(5)?,
        match_method: MatchMethod::parse(&match_method).unwrap_or(MatchMethod::Manual),
        ra: row.get(7)?,
        dec: row.get(8)?,
        exposure_time: row.get(9)?,
        total_integration_time: row.get(10)?,
        filter_name: row.get(11)?,
        capture_date: capture_date.as_deref().map(parse_timestamp),
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: parse_timestamp(&created_at),
    })
}

impl CatalogStore for SqliteCatalogStore {
    fn insert_target(&self, target: NewTarget) -> Result<Target, CatalogError> {
        if target.name.trim().is_empty() {
            return Err(CatalogError::InvalidTarget("name is empty".to_string()));
        }
        if !target.is_dynamic && (target.ra.is_none() || target.dec.is_none()) {
            return Err(CatalogError::InvalidTarget(format!(
                "fixed target '{}' needs both RA and Dec",
                target.name
            )));
        }

        let id = target
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();
        let catalog_ids = serde_json::to_string(&target.catalog_ids)
            .map_err(|e| CatalogError::InvalidTarget(e.to_string()))?;
        let alternate_names = serde_json::to_string(&target.alternate_names)
            .map_err(|e| CatalogError::InvalidTarget(e.to_string()))?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO targets (id, name, catalog_ids, alternate_names, ra, dec, magnitude, is_dynamic, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                target.name,
                catalog_ids,
                alternate_names,
                target.ra,
                target.dec,
                target.magnitude,
                target.is_dynamic as i64,
                now,
            ],
        )
        .map_err(|e| CatalogError::Database(e.to_string()))?;

        let keys = target
            .catalog_ids
            .iter()
            .map(|k| (k, "catalog"))
            .chain(std::iter::once((&target.name, "name")))
            .chain(target.alternate_names.iter().map(|k| (k, "alternate")));
        for (key, kind) in keys {
            tx.execute(
                "INSERT INTO target_identifiers (target_id, identifier, compact, kind) VALUES (?1, ?2, ?3, ?4)",
                params![id, normalize(key), compact(key), kind],
            )
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        Ok(Target {
            id,
            name: target.name,
            catalog_ids: target.catalog_ids,
            alternate_names: target.alternate_names,
            ra: target.ra,
            dec: target.dec,
            magnitude: target.magnitude,
            is_dynamic: target.is_dynamic,
        })
    }

    fn get_target(&self, id: &str) -> Result<Option<Target>, CatalogError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {TARGET_COLUMNS} FROM targets t WHERE t.id = ?1"),
            params![id],
            row_to_target,
        )
        .optional()
        .map_err(|e| CatalogError::Database(e.to_string()))
    }

    fn find_by_identifier(&self, identifier: &str) -> Result<Vec<Target>, CatalogError> {
        let key = compact(identifier);
        if key.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let sql = format!(
            "SELECT {TARGET_COLUMNS} FROM targets t
             WHERE t.id IN (
                 SELECT target_id FROM target_identifiers
                 WHERE kind IN ('catalog', 'name') AND compact = ?1
             )
             ORDER BY {TARGET_ORDER}"
        );
        Self::query_targets(&conn, &sql, params![key])
    }

    fn search_by_fragment(&self, fragment: &str) -> Result<Vec<Target>, CatalogError> {
        let fragment = normalize(fragment);
        if fragment.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let pattern = format!("%{}%", escape_like(&fragment));
        let sql = format!(
            "SELECT {TARGET_COLUMNS} FROM targets t
             WHERE t.id IN (
                 SELECT target_id FROM target_identifiers
                 WHERE identifier LIKE ?1 ESCAPE '\\'
             )
             ORDER BY {TARGET_ORDER}"
        );
        Self::query_targets(&conn, &sql, params![pattern])
    }

    fn find_in_box(&self, bounds: &CoordinateBox) -> Result<Vec<Target>, CatalogError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {TARGET_COLUMNS} FROM targets t
             WHERE t.is_dynamic = 0
               AND t.ra IS NOT NULL AND t.dec IS NOT NULL
               AND t.ra BETWEEN ?1 AND ?2
               AND t.dec BETWEEN ?3 AND ?4
             ORDER BY {TARGET_ORDER}"
        );
        Self::query_targets(
            &conn,
            &sql,
            params![bounds.ra_min, bounds.ra_max, bounds.dec_min, bounds.dec_max],
        )
    }

    fn create_image_record(&self, record: NewImageRecord) -> Result<ImageRecord, CatalogError> {
        let conn = self.lock()?;

        let existing = match &record.job_id {
            Some(job_id) => conn
                .query_row(
                    &format!("SELECT {IMAGE_COLUMNS} FROM image_records WHERE job_id = ?1"),
                    params![job_id],
                    row_to_image_record,
                )
                .optional()
                .map_err(|e| CatalogError::Database(e.to_string()))?,
            None => None,
        };

        // A retried job finds its own record. A job re-resolved to another
        // target, or by another method, rewrites the record in place.
        if let Some(existing) = &existing {
            if existing.target_id == record.target_id
                && existing.match_method == record.match_method
            {
                return Ok(existing.clone());
            }
        }

        let (id, created_at) = match existing {
            Some(existing) => (existing.id, existing.created_at),
            None => (uuid::Uuid::new_v4().to_string(), Utc::now()),
        };
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO image_records ({IMAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                id,
                record.user_id,
                record.target_id,
                record.job_id,
                record.storage_key,
                record.original_filename,
                record.match_method.as_str(),
                record.ra,
                record.dec,
                record.exposure_time,
                record.total_integration_time,
                record.filter_name,
                record.capture_date.map(|d| d.to_rfc3339()),
                metadata,
                created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CatalogError::Database(e.to_string()))?;

        Ok(ImageRecord {
            id,
            user_id: record.user_id,
            target_id: record.target_id,
            job_id: record.job_id,
            storage_key: record.storage_key,
            original_filename: record.original_filename,
            match_method: record.match_method,
            ra: record.ra,
            dec: record.dec,
            exposure_time: record.exposure_time,
            total_integration_time: record.total_integration_time,
            filter_name: record.filter_name,
            capture_date: record.capture_date,
            metadata: record.metadata,
            created_at,
        })
    }

    fn get_image_record(&self, id: &str) -> Result<Option<ImageRecord>, CatalogError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {IMAGE_COLUMNS} FROM image_records WHERE id = ?1"),
            params![id],
            row_to_image_record,
        )
        .optional()
        .map_err(|e| CatalogError::Database(e.to_string()))
    }

    fn add_to_wishlist(&self, user_id: &str, target_id: &str) -> Result<(), CatalogError> {
        let conn = self.lock()?;
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM targets WHERE id = ?1",
                params![target_id],
                |row| row.get(0),
            )
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        if !exists {
            return Err(CatalogError::NotFound(format!("target {target_id}")));
        }

        conn.execute(
            "INSERT INTO user_targets (user_id, target_id, status, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, target_id) DO NOTHING",
            params![
                user_id,
                target_id,
                WishlistStatus::Wanted.as_str(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| CatalogError::Database(e.to_string()))?;
        Ok(())
    }

    fn wishlist_status(
        &self,
        user_id: &str,
        target_id: &str,
    ) -> Result<Option<WishlistStatus>, CatalogError> {
        let conn = self.lock()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM user_targets WHERE user_id = ?1 AND target_id = ?2",
                params![user_id, target_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        Ok(status.as_deref().and_then(WishlistStatus::parse))
    }

    fn mark_target_captured(&self, user_id: &str, target_id: &str) -> Result<bool, CatalogError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE user_targets SET status = ?1, updated_at = ?2
                 WHERE user_id = ?3 AND target_id = ?4 AND status != ?1",
                params![
                    WishlistStatus::Captured.as_str(),
                    Utc::now().to_rfc3339(),
                    user_id,
                    target_id
                ],
            )
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        Ok(updated > 0)
    }
}
