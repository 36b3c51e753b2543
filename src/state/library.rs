use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use super::data::{
    DetectionRecord, Photograph, PhotographSummary, PhotographWithDetections, Stats,
    TileDetection,
};
use crate::error::Result;

/// The Database manages the SQLite record store.
/// It stores retained photographs and the bird detections logged against them.
///
/// Each value owns one connection; dropping it closes the connection, so
/// scope a `Database` to the session or request that needs it.
pub struct Database {
    conn: Connection,
    db_path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and initialize the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let database = Database {
            conn,
            db_path: db_path.to_path_buf(),
        };
        database.init_schema()?;

        tracing::debug!(path = %db_path.display(), "Database opened");
        Ok(database)
    }

    /// Initialize the database schema.
    /// Creates all necessary tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS photographs (
                photograph_id   INTEGER PRIMARY KEY AUTOINCREMENT,
                captured_at     TEXT NOT NULL,
                image_path      TEXT NOT NULL,
                keep_all        INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        // Detections reference their photograph; tile_index is not unique by schema
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS detections (
                detection_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                photograph_id   INTEGER NOT NULL,
                tile_index      INTEGER NOT NULL,
                confidence      REAL NOT NULL,
                FOREIGN KEY(photograph_id) REFERENCES photographs(photograph_id)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_photographs_captured_at
             ON photographs(captured_at DESC)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_detections_photograph_id
             ON detections(photograph_id)",
            [],
        )?;

        Ok(())
    }

    /// Insert a photograph and return its new id
    pub fn log_photograph(
        &self,
        captured_at: NaiveDateTime,
        image_path: &str,
        keep_all: bool,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO photographs (captured_at, image_path, keep_all) VALUES (?1, ?2, ?3)",
            params![captured_at, image_path, keep_all],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a detection against an existing photograph id
    pub fn log_detection(
        &self,
        photograph_id: i64,
        tile_index: u32,
        confidence: f32,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO detections (photograph_id, tile_index, confidence) VALUES (?1, ?2, ?3)",
            params![photograph_id, tile_index, confidence as f64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Log a photograph and all its detections in one transaction.
    ///
    /// Either every row commits or none do.
    pub fn record_session(
        &self,
        captured_at: NaiveDateTime,
        image_path: &str,
        keep_all: bool,
        detections: &[TileDetection],
    ) -> Result<i64> {
        // Rolled back on drop unless committed
        let tx = self.conn.unchecked_transaction()?;
        let photograph_id = self.log_photograph(captured_at, image_path, keep_all)?;
        for detection in detections {
            self.log_detection(photograph_id, detection.tile_index, detection.confidence)?;
        }
        tx.commit()?;
        Ok(photograph_id)
    }

    /// Most recent photographs first, with their detection counts
    pub fn get_recent_photographs(&self, limit: u32) -> Result<Vec<PhotographSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.photograph_id, p.captured_at, p.image_path, p.keep_all,
                    COUNT(d.detection_id)
             FROM photographs p
             LEFT JOIN detections d ON d.photograph_id = p.photograph_id
             GROUP BY p.photograph_id
             ORDER BY p.captured_at DESC, p.photograph_id DESC
             LIMIT ?1",
        )?;

        let summaries = stmt
            .query_map([limit], |row| {
                Ok(PhotographSummary {
                    photograph_id: row.get(0)?,
                    captured_at: row.get(1)?,
                    image_path: row.get(2)?,
                    keep_all: row.get(3)?,
                    detection_count: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(summaries)
    }

    /// A photograph and its detections ordered by tile index, or `None` if the id is unknown
    pub fn get_photograph(&self, photograph_id: i64) -> Result<Option<PhotographWithDetections>> {
        let photograph = self
            .conn
            .query_row(
                "SELECT photograph_id, captured_at, image_path, keep_all
                 FROM photographs WHERE photograph_id = ?1",
                [photograph_id],
                photograph_from_row,
            )
            .optional()?;

        let Some(photograph) = photograph else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT detection_id, photograph_id, tile_index, confidence
             FROM detections
             WHERE photograph_id = ?1
             ORDER BY tile_index, detection_id",
        )?;
        let detections = stmt
            .query_map([photograph_id], |row| {
                Ok(DetectionRecord {
                    id: row.get(0)?,
                    photograph_id: row.get(1)?,
                    tile_index: row.get(2)?,
                    confidence: row.get::<_, f64>(3)? as f32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(PhotographWithDetections {
            photograph,
            detections,
        }))
    }

    /// Total counts of photographs and detections
    pub fn get_stats(&self) -> Result<Stats> {
        let stats = self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM photographs), (SELECT COUNT(*) FROM detections)",
            [],
            |row| {
                Ok(Stats {
                    total_photographs: row.get(0)?,
                    total_detections: row.get(1)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Ids of photographs whose image file is missing from `images_dir`
    pub fn missing_images(&self, images_dir: &Path) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT photograph_id, image_path FROM photographs ORDER BY photograph_id")?;

        let rows: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let missing: Vec<i64> = rows
            .into_iter()
            .filter(|(_, image_path)| !images_dir.join(image_path).exists())
            .map(|(id, _)| id)
            .collect();

        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), "Photographs with missing image files");
        }

        Ok(missing)
    }
}

fn photograph_from_row(row: &Row<'_>) -> rusqlite::Result<Photograph> {
    Ok(Photograph {
        id: row.get(0)?,
        captured_at: row.get(1)?,
        image_path: row.get(2)?,
        keep_all: row.get(3)?,
    })
}

// Implement Debug for better error messages
impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_path", &self.db_path)
            .finish()
    }
}
