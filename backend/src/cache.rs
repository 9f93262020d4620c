use std::{fs, path::Path, time::UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use log::debug;
use rusqlite::{Connection, OptionalExtension};
use serde::{Serialize, de::DeserializeOwned};

use crate::{camera::CameraMovement, detect::RawDetection};

const DETECTIONS: &str = "detections";
const CAMERA_MOVEMENTS: &str = "camera_movements";

/// Identifies an input video by its canonical path, byte length and modification time.
///
/// Editing or replacing the file changes its identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoIdentity {
    path: String,
    length: u64,
    modified: u128,
}

impl VideoIdentity {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path)
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        let metadata = fs::metadata(&canonical)?;
        let modified = metadata.modified()?.duration_since(UNIX_EPOCH)?.as_nanos();

        Ok(Self {
            path: canonical.to_string_lossy().into_owned(),
            length: metadata.len(),
            modified,
        })
    }

    fn key(&self) -> String {
        format!("{}:{}:{}", self.path, self.length, self.modified)
    }
}

/// SQLite store of per-video detections and camera movements.
#[derive(Debug)]
pub struct DetectionCache {
    conn: Connection,
}

impl DetectionCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cache {}", path.display()))?;
        conn.execute_batch(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {DETECTIONS} (
                    video TEXT PRIMARY KEY,
                    data TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS {CAMERA_MOVEMENTS} (
                    video TEXT PRIMARY KEY,
                    data TEXT NOT NULL
                );
                "#
            )
            .as_str(),
        )?;

        Ok(Self { conn })
    }

    pub fn detections(&self, video: &VideoIdentity) -> Result<Option<Vec<Vec<RawDetection>>>> {
        self.query_from_table(DETECTIONS, video)
    }

    pub fn upsert_detections(
        &self,
        video: &VideoIdentity,
        detections: &[Vec<RawDetection>],
    ) -> Result<()> {
        self.upsert_to_table(DETECTIONS, video, detections)
    }

    pub fn camera_movements(&self, video: &VideoIdentity) -> Result<Option<Vec<CameraMovement>>> {
        self.query_from_table(CAMERA_MOVEMENTS, video)
    }

    pub fn upsert_camera_movements(
        &self,
        video: &VideoIdentity,
        movements: &[CameraMovement],
    ) -> Result<()> {
        self.upsert_to_table(CAMERA_MOVEMENTS, video, movements)
    }

    fn query_from_table<T>(&self, table: &str, video: &VideoIdentity) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let stmt = format!("SELECT data FROM {table} WHERE video = ?1;");
        let json = self
            .conn
            .query_row(&stmt, [video.key()], |row| row.get::<_, String>(0))
            .optional()?;
        let Some(json) = json else {
            debug!(target: "cache", "no {table} cached for {}", video.path);
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn upsert_to_table<T>(&self, table: &str, video: &VideoIdentity, data: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(data)?;
        let stmt = format!(
            "INSERT INTO {table} (video, data) VALUES (?1, ?2) ON CONFLICT (video) DO UPDATE SET data = ?2;",
        );
        if self.conn.execute(&stmt, (video.key(), &json))? > 0 {
            Ok(())
        } else {
            bail!("no row was upserted")
        }
    }
}
