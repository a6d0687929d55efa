use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::warn;

use crate::database::schema::SCHEMA;
use crate::error::{MotionError, MotionResult};
use crate::pose::analyzer::ReferenceStore;
use crate::pose::keypoint::{Keypoint, KeypointFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingKind {
    Sample,
    Trial,
}

impl RecordingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Trial => "trial",
        }
    }
}

impl FromStr for RecordingKind {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sample" => Ok(Self::Sample),
            "trial" => Ok(Self::Trial),
            other => Err(MotionError::config(format!("unknown recording kind '{other}'"))),
        }
    }
}

impl fmt::Display for RecordingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingInfo {
    pub tag: String,
    pub kind: RecordingKind,
    pub source_path: String,
    pub source_sha256: String,
    pub interval_secs: f64,
    pub frame_count: usize,
}

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Buffers keypoint frames of one recording and writes them in batches.
///
/// The whole recording is one transaction: the previous recording under the same tag
/// stays visible until [`KeypointWriter::finish`] commits, and a writer dropped before
/// that rolls everything back.
pub struct KeypointWriter {
    conn: Connection,
    recording_id: i64,
    buffer: Vec<KeypointFrame>,
    buffer_limit: usize,
    written: usize,
    pending: bool,
}

impl KeypointWriter {
    /// Starts a recording that replaces any stored recording with the same tag once finished.
    pub fn begin(path: &Path, recording: &RecordingInfo) -> Result<Self> {
        let conn = open_connection(path).context("Failed to open keypoint database")?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .context("Failed to begin transaction")?;

        let mut writer = Self {
            conn,
            recording_id: 0,
            buffer: Vec::new(),
            buffer_limit: 256,
            written: 0,
            pending: true,
        };

        writer
            .conn
            .execute("DELETE FROM recordings WHERE tag = ?1", params![recording.tag])
            .context("Failed to replace previous recording")?;
        writer
            .conn
            .execute(
                "INSERT INTO recordings (tag, kind, source_path, source_sha256, interval_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    recording.tag,
                    recording.kind.as_str(),
                    recording.source_path,
                    recording.source_sha256,
                    recording.interval_secs
                ],
            )
            .context("Failed to insert recording")?;
        writer.recording_id = writer.conn.last_insert_rowid();

        Ok(writer)
    }

    pub fn add(&mut self, frame: KeypointFrame) -> Result<()> {
        self.buffer.push(frame);
        if self.buffer.len() >= self.buffer_limit {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        {
            let mut stmt_frame = self.conn.prepare_cached(
                "INSERT OR REPLACE INTO keypoint_frames (recording_id, frame_number, keypoints)
                 VALUES (?1, ?2, ?3)",
            )?;

            for frame in &self.buffer {
                let keypoints = serde_json::to_string(&frame.keypoints)
                    .context("Failed to serialize keypoints")?;
                stmt_frame
                    .execute(params![self.recording_id, frame.frame_number as i64, keypoints])
                    .with_context(|| format!("Failed to insert frame {}", frame.frame_number))?;
            }
        }

        self.written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    /// Flushes the remaining frames, commits the recording, and returns how many frames were written.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        self.conn
            .execute(
                "UPDATE recordings SET frame_count =
                    (SELECT COUNT(*) FROM keypoint_frames WHERE recording_id = ?1)
                 WHERE id = ?1",
                params![self.recording_id],
            )
            .context("Failed to update frame count")?;
        self.conn
            .execute_batch("COMMIT")
            .context("Failed to commit recording")?;
        self.pending = false;
        Ok(self.written)
    }
}

impl Drop for KeypointWriter {
    fn drop(&mut self) {
        if self.pending {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back unfinished recording: {}", e);
            }
        }
    }
}

/// Read side of the keypoint database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> MotionResult<Self> {
        Ok(Self {
            conn: open_connection(path)?,
        })
    }

    pub fn recording(&self, tag: &str) -> MotionResult<Option<RecordingInfo>> {
        let row = self
            .conn
            .query_row(
                "SELECT tag, kind, source_path, source_sha256, interval_secs, frame_count
                 FROM recordings WHERE tag = ?1",
                params![tag],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((tag, kind, source_path, source_sha256, interval_secs, frame_count)) = row else {
            return Ok(None);
        };
        Ok(Some(RecordingInfo {
            tag,
            kind: kind.parse()?,
            source_path,
            source_sha256,
            interval_secs,
            frame_count: frame_count as usize,
        }))
    }

    pub fn list_recordings(&self) -> MotionResult<Vec<RecordingInfo>> {
        let mut stmt = self.conn.prepare("SELECT tag FROM recordings ORDER BY tag")?;
        let tags = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut recordings = Vec::with_capacity(tags.len());
        for tag in tags {
            if let Some(info) = self.recording(&tag)? {
                recordings.push(info);
            }
        }
        Ok(recordings)
    }
}

impl ReferenceStore for SqliteStore {
    fn get_keypoints(&self, tag: &str) -> MotionResult<Vec<KeypointFrame>> {
        let recording_id: i64 = self
            .conn
            .query_row("SELECT id FROM recordings WHERE tag = ?1", params![tag], |row| row.get(0))
            .optional()?
            .ok_or_else(|| MotionError::sample_not_found(tag))?;

        let mut stmt = self.conn.prepare(
            "SELECT frame_number, keypoints FROM keypoint_frames
             WHERE recording_id = ?1 ORDER BY frame_number",
        )?;
        let rows = stmt
            .query_map(params![recording_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(frame_number, json)| -> MotionResult<_> {
                let keypoints: Vec<Keypoint> = serde_json::from_str(&json)?;
                Ok(KeypointFrame::new(frame_number as usize, keypoints))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_db(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("motion-diff-{}-{}.db", name, std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    fn info(tag: &str, kind: RecordingKind) -> RecordingInfo {
        RecordingInfo {
            tag: tag.to_string(),
            kind,
            source_path: format!("videos/{tag}.mp4"),
            source_sha256: "ab".repeat(32),
            interval_secs: 0.5,
            frame_count: 0,
        }
    }

    fn frame(n: usize) -> KeypointFrame {
        KeypointFrame::new(n, vec![Keypoint::new(0.1 * n as f32, 0.5, 0.9); 3])
    }

    #[test]
    fn test_write_and_read_recording() -> Result<()> {
        let path = scratch_db("roundtrip");

        let mut writer = KeypointWriter::begin(&path, &info("routine", RecordingKind::Sample))?;
        // Out of order on purpose: workers finish frames in any order.
        for n in [2, 0, 1] {
            writer.add(frame(n))?;
        }
        assert_eq!(writer.finish()?, 3);

        let store = SqliteStore::open(&path)?;
        let frames = store.get_keypoints("routine")?;
        let numbers: Vec<usize> = frames.iter().map(|f| f.frame_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(frames[2], frame(2));

        let recorded = store.recording("routine")?.expect("recording row");
        assert_eq!(recorded.kind, RecordingKind::Sample);
        assert_eq!(recorded.frame_count, 3);

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_flushes_when_buffer_limit_reached() -> Result<()> {
        let path = scratch_db("buffer");

        let mut writer = KeypointWriter::begin(&path, &info("long", RecordingKind::Trial))?;
        writer.buffer_limit = 2;
        for n in 0..5 {
            writer.add(frame(n))?;
        }
        assert_eq!(writer.written, 4);
        assert_eq!(writer.finish()?, 5);

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_reextracting_a_tag_replaces_frames() -> Result<()> {
        let path = scratch_db("replace");

        let mut writer = KeypointWriter::begin(&path, &info("take", RecordingKind::Trial))?;
        for n in 0..4 {
            writer.add(frame(n))?;
        }
        writer.finish()?;

        let mut writer = KeypointWriter::begin(&path, &info("take", RecordingKind::Trial))?;
        writer.add(frame(0))?;
        writer.finish()?;

        let store = SqliteStore::open(&path)?;
        assert_eq!(store.get_keypoints("take")?.len(), 1);
        assert_eq!(store.list_recordings()?.len(), 1);

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_unfinished_rewrite_keeps_previous_recording() -> Result<()> {
        let path = scratch_db("rollback");

        let mut writer = KeypointWriter::begin(&path, &info("routine", RecordingKind::Sample))?;
        for n in 0..3 {
            writer.add(frame(n))?;
        }
        writer.finish()?;

        let mut writer = KeypointWriter::begin(&path, &info("routine", RecordingKind::Sample))?;
        writer.buffer_limit = 1;
        writer.add(frame(7))?;
        drop(writer);

        let store = SqliteStore::open(&path)?;
        let numbers: Vec<usize> = store.get_keypoints("routine")?.iter().map(|f| f.frame_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(store.recording("routine")?.map(|r| r.frame_count), Some(3));

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_unknown_tag_is_not_found() -> Result<()> {
        let path = scratch_db("missing");
        let store = SqliteStore::open(&path)?;

        let err = store.get_keypoints("nobody").unwrap_err();
        assert!(err.is_not_found());
        assert!(store.recording("nobody")?.is_none());

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_recording_without_frames_is_empty_not_missing() -> Result<()> {
        let path = scratch_db("empty");
        KeypointWriter::begin(&path, &info("blank", RecordingKind::Trial))?.finish()?;

        let store = SqliteStore::open(&path)?;
        assert!(store.get_keypoints("blank")?.is_empty());

        fs::remove_file(path)?;
        Ok(())
    }
}
