pub const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS recordings (
        id INTEGER PRIMARY KEY,
        tag TEXT UNIQUE NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('sample', 'trial')),
        source_path TEXT NOT NULL,
        source_sha256 TEXT NOT NULL,
        interval_secs REAL NOT NULL,
        frame_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS keypoint_frames (
        recording_id INTEGER NOT NULL,
        frame_number INTEGER NOT NULL,
        keypoints TEXT NOT NULL,
        FOREIGN KEY(recording_id) REFERENCES recordings(id) ON DELETE CASCADE,
        PRIMARY KEY(recording_id, frame_number)
    );
";
