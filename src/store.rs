//! Read-only access to relay session logs.
//!
//! The relay writes one `.plog` file per session: a run of
//! `[u32 little-endian length][bincode record]` frames, append-only. We
//! only ever read. A corrupt tail loses the frames behind it, not the
//! session.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::filter::StorePredicate;
use crate::model::{Direction, PacketRecord, SessionSummary, Value};

/// Frames longer than this are treated as corruption, not data.
const MAX_FRAME_BYTES: u32 = 10 * 1024 * 1024;
const SESSION_EXT: &str = "plog";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session log {path} contains no readable packets")]
    Empty { path: PathBuf },

    #[error("failed to decode first record of {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

/// On-disk frame payload, exactly as the relay serializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub packet_number: u64,
    pub timestamp_ms: i64,
    pub direction: Direction,
    pub protocol_version: Option<String>,
    pub name: Option<String>,
    pub value: Value,
    pub raw: Option<Vec<u8>>,
}

/// Handle on a directory of session logs.
#[derive(Debug, Clone)]
pub struct PacketStore {
    dir: PathBuf,
}

impl PacketStore {
    pub fn open(dir: impl Into<PathBuf>) -> PacketStore {
        PacketStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Discovers session logs under the store directory, newest first.
    /// Files that cannot be summarized are skipped with a warning so one
    /// bad log never hides the rest.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_EXT) {
                continue;
            }
            match summarize_file(&path) {
                Ok(summary) => sessions.push(summary),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session log"),
            }
        }
        sessions.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms));
        debug!(dir = %self.dir.display(), sessions = sessions.len(), "session scan complete");
        Ok(sessions)
    }

    /// Loads a session's packets, ordered by packet number ascending. The
    /// predicate, when present, is applied against each record's stored
    /// direction and name during the scan. Time offsets are measured from
    /// the first record of the file, before any filtering.
    pub fn query_packets(
        &self,
        session: &SessionSummary,
        predicate: Option<&StorePredicate>,
    ) -> Result<Vec<PacketRecord>, StoreError> {
        let frames = read_frames(&session.path)?;
        let total = frames.len();
        let start_ms = frames.first().map_or(0, |r| r.timestamp_ms);

        let mut packets: Vec<PacketRecord> = frames
            .into_iter()
            .filter(|frame| {
                predicate.map_or(true, |p| p.matches(frame.direction, frame.name.as_deref()))
            })
            .map(|frame| PacketRecord {
                packet_number: frame.packet_number,
                timestamp_ms: frame.timestamp_ms,
                offset_ms: frame.timestamp_ms - start_ms,
                direction: frame.direction,
                name: frame.name,
                value: frame.value,
                raw: frame.raw,
            })
            .collect();
        packets.sort_by_key(|p| p.packet_number);

        debug!(
            session = %session.id,
            total,
            matched = packets.len(),
            "query complete"
        );
        Ok(packets)
    }
}

/// Walks the frames of one log file. Stops at the first bad length prefix,
/// short frame, or undecodable record, keeping everything read so far; a
/// file that yields nothing at all is an error.
fn read_frames(path: &Path) -> Result<Vec<StoredRecord>, StoreError> {
    let data = fs::read(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut records = Vec::new();
    let mut first_decode_error = None;
    let mut pos = 0usize;

    while pos + 4 <= data.len() {
        let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        if len == 0 || len > MAX_FRAME_BYTES {
            warn!(path = %path.display(), offset = pos, len, "bad frame length, stopping scan");
            break;
        }
        let start = pos + 4;
        let end = start + len as usize;
        if end > data.len() {
            warn!(path = %path.display(), offset = pos, len, "frame runs past end of file, stopping scan");
            break;
        }
        match bincode::deserialize::<StoredRecord>(&data[start..end]) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(path = %path.display(), offset = pos, error = %e, "undecodable frame, stopping scan");
                first_decode_error = Some(e);
                break;
            }
        }
        pos = end;
    }

    if records.is_empty() {
        return Err(match first_decode_error {
            Some(source) => StoreError::Decode {
                path: path.to_path_buf(),
                source,
            },
            None => StoreError::Empty {
                path: path.to_path_buf(),
            },
        });
    }
    Ok(records)
}

/// Cheap per-file summary: counts frames by walking length prefixes and
/// decodes only the first record for the start time and version.
fn summarize_file(path: &Path) -> Result<SessionSummary, StoreError> {
    let data = fs::read(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut first: Option<StoredRecord> = None;
    let mut count = 0usize;
    let mut pos = 0usize;

    while pos + 4 <= data.len() {
        let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        if len == 0 || len > MAX_FRAME_BYTES {
            break;
        }
        let start = pos + 4;
        let end = start + len as usize;
        if end > data.len() {
            break;
        }
        if first.is_none() {
            match bincode::deserialize::<StoredRecord>(&data[start..end]) {
                Ok(record) => first = Some(record),
                Err(e) => {
                    return Err(StoreError::Decode {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
            }
        }
        count += 1;
        pos = end;
    }

    let Some(first) = first else {
        return Err(StoreError::Empty {
            path: path.to_path_buf(),
        });
    };

    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session")
        .to_string();
    Ok(SessionSummary {
        id,
        path: path.to_path_buf(),
        packet_count: count,
        started_at_ms: first.timestamp_ms,
        protocol_version: first.protocol_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSet;
    use serde_json::json;
    use std::io::Write;

    fn stored(
        packet_number: u64,
        timestamp_ms: i64,
        direction: Direction,
        name: Option<&str>,
        payload: serde_json::Value,
    ) -> StoredRecord {
        StoredRecord {
            packet_number,
            timestamp_ms,
            direction,
            protocol_version: Some("9.9.9".to_string()),
            name: name.map(str::to_string),
            value: Value::from_json(&payload),
            raw: Some(vec![0x01, 0x02]),
        }
    }

    fn write_log(path: &Path, records: &[StoredRecord]) {
        let mut file = fs::File::create(path).unwrap();
        for record in records {
            let body = bincode::serialize(record).unwrap();
            file.write_all(&(body.len() as u32).to_le_bytes()).unwrap();
            file.write_all(&body).unwrap();
        }
    }

    fn sample_records() -> Vec<StoredRecord> {
        vec![
            stored(1, 1_000, Direction::Serverbound, Some("login"), json!({"user": "steve"})),
            stored(2, 1_050, Direction::Clientbound, Some("play_status"), json!({"status": 0})),
            stored(3, 1_200, Direction::Clientbound, Some("start_game"), json!({"seed": 42})),
            stored(4, 2_000, Direction::Serverbound, Some("player_auth_input"), json!({"x": 1.0})),
            stored(5, 2_500, Direction::Clientbound, None, json!({"blob": [1, 2]})),
        ]
    }

    #[test]
    fn lists_sessions_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        write_log(&dir.path().join("session-a.plog"), &sample_records());
        let newer: Vec<StoredRecord> = sample_records()
            .into_iter()
            .map(|mut r| {
                r.timestamp_ms += 100_000;
                r
            })
            .collect();
        write_log(&dir.path().join("session-b.plog"), &newer);
        // Unrelated files are ignored.
        fs::write(dir.path().join("notes.txt"), "not a log").unwrap();

        let store = PacketStore::open(dir.path());
        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "session-b");
        assert_eq!(sessions[1].id, "session-a");
        assert_eq!(sessions[0].packet_count, 5);
        assert_eq!(sessions[0].protocol_version.as_deref(), Some("9.9.9"));
        assert_eq!(sessions[1].started_at_ms, 1_000);
    }

    #[test]
    fn query_orders_by_packet_number_and_computes_offsets() {
        let dir = tempfile::tempdir().unwrap();
        // Written out of order on purpose.
        let mut records = sample_records();
        records.swap(0, 3);
        write_log(&dir.path().join("s.plog"), &records);

        let store = PacketStore::open(dir.path());
        let session = &store.list_sessions().unwrap()[0];
        let packets = store.query_packets(session, None).unwrap();

        let numbers: Vec<u64> = packets.iter().map(|p| p.packet_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        // Offsets are measured from the file's first frame (number 4 here).
        assert_eq!(packets[0].offset_ms, 1_000 - 2_000);
        assert_eq!(packets[3].offset_ms, 0);
    }

    #[test]
    fn predicate_is_applied_during_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_log(&dir.path().join("s.plog"), &sample_records());
        let store = PacketStore::open(dir.path());
        let session = &store.list_sessions().unwrap()[0];

        let predicate = FilterSet::parse("s").compile();
        let packets = store.query_packets(session, Some(&predicate)).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.direction == Direction::Serverbound));

        let predicate = FilterSet::parse("c.*game*").compile();
        let packets = store.query_packets(session, Some(&predicate)).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name.as_deref(), Some("start_game"));

        // The unnamed record only passes name-less clauses.
        let predicate = FilterSet::parse("c").compile();
        let packets = store.query_packets(session, Some(&predicate)).unwrap();
        assert_eq!(packets.len(), 3);

        let predicate = FilterSet::parse("a.*").compile();
        let packets = store.query_packets(session, Some(&predicate)).unwrap();
        assert_eq!(packets.len(), 4);

        // Filtering everything out is an empty result, not an error.
        let predicate = FilterSet::parse("s.does_not_exist").compile();
        let packets = store.query_packets(session, Some(&predicate)).unwrap();
        assert!(packets.is_empty());
    }

    #[test]
    fn corrupt_tail_keeps_leading_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.plog");
        write_log(&path, &sample_records());
        // Append a frame whose declared length runs past end of file.
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&1_000u32.to_le_bytes()).unwrap();
        file.write_all(&[0xab; 16]).unwrap();
        drop(file);

        let store = PacketStore::open(dir.path());
        let session = &store.list_sessions().unwrap()[0];
        assert_eq!(session.packet_count, 5);
        let packets = store.query_packets(session, None).unwrap();
        assert_eq!(packets.len(), 5);
    }

    #[test]
    fn oversized_length_prefix_stops_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.plog");
        write_log(&path, &sample_records()[..2]);
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&(MAX_FRAME_BYTES + 1).to_le_bytes()).unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        drop(file);

        let packets = read_frames(&path).unwrap();
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.plog");
        fs::write(&path, []).unwrap();
        assert!(matches!(
            read_frames(&path),
            Err(StoreError::Empty { .. })
        ));

        // And such a file never shows up in the session list.
        let store = PacketStore::open(dir.path());
        assert!(store.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn garbage_first_frame_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.plog");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&8u32.to_le_bytes()).unwrap();
        file.write_all(&[0xff; 8]).unwrap();
        drop(file);

        assert!(matches!(
            read_frames(&path),
            Err(StoreError::Decode { .. })
        ));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let store = PacketStore::open("/definitely/not/a/real/dir");
        assert!(matches!(
            store.list_sessions(),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn stored_record_round_trips_through_bincode() {
        let record = stored(
            9,
            123_456,
            Direction::Clientbound,
            Some("set_time"),
            json!({ "time": 6000, "nested": { "a": [1, 2, 3] } }),
        );
        let bytes = bincode::serialize(&record).unwrap();
        let back: StoredRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.packet_number, record.packet_number);
        assert_eq!(back.name, record.name);
        assert_eq!(back.value, record.value);
        assert_eq!(back.raw, record.raw);
    }
}
