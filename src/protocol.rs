//! Versioned protocol definitions and raw packet identification.
//!
//! Definition files live under the protocol directory as
//! `proto-<version>.toml`, one `[clientbound]` and one `[serverbound]`
//! table each, `name = id`. The registry is built once and never mutated,
//! so a shared reference is safe everywhere.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::model::Direction;

/// Widest accepted packet id encoding. Five bytes cover the 32 usable bits.
const MAX_VARINT_BYTES: usize = 5;

#[derive(Debug, Error)]
pub enum DefinitionLoadError {
    /// No definition file exists for the requested version.
    #[error("no protocol definition for version {0}")]
    MissingVersion(String),

    #[error("failed to read definition file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid definition file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Failure to pull a packet id out of raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ended in the middle of the id varint.
    #[error("packet truncated inside the id varint")]
    Truncated,

    /// The id varint ran past the widest encoding we accept.
    #[error("packet id varint exceeds {MAX_VARINT_BYTES} bytes")]
    Overflow,
}

#[derive(Debug, Default)]
struct DirectionTable {
    by_id: BTreeMap<u32, String>,
    by_name: BTreeMap<String, u32>,
}

impl DirectionTable {
    fn insert(&mut self, id: u32, name: &str) {
        self.by_id.insert(id, name.to_string());
        self.by_name.insert(name.to_string(), id);
    }
}

/// Bidirectional id<->name tables for one protocol version.
#[derive(Debug)]
pub struct ProtocolRegistry {
    version: String,
    clientbound: DirectionTable,
    serverbound: DirectionTable,
}

impl ProtocolRegistry {
    /// Loads `proto-<version>.toml` from `dir`. Entries that are not an
    /// integer id in u32 range are skipped with a warning; a missing or
    /// unparseable file fails, and the caller keeps running without names.
    pub fn load(dir: &Path, version: &str) -> Result<ProtocolRegistry, DefinitionLoadError> {
        let path = dir.join(format!("proto-{version}.toml"));
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DefinitionLoadError::MissingVersion(version.to_string()));
            }
            Err(e) => {
                return Err(DefinitionLoadError::Io {
                    path,
                    source: e,
                });
            }
        };
        let doc: toml::Value = text.parse().map_err(|e| DefinitionLoadError::Parse {
            path: path.clone(),
            source: e,
        })?;

        let registry = ProtocolRegistry {
            version: version.to_string(),
            clientbound: read_direction_table(&doc, "clientbound"),
            serverbound: read_direction_table(&doc, "serverbound"),
        };
        info!(
            version,
            clientbound = registry.clientbound.by_id.len(),
            serverbound = registry.serverbound.by_id.len(),
            "loaded protocol definitions"
        );
        Ok(registry)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Total number of packet definitions across both directions.
    pub fn packet_count(&self) -> usize {
        self.clientbound.by_id.len() + self.serverbound.by_id.len()
    }

    pub fn name_of(&self, direction: Direction, id: u32) -> Option<&str> {
        self.table(direction).by_id.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, direction: Direction, name: &str) -> Option<u32> {
        self.table(direction).by_name.get(name).copied()
    }

    fn table(&self, direction: Direction) -> &DirectionTable {
        match direction {
            Direction::Clientbound => &self.clientbound,
            Direction::Serverbound => &self.serverbound,
        }
    }
}

fn read_direction_table(doc: &toml::Value, section: &str) -> DirectionTable {
    let mut table = DirectionTable::default();
    let Some(entries) = doc.get(section).and_then(toml::Value::as_table) else {
        warn!(section, "definition file has no such table");
        return table;
    };
    for (name, raw_id) in entries {
        match raw_id.as_integer() {
            Some(id) if (0..=u32::MAX as i64).contains(&id) => {
                table.insert(id as u32, name);
            }
            _ => {
                warn!(section, name, "skipping definition entry with bad id");
            }
        }
    }
    table
}

/// Reads the little-endian base-128 id varint from the front of a packet.
/// Each byte contributes its low 7 bits, least-significant group first;
/// the high bit marks continuation. Returns the id and bytes consumed.
pub fn extract_packet_id(raw: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut id: u32 = 0;
    let mut shift = 0u32;
    for (i, byte) in raw.iter().take(MAX_VARINT_BYTES).enumerate() {
        id |= ((byte & 0x7f) as u32) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((id, i + 1));
        }
    }
    if raw.len() >= MAX_VARINT_BYTES {
        Err(DecodeError::Overflow)
    } else {
        Err(DecodeError::Truncated)
    }
}

/// What we can say about a raw packet without decoding its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIdentity {
    pub id: u32,
    pub name: Option<String>,
}

/// Extracts the id and resolves it against the registry, when one is
/// loaded. A missing name is not an error; the caller shows the id alone.
pub fn identify(
    raw: &[u8],
    direction: Direction,
    registry: Option<&ProtocolRegistry>,
) -> Result<PacketIdentity, DecodeError> {
    let (id, _consumed) = extract_packet_id(raw)?;
    let name = registry
        .and_then(|r| r.name_of(direction, id))
        .map(str::to_owned);
    Ok(PacketIdentity { id, name })
}
