//! Per-tick snapshot history and its persisted binary form.
//!
//! The tick loop captures a [`TickSnapshot`] after every step and keeps them
//! in a [`SnapshotHistory`] keyed by tick. Re-simulating a tick overwrites
//! its entry; entries older than the rollback window or the last confirmed
//! tick are pruned.
//!
//! # Persisted Format
//!
//! [`encode_history`] writes a bincode (serde mode, standard config)
//! document holding a format version, the priority-ordered schema of the
//! registry that produced it, and every retained frame with its per-entity
//! `(type, offset, len)` records and raw bytes. [`decode_history`] refuses
//! documents whose schema differs from the running registry, because type
//! tags and byte layouts would not line up.
//!
//! Component and resource payloads are native-endian `bytemuck` copies. The
//! document records the byte order of the machine that wrote it, and
//! decoding on a machine with the other byte order fails with
//! [`SnapshotError::ByteOrderMismatch`].
//!
//! ```
//! use rewind_engine::prelude::*;
//!
//! let mut tick_loop = TickLoop::new(World::new(), EngineConfig::default()).unwrap();
//! tick_loop.run_ticks(5);
//!
//! let bytes = encode_history(tick_loop.history(), tick_loop.world().snapshot_registry()).unwrap();
//! let history = decode_history(&bytes, tick_loop.world().snapshot_registry()).unwrap();
//! assert_eq!(history.newest().map(|s| s.tick), Some(5));
//! ```

use std::collections::BTreeMap;

use rewind_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Current persisted format version.
pub const HISTORY_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to encode snapshot history: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode snapshot history: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("snapshot history has format version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("snapshot schema does not match the running registry: {detail}")]
    SchemaMismatch { detail: String },

    #[error("snapshot history was written {found}-endian, this machine is {expected}-endian")]
    ByteOrderMismatch {
        found: &'static str,
        expected: &'static str,
    },

    #[error("{trailing} trailing bytes after snapshot history")]
    TrailingBytes { trailing: usize },

    #[error(transparent)]
    Restore(#[from] EcsError),
}

// ---------------------------------------------------------------------------
// TickSnapshot
// ---------------------------------------------------------------------------

/// World image captured at the end of `tick`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub tick: u64,
    pub image: WorldImage,
    /// Determinism hash of `image` (BLAKE3, hex).
    pub hash: String,
}

impl TickSnapshot {
    pub fn capture(world: &World, tick: u64) -> Self {
        let image = world.capture_image();
        let hash = image.state_hash(world.snapshot_registry());
        Self { tick, image, hash }
    }
}

// ---------------------------------------------------------------------------
// SnapshotHistory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotHistory {
    frames: BTreeMap<u64, TickSnapshot>,
}

/// Compact per-frame listing for debug dumps.
#[derive(Debug, Serialize)]
struct FrameSummary<'a> {
    tick: u64,
    entities: usize,
    bytes: usize,
    hash: &'a str,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot`, replacing any existing frame for the same tick.
    pub fn insert(&mut self, snapshot: TickSnapshot) -> Option<TickSnapshot> {
        self.frames.insert(snapshot.tick, snapshot)
    }

    pub fn get(&self, tick: u64) -> Option<&TickSnapshot> {
        self.frames.get(&tick)
    }

    pub fn contains(&self, tick: u64) -> bool {
        self.frames.contains_key(&tick)
    }

    /// Drop every frame older than `tick`. Returns how many were removed.
    pub fn prune_before(&mut self, tick: u64) -> usize {
        let kept = self.frames.split_off(&tick);
        let removed = self.frames.len();
        self.frames = kept;
        removed
    }

    /// Drop every frame newer than `tick`.
    pub fn truncate_after(&mut self, tick: u64) -> usize {
        let newer = self.frames.split_off(&tick.saturating_add(1));
        newer.len()
    }

    pub fn ticks(&self) -> impl Iterator<Item = u64> + '_ {
        self.frames.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickSnapshot> {
        self.frames.values()
    }

    pub fn oldest(&self) -> Option<&TickSnapshot> {
        self.frames.values().next()
    }

    pub fn newest(&self) -> Option<&TickSnapshot> {
        self.frames.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// JSON listing of `(tick, entities, bytes, hash)` per frame.
    pub fn summary_json(&self) -> Result<String, serde_json::Error> {
        let rows: Vec<FrameSummary<'_>> = self
            .frames
            .values()
            .map(|s| FrameSummary {
                tick: s.tick,
                entities: s.image.entities.len(),
                bytes: s.image.byte_len(),
                hash: &s.hash,
            })
            .collect();
        serde_json::to_string_pretty(&rows)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct PersistedHistory {
    version: u32,
    little_endian: bool,
    schema: Vec<SchemaEntry>,
    frames: Vec<TickSnapshot>,
}

/// Encode `history` together with the schema of `registry`.
pub fn encode_history(
    history: &SnapshotHistory,
    registry: &SnapshotRegistry,
) -> Result<Vec<u8>, SnapshotError> {
    let doc = PersistedHistory {
        version: HISTORY_FORMAT_VERSION,
        little_endian: NATIVE_LITTLE_ENDIAN,
        schema: registry.schema(),
        frames: history.frames.values().cloned().collect(),
    };
    Ok(bincode::serde::encode_to_vec(&doc, bincode::config::standard())?)
}

/// Decode a history written by [`encode_history`], checking it against the
/// running `registry`.
pub fn decode_history(
    bytes: &[u8],
    registry: &SnapshotRegistry,
) -> Result<SnapshotHistory, SnapshotError> {
    let (doc, read): (PersistedHistory, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if read != bytes.len() {
        return Err(SnapshotError::TrailingBytes {
            trailing: bytes.len() - read,
        });
    }
    if doc.version != HISTORY_FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch {
            found: doc.version,
            expected: HISTORY_FORMAT_VERSION,
        });
    }
    if doc.little_endian != NATIVE_LITTLE_ENDIAN {
        return Err(SnapshotError::ByteOrderMismatch {
            found: byte_order_name(doc.little_endian),
            expected: byte_order_name(NATIVE_LITTLE_ENDIAN),
        });
    }
    check_schema(&doc.schema, &registry.schema())?;

    let mut history = SnapshotHistory::new();
    for frame in doc.frames {
        history.insert(frame);
    }
    Ok(history)
}

const NATIVE_LITTLE_ENDIAN: bool = cfg!(target_endian = "little");

fn byte_order_name(little_endian: bool) -> &'static str {
    if little_endian {
        "little"
    } else {
        "big"
    }
}

fn check_schema(found: &[SchemaEntry], running: &[SchemaEntry]) -> Result<(), SnapshotError> {
    if found.len() != running.len() {
        return Err(SnapshotError::SchemaMismatch {
            detail: format!("{} types persisted, {} registered", found.len(), running.len()),
        });
    }
    for (persisted, current) in found.iter().zip(running) {
        if persisted != current {
            return Err(SnapshotError::SchemaMismatch {
                detail: format!(
                    "persisted `{}` ({} bytes, priority {}) vs registered `{}` ({} bytes, priority {})",
                    persisted.name,
                    persisted.size,
                    persisted.priority,
                    current.name,
                    current.size,
                    current.priority
                ),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{register_engine_types, Movement, Transform};

    fn world() -> World {
        let mut world = World::new();
        register_engine_types(&mut world).unwrap();
        world
    }

    fn history_with(world: &mut World, ticks: std::ops::RangeInclusive<u64>) -> SnapshotHistory {
        let e = world.spawn();
        world.insert(e, Transform::default()).unwrap();
        world.insert(e, Movement::new(FxVec3::X)).unwrap();
        let mut history = SnapshotHistory::new();
        for tick in ticks {
            world.get_mut::<Transform>(e).unwrap().position += FxVec3::X;
            history.insert(TickSnapshot::capture(world, tick));
        }
        history
    }

    #[test]
    fn prune_and_truncate_bound_the_window() {
        let mut w = world();
        let mut history = history_with(&mut w, 1..=10);
        assert_eq!(history.prune_before(4), 3);
        assert_eq!(history.oldest().unwrap().tick, 4);
        assert_eq!(history.truncate_after(8), 2);
        assert_eq!(history.ticks().collect::<Vec<_>>(), vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn reinserting_a_tick_overwrites_it() {
        let mut w = world();
        let mut history = history_with(&mut w, 1..=3);
        let old = history.get(2).unwrap().hash.clone();
        let replaced = history.insert(TickSnapshot::capture(&w, 2)).unwrap();
        assert_eq!(replaced.hash, old);
        assert_ne!(history.get(2).unwrap().hash, old);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn snapshot_hash_matches_world_hash() {
        let mut w = world();
        let history = history_with(&mut w, 1..=1);
        assert_eq!(history.get(1).unwrap().hash, w.state_hash());
    }

    #[test]
    fn persisted_history_round_trips_against_the_same_schema() {
        let mut w = world();
        let history = history_with(&mut w, 1..=4);
        let bytes = encode_history(&history, w.snapshot_registry()).unwrap();
        let decoded = decode_history(&bytes, w.snapshot_registry()).unwrap();
        assert_eq!(decoded, history);

        let summary = history.summary_json().unwrap();
        assert!(summary.contains("\"tick\": 4"));
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let mut w = world();
        let history = history_with(&mut w, 1..=2);
        let bytes = encode_history(&history, w.snapshot_registry()).unwrap();

        #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct Extra(u32);
        impl Snapshotable for Extra {}

        let mut other = world();
        other.register_snapshotable::<Extra>("extra").unwrap();
        let err = decode_history(&bytes, other.snapshot_registry()).unwrap_err();
        assert!(matches!(err, SnapshotError::SchemaMismatch { .. }), "got {err:?}");
    }

    fn encode_doc(doc: &PersistedHistory) -> Vec<u8> {
        bincode::serde::encode_to_vec(doc, bincode::config::standard()).unwrap()
    }

    #[test]
    fn future_format_version_is_rejected() {
        let mut w = world();
        let history = history_with(&mut w, 1..=2);
        let doc = PersistedHistory {
            version: HISTORY_FORMAT_VERSION + 1,
            little_endian: NATIVE_LITTLE_ENDIAN,
            schema: w.snapshot_registry().schema(),
            frames: history.iter().cloned().collect(),
        };
        let err = decode_history(&encode_doc(&doc), w.snapshot_registry()).unwrap_err();
        assert!(
            matches!(err, SnapshotError::VersionMismatch { found, expected }
                if found == HISTORY_FORMAT_VERSION + 1 && expected == HISTORY_FORMAT_VERSION),
            "got {err:?}"
        );
    }

    #[test]
    fn foreign_byte_order_is_rejected() {
        let mut w = world();
        let history = history_with(&mut w, 1..=2);
        let doc = PersistedHistory {
            version: HISTORY_FORMAT_VERSION,
            little_endian: !NATIVE_LITTLE_ENDIAN,
            schema: w.snapshot_registry().schema(),
            frames: history.iter().cloned().collect(),
        };
        let err = decode_history(&encode_doc(&doc), w.snapshot_registry()).unwrap_err();
        assert!(matches!(err, SnapshotError::ByteOrderMismatch { .. }), "got {err:?}");
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut w = world();
        let history = history_with(&mut w, 1..=2);
        let mut bytes = encode_history(&history, w.snapshot_registry()).unwrap();
        bytes.push(0);
        let err = decode_history(&bytes, w.snapshot_registry()).unwrap_err();
        assert!(matches!(err, SnapshotError::TrailingBytes { trailing: 1 }), "got {err:?}");
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let w = world();
        let err = decode_history(&[0xff, 0xff, 0xff], w.snapshot_registry()).unwrap_err();
        assert!(matches!(err, SnapshotError::Decode(_)), "got {err:?}");
    }
}
