//! Shared-state serializers.
//!
//! A room announces its serializer by id in the join confirmation. The
//! `"schema"` serializer keeps a typed state tree in sync with the server:
//!
//! 1. [`Serializer::handshake`] reads the server's [`Reflection`] (field
//!    table) and attaches a decoder to the state tree.
//! 2. [`Serializer::set_state`] replaces the tree contents from a full
//!    snapshot.
//! 3. [`Serializer::patch`] applies incremental operations in place.
//!
//! Patches are applied strictly in the order they are handed in. A patch
//! that fails to decode leaves the tree untouched, but the session must be
//! treated as desynchronized: nothing here can repair a missed patch.
//!
//! The `"none"` serializer accepts and ignores all state frames.
//!
//! # Reflection format
//!
//! `var_string root_name`, `uleb field_count`, then per field:
//! `u8 index`, `var_string name`, `u8 kind` (`0` int, `1` float, `2` string,
//! `3` bool, `4` bytes, `5` map followed by the value kind byte).
//!
//! # Patch format
//!
//! A sequence of operations, each `u8 field_index`, `u8 op` and an
//! op-specific body: `0` set value, `1` delete, `2` map set key value,
//! `3` map delete key, `4` clear map.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::bytes::{BytesReader, BytesWriter};
use crate::error::{DecodeError, NetError, Result};

pub const SCHEMA_SERIALIZER: &str = "schema";
pub const NONE_SERIALIZER: &str = "none";

const KIND_INT: u8 = 0;
const KIND_FLOAT: u8 = 1;
const KIND_STR: u8 = 2;
const KIND_BOOL: u8 = 3;
const KIND_BYTES: u8 = 4;
const KIND_MAP: u8 = 5;

const OP_SET: u8 = 0;
const OP_DELETE: u8 = 1;
const OP_MAP_SET: u8 = 2;
const OP_MAP_DELETE: u8 = 3;
const OP_CLEAR: u8 = 4;

// ── Schema ──────────────────────────────────────────────────────────

/// Scalar field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Float,
    Str,
    Bool,
    Bytes,
}

impl ScalarKind {
    fn tag(self) -> u8 {
        match self {
            Self::Int => KIND_INT,
            Self::Float => KIND_FLOAT,
            Self::Str => KIND_STR,
            Self::Bool => KIND_BOOL,
            Self::Bytes => KIND_BYTES,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            KIND_INT => Some(Self::Int),
            KIND_FLOAT => Some(Self::Float),
            KIND_STR => Some(Self::Str),
            KIND_BOOL => Some(Self::Bool),
            KIND_BYTES => Some(Self::Bytes),
            _ => None,
        }
    }
}

/// Kind of a root field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    /// String-keyed map of scalars.
    Map(ScalarKind),
}

/// One entry of the server's field table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub index: u8,
    pub name: String,
    pub kind: FieldKind,
}

/// Structural description of the root state, sent by the server during the
/// handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    pub root: String,
    pub fields: Vec<FieldDef>,
}

impl Reflection {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BytesWriter::new();
        w.push_var_string(&self.root);
        w.push_uleb(self.fields.len() as u64);
        for field in &self.fields {
            w.push_byte(field.index);
            w.push_var_string(&field.name);
            match field.kind {
                FieldKind::Scalar(kind) => w.push_byte(kind.tag()),
                FieldKind::Map(kind) => {
                    w.push_byte(KIND_MAP);
                    w.push_byte(kind.tag());
                }
            }
        }
        w.finalize()
    }

    /// # Errors
    ///
    /// Returns a [`DecodeError`] for truncated input, unknown kinds, or
    /// duplicate field indexes/names.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut r = BytesReader::new(bytes);
        let root = r.read_var_string()?;
        let count = r.read_uleb()?;
        let mut fields = Vec::new();
        let mut indexes = HashSet::new();
        let mut names = HashSet::new();
        for _ in 0..count {
            let index = r.read_byte()?;
            let name = r.read_var_string()?;
            let tag = r.read_byte()?;
            let kind = if tag == KIND_MAP {
                let value_tag = r.read_byte()?;
                FieldKind::Map(ScalarKind::from_tag(value_tag).ok_or_else(|| {
                    DecodeError::Malformed(format!("invalid map value kind {value_tag}"))
                })?)
            } else {
                FieldKind::Scalar(ScalarKind::from_tag(tag).ok_or_else(|| {
                    DecodeError::Malformed(format!("invalid field kind {tag}"))
                })?)
            };
            if !indexes.insert(index) || !names.insert(name.clone()) {
                return Err(DecodeError::Malformed(format!(
                    "duplicate field {index}:{name}"
                )));
            }
            fields.push(FieldDef { index, name, kind });
        }
        if !r.is_empty() {
            return Err(DecodeError::Malformed("trailing bytes after reflection".into()));
        }
        Ok(Self { root, fields })
    }
}

// ── State values ────────────────────────────────────────────────────

/// A value in the state tree.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Float(n) => Value::from(*n),
            Self::Str(s) => Value::from(s.as_str()),
            Self::Bool(b) => Value::from(*b),
            Self::Bytes(b) => Value::from(b.clone()),
            Self::Map(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Self::Int(_) => Some(ScalarKind::Int),
            Self::Float(_) => Some(ScalarKind::Float),
            Self::Str(_) => Some(ScalarKind::Str),
            Self::Bool(_) => Some(ScalarKind::Bool),
            Self::Bytes(_) => Some(ScalarKind::Bytes),
            Self::Map(_) => None,
        }
    }

    fn encode_scalar(&self, w: &mut BytesWriter) {
        match self {
            Self::Int(n) => w.push_zigzag(*n),
            Self::Float(n) => w.push_f64(*n),
            Self::Str(s) => w.push_var_string(s),
            Self::Bool(b) => w.push_byte(u8::from(*b)),
            Self::Bytes(b) => w.push_var_bytes(b),
            Self::Map(_) => {}
        }
    }

    fn decode_scalar(
        kind: ScalarKind,
        r: &mut BytesReader<'_>,
    ) -> std::result::Result<Self, DecodeError> {
        Ok(match kind {
            ScalarKind::Int => Self::Int(r.read_zigzag()?),
            ScalarKind::Float => Self::Float(r.read_f64()?),
            ScalarKind::Str => Self::Str(r.read_var_string()?),
            ScalarKind::Bool => match r.read_byte()? {
                0 => Self::Bool(false),
                1 => Self::Bool(true),
                other => {
                    return Err(DecodeError::Malformed(format!("invalid bool byte {other}")))
                }
            },
            ScalarKind::Bytes => Self::Bytes(r.read_var_bytes()?.to_vec()),
        })
    }
}

/// One observed mutation of the state tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Root field name.
    pub field: String,
    /// Map key, for map operations.
    pub key: Option<String>,
    pub previous: Option<StateValue>,
    /// New value; `None` for deletions.
    pub value: Option<StateValue>,
}

// ── State tree ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StateTree {
    fields: BTreeMap<String, StateValue>,
    schema: Option<Arc<Reflection>>,
    attached: bool,
}

/// Read-only handle to a room's state tree.
///
/// Clones share the same tree. A reconnecting room reuses the handle, so
/// references held by the application stay valid across sessions.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<RwLock<StateTree>>,
}

impl StateHandle {
    fn read(&self) -> RwLockReadGuard<'_, StateTree> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StateTree> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current value of a root field.
    pub fn get(&self, field: &str) -> Option<StateValue> {
        self.read().fields.get(field).cloned()
    }

    /// Current value of `key` inside a map field.
    pub fn get_entry(&self, field: &str, key: &str) -> Option<StateValue> {
        self.read()
            .fields
            .get(field)
            .and_then(StateValue::as_map)
            .and_then(|m| m.get(key))
            .cloned()
    }

    /// Copy of all root fields.
    pub fn fields(&self) -> BTreeMap<String, StateValue> {
        self.read().fields.clone()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.read()
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Schema of the last handshake applied to this tree.
    pub fn schema(&self) -> Option<Arc<Reflection>> {
        self.read().schema.clone()
    }

    /// Whether a live decoder is attached to this tree.
    pub fn is_attached(&self) -> bool {
        self.read().attached
    }

    /// Whether both handles refer to the same tree.
    pub fn ptr_eq(&self, other: &StateHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ── Patch encoding ──────────────────────────────────────────────────

/// Encodes state operations in the format the schema serializer applies.
///
/// The server side of the protocol produces the same bytes; the builder is
/// used by tests and local tooling.
#[derive(Debug, Default)]
pub struct PatchBuilder {
    w: BytesWriter,
}

impl PatchBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, index: u8, value: &StateValue) -> Self {
        self.w.push_byte(index);
        self.w.push_byte(OP_SET);
        value.encode_scalar(&mut self.w);
        self
    }

    #[must_use]
    pub fn delete(mut self, index: u8) -> Self {
        self.w.push_byte(index);
        self.w.push_byte(OP_DELETE);
        self
    }

    #[must_use]
    pub fn map_set(mut self, index: u8, key: &str, value: &StateValue) -> Self {
        self.w.push_byte(index);
        self.w.push_byte(OP_MAP_SET);
        self.w.push_var_string(key);
        value.encode_scalar(&mut self.w);
        self
    }

    #[must_use]
    pub fn map_delete(mut self, index: u8, key: &str) -> Self {
        self.w.push_byte(index);
        self.w.push_byte(OP_MAP_DELETE);
        self.w.push_var_string(key);
        self
    }

    #[must_use]
    pub fn clear(mut self, index: u8) -> Self {
        self.w.push_byte(index);
        self.w.push_byte(OP_CLEAR);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.w.finalize()
    }
}

// ── Serializer trait and registry ───────────────────────────────────

/// Applies server state frames to a local state tree.
pub trait Serializer: Send {
    /// Registry id announced by the server.
    fn id(&self) -> &'static str;

    /// Initialize (or, for a reused tree, validate) the structural schema.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Decode`] for malformed reflection bytes and
    /// [`NetError::SchemaMismatch`] if a reused tree has a different schema.
    fn handshake(&mut self, bytes: &[u8]) -> Result<()>;

    /// Replace the tree contents from a full snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::NotInitialized`] before [`handshake`](Self::handshake)
    /// and [`NetError::Decode`] for malformed snapshots.
    fn set_state(&mut self, bytes: &[u8]) -> Result<Vec<Change>>;

    /// Apply an incremental patch in place.
    ///
    /// # Errors
    ///
    /// Same as [`set_state`](Self::set_state).
    fn patch(&mut self, bytes: &[u8]) -> Result<Vec<Change>>;

    /// Handle to the state tree, once one exists.
    fn state(&self) -> Option<StateHandle>;

    /// Release the decoder and detach it from the tree.
    fn teardown(&mut self);
}

/// Build the serializer registered under `id`.
///
/// `existing` is the state tree of a previous session of the same room; the
/// schema serializer attaches to it instead of creating a new tree.
///
/// # Errors
///
/// Returns [`NetError::UnknownSerializer`] for unregistered ids.
pub fn serializer_for(id: &str, existing: Option<StateHandle>) -> Result<Box<dyn Serializer>> {
    match id {
        SCHEMA_SERIALIZER => Ok(Box::new(match existing {
            Some(state) => SchemaSerializer::with_state(state),
            None => SchemaSerializer::new(),
        })),
        NONE_SERIALIZER => Ok(Box::new(NoneSerializer)),
        other => Err(NetError::UnknownSerializer(other.to_owned())),
    }
}

// ── Schema serializer ───────────────────────────────────────────────

#[derive(Debug)]
struct Decoder {
    schema: Arc<Reflection>,
    by_index: HashMap<u8, FieldDef>,
}

impl Decoder {
    fn new(schema: Arc<Reflection>) -> Self {
        let by_index = schema
            .fields
            .iter()
            .map(|f| (f.index, f.clone()))
            .collect();
        Self { schema, by_index }
    }

    fn field(&self, index: u8) -> std::result::Result<&FieldDef, DecodeError> {
        self.by_index
            .get(&index)
            .ok_or_else(|| DecodeError::Malformed(format!("unknown field index {index}")))
    }

    fn decode_ops(&self, bytes: &[u8]) -> std::result::Result<Vec<Op>, DecodeError> {
        let mut r = BytesReader::new(bytes);
        let mut ops = Vec::new();
        while !r.is_empty() {
            let field = self.field(r.read_byte()?)?;
            let op = r.read_byte()?;
            let name = field.name.clone();
            ops.push(match (op, field.kind) {
                (OP_SET, FieldKind::Scalar(kind)) => Op::Set {
                    field: name,
                    value: StateValue::decode_scalar(kind, &mut r)?,
                },
                (OP_DELETE, _) => Op::Delete { field: name },
                (OP_MAP_SET, FieldKind::Map(kind)) => Op::MapSet {
                    field: name,
                    key: r.read_var_string()?,
                    value: StateValue::decode_scalar(kind, &mut r)?,
                },
                (OP_MAP_DELETE, FieldKind::Map(_)) => Op::MapDelete {
                    field: name,
                    key: r.read_var_string()?,
                },
                (OP_CLEAR, FieldKind::Map(_)) => Op::Clear { field: name },
                (op, kind) => {
                    return Err(DecodeError::Malformed(format!(
                        "operation {op} not valid for {} ({kind:?})",
                        field.name
                    )))
                }
            });
        }
        Ok(ops)
    }
}

#[derive(Debug)]
enum Op {
    Set { field: String, value: StateValue },
    Delete { field: String },
    MapSet { field: String, key: String, value: StateValue },
    MapDelete { field: String, key: String },
    Clear { field: String },
}

fn apply_ops(fields: &mut BTreeMap<String, StateValue>, ops: Vec<Op>) -> Vec<Change> {
    let mut changes = Vec::with_capacity(ops.len());
    for op in ops {
        match op {
            Op::Set { field, value } => {
                let previous = fields.insert(field.clone(), value.clone());
                changes.push(Change {
                    field,
                    key: None,
                    previous,
                    value: Some(value),
                });
            }
            Op::Delete { field } => {
                if let Some(previous) = fields.remove(&field) {
                    changes.push(Change {
                        field,
                        key: None,
                        previous: Some(previous),
                        value: None,
                    });
                }
            }
            Op::MapSet { field, key, value } => {
                let entry = fields
                    .entry(field.clone())
                    .or_insert_with(|| StateValue::Map(BTreeMap::new()));
                if let StateValue::Map(map) = entry {
                    let previous = map.insert(key.clone(), value.clone());
                    changes.push(Change {
                        field,
                        key: Some(key),
                        previous,
                        value: Some(value),
                    });
                }
            }
            Op::MapDelete { field, key } => {
                if let Some(StateValue::Map(map)) = fields.get_mut(&field) {
                    if let Some(previous) = map.remove(&key) {
                        changes.push(Change {
                            field,
                            key: Some(key),
                            previous: Some(previous),
                            value: None,
                        });
                    }
                }
            }
            Op::Clear { field } => {
                if let Some(StateValue::Map(map)) = fields.get_mut(&field) {
                    for (key, previous) in std::mem::take(map) {
                        changes.push(Change {
                            field: field.clone(),
                            key: Some(key),
                            previous: Some(previous),
                            value: None,
                        });
                    }
                }
            }
        }
    }
    changes
}

/// Serializer for schema-described state.
#[derive(Debug, Default)]
pub struct SchemaSerializer {
    state: Option<StateHandle>,
    decoder: Option<Decoder>,
}

impl SchemaSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the tree of a previous session instead of creating one.
    pub fn with_state(state: StateHandle) -> Self {
        Self {
            state: Some(state),
            decoder: None,
        }
    }

    fn decoder(&self) -> Result<(&Decoder, &StateHandle)> {
        match (&self.decoder, &self.state) {
            (Some(decoder), Some(state)) => Ok((decoder, state)),
            _ => Err(NetError::NotInitialized("schema serializer")),
        }
    }
}

impl Serializer for SchemaSerializer {
    fn id(&self) -> &'static str {
        SCHEMA_SERIALIZER
    }

    fn handshake(&mut self, bytes: &[u8]) -> Result<()> {
        let reflection = Arc::new(Reflection::decode(bytes)?);
        let state = self.state.get_or_insert_with(StateHandle::default);
        {
            let mut tree = state.write();
            if let Some(existing) = &tree.schema {
                if **existing != *reflection {
                    return Err(NetError::SchemaMismatch(format!(
                        "server root {} no longer matches local {}",
                        reflection.root, existing.root
                    )));
                }
            }
            tree.schema = Some(Arc::clone(&reflection));
            tree.attached = true;
        }
        debug!(
            root = %reflection.root,
            fields = reflection.fields.len(),
            "schema handshake applied"
        );
        self.decoder = Some(Decoder::new(reflection));
        Ok(())
    }

    fn set_state(&mut self, bytes: &[u8]) -> Result<Vec<Change>> {
        let (decoder, state) = self.decoder()?;
        let ops = decoder.decode_ops(bytes)?;
        let mut tree = state.write();
        let previous = std::mem::take(&mut tree.fields);
        let mut changes = apply_ops(&mut tree.fields, ops);
        for change in &mut changes {
            if change.key.is_none() {
                change.previous = previous.get(&change.field).cloned();
            }
        }
        for (field, value) in previous {
            if !tree.fields.contains_key(&field) {
                changes.push(Change {
                    field,
                    key: None,
                    previous: Some(value),
                    value: None,
                });
            }
        }
        Ok(changes)
    }

    fn patch(&mut self, bytes: &[u8]) -> Result<Vec<Change>> {
        let (decoder, state) = self.decoder()?;
        let ops = decoder.decode_ops(bytes)?;
        let mut tree = state.write();
        Ok(apply_ops(&mut tree.fields, ops))
    }

    fn state(&self) -> Option<StateHandle> {
        self.state.clone()
    }

    fn teardown(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            debug!(root = %decoder.schema.root, "schema decoder released");
        }
        if let Some(state) = &self.state {
            state.write().attached = false;
        }
    }
}

// ── None serializer ─────────────────────────────────────────────────

/// Serializer for rooms without synchronized state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneSerializer;

impl Serializer for NoneSerializer {
    fn id(&self) -> &'static str {
        NONE_SERIALIZER
    }

    fn handshake(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn set_state(&mut self, _bytes: &[u8]) -> Result<Vec<Change>> {
        Ok(Vec::new())
    }

    fn patch(&mut self, _bytes: &[u8]) -> Result<Vec<Change>> {
        Ok(Vec::new())
    }

    fn state(&self) -> Option<StateHandle> {
        None
    }

    fn teardown(&mut self) {}
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn player_schema() -> Reflection {
        Reflection {
            root: "PlayerState".into(),
            fields: vec![
                FieldDef {
                    index: 0,
                    name: "name".into(),
                    kind: FieldKind::Scalar(ScalarKind::Str),
                },
                FieldDef {
                    index: 1,
                    name: "level".into(),
                    kind: FieldKind::Scalar(ScalarKind::Int),
                },
                FieldDef {
                    index: 2,
                    name: "items".into(),
                    kind: FieldKind::Map(ScalarKind::Int),
                },
            ],
        }
    }

    fn ready_serializer() -> SchemaSerializer {
        let mut s = SchemaSerializer::new();
        s.handshake(&player_schema().encode()).unwrap();
        s
    }

    fn name(v: &str) -> StateValue {
        StateValue::Str(v.into())
    }

    #[test]
    fn reflection_round_trips_and_rejects_duplicates() {
        let schema = player_schema();
        assert_eq!(Reflection::decode(&schema.encode()).unwrap(), schema);

        let mut dup = player_schema();
        dup.fields[1].index = 0;
        assert!(matches!(
            Reflection::decode(&dup.encode()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn patch_before_handshake_is_not_initialized() {
        let mut s = SchemaSerializer::new();
        let patch = PatchBuilder::new().set(0, &name("a")).finish();
        assert!(matches!(
            s.patch(&patch),
            Err(NetError::NotInitialized(_))
        ));
        assert!(matches!(
            s.set_state(&patch),
            Err(NetError::NotInitialized(_))
        ));
    }

    #[test]
    fn patches_apply_in_the_order_given() {
        let p1 = PatchBuilder::new().set(0, &name("first")).finish();
        let p2 = PatchBuilder::new().set(0, &name("second")).finish();
        let p3 = PatchBuilder::new().set(1, &StateValue::Int(3)).finish();

        let mut in_order = ready_serializer();
        for p in [&p1, &p2, &p3] {
            in_order.patch(p).unwrap();
        }
        let mut swapped = ready_serializer();
        for p in [&p2, &p1, &p3] {
            swapped.patch(p).unwrap();
        }

        let a = in_order.state().unwrap();
        let b = swapped.state().unwrap();
        assert_eq!(a.get("name"), Some(name("second")));
        assert_eq!(b.get("name"), Some(name("first")));
        assert_ne!(a.fields(), b.fields());
        assert_eq!(a.get("level"), b.get("level"));
    }

    #[test]
    fn map_operations_report_changes() {
        let mut s = ready_serializer();
        let changes = s
            .patch(
                &PatchBuilder::new()
                    .map_set(2, "hint", &StateValue::Int(2))
                    .map_set(2, "coin", &StateValue::Int(10))
                    .map_delete(2, "hint")
                    .finish(),
            )
            .unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[2].previous, Some(StateValue::Int(2)));
        let state = s.state().unwrap();
        assert_eq!(state.get_entry("items", "coin"), Some(StateValue::Int(10)));
        assert_eq!(state.get_entry("items", "hint"), None);

        let cleared = s.patch(&PatchBuilder::new().clear(2).finish()).unwrap();
        assert_eq!(cleared.len(), 1);
        assert_eq!(state.to_json(), serde_json::json!({ "items": {} }));
    }

    #[test]
    fn invalid_patch_leaves_state_untouched() {
        let mut s = ready_serializer();
        s.patch(&PatchBuilder::new().set(0, &name("kept")).finish())
            .unwrap();
        let mut bad = PatchBuilder::new().set(1, &StateValue::Int(9)).finish();
        bad.extend_from_slice(&[42, OP_SET]);
        assert!(matches!(s.patch(&bad), Err(NetError::Decode(_))));
        let state = s.state().unwrap();
        assert_eq!(state.get("level"), None);
        assert_eq!(state.get("name"), Some(name("kept")));
    }

    #[test]
    fn snapshot_replaces_contents_and_reports_removals() {
        let mut s = ready_serializer();
        s.patch(
            &PatchBuilder::new()
                .set(0, &name("old"))
                .set(1, &StateValue::Int(1))
                .finish(),
        )
        .unwrap();
        let changes = s
            .set_state(&PatchBuilder::new().set(0, &name("new")).finish())
            .unwrap();
        let state = s.state().unwrap();
        assert_eq!(state.get("name"), Some(name("new")));
        assert_eq!(state.get("level"), None);
        assert_eq!(changes[0].previous, Some(name("old")));
        assert!(changes
            .iter()
            .any(|c| c.field == "level" && c.value.is_none()));
    }

    #[test]
    fn reused_tree_keeps_identity_and_validates_schema() {
        let mut first = ready_serializer();
        first
            .patch(&PatchBuilder::new().set(0, &name("alice")).finish())
            .unwrap();
        let held = first.state().unwrap();
        first.teardown();
        assert!(!held.is_attached());

        let mut second = serializer_for(SCHEMA_SERIALIZER, Some(held.clone())).unwrap();
        second.handshake(&player_schema().encode()).unwrap();
        assert!(held.is_attached());
        assert!(second.state().unwrap().ptr_eq(&held));
        assert_eq!(held.get("name"), Some(name("alice")));

        let mut changed = player_schema();
        changed.root = "Other".into();
        let mut third = SchemaSerializer::with_state(held);
        assert!(matches!(
            third.handshake(&changed.encode()),
            Err(NetError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn registry_knows_schema_and_none() {
        assert_eq!(serializer_for("schema", None).unwrap().id(), "schema");
        let mut none = serializer_for("none", None).unwrap();
        assert!(none.patch(&[1, 2, 3]).unwrap().is_empty());
        assert!(none.state().is_none());
        assert!(matches!(
            serializer_for("fossil-delta", None),
            Err(NetError::UnknownSerializer(_))
        ));
    }
}
