//! Message metadata registry.
//!
//! Every application message is registered once at process bootstrap with a
//! nonzero 16-bit-friendly id, a full name (`package.Type`) and a codec. The
//! registry is the runtime's single dynamic-typing point: messages travel as
//! [`MessageBox`] values and the encode/decode/debug entry points stored in a
//! [`MessageMeta`] are monomorphized from the concrete type at registration,
//! so no reflection happens after bootstrap.
//!
//! The three indices (id, full name, type) are updated under one write lock
//! and agree with each other for every registered meta. Lookups take the read
//! path only; after bootstrap the tables are effectively immutable.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{self, CodecKind};
use crate::error::{CodecError, RegistryError, Result};

/// A type-erased, heap-allocated message value.
pub type MessageBox = Box<dyn Any + Send + Sync>;

/// Bound required of every registrable message type.
pub trait Message: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {}

pub(crate) type EncodeFn = fn(&(dyn Any + Send + Sync)) -> std::result::Result<Vec<u8>, CodecError>;
pub(crate) type DecodeFn = fn(&[u8]) -> std::result::Result<MessageBox, CodecError>;
type DebugFn = fn(&(dyn Any + Send + Sync)) -> String;

type ContextValue = Box<dyn Any + Send + Sync>;

// ----------------------------------------------------------------------------
// MessageMeta
// ----------------------------------------------------------------------------

/// Metadata binding one message type to its id, name and codec.
pub struct MessageMeta {
    id: u32,
    full_name: String,
    type_id: TypeId,
    type_name: &'static str,
    codec: CodecKind,
    encode_fn: EncodeFn,
    decode_fn: DecodeFn,
    debug_fn: DebugFn,
    ctx: RwLock<HashMap<String, ContextValue>>,
}

impl MessageMeta {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Full name in `package.Type` form, unique process-wide.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Short type name without the package part.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    /// Encodes a value of this meta's type into bytes.
    pub fn encode(&self, msg: &(dyn Any + Send + Sync)) -> std::result::Result<Vec<u8>, CodecError> {
        (self.encode_fn)(msg)
    }

    /// Decodes bytes into a fresh owned value of this meta's type. The input
    /// bytes are never mutated.
    pub fn decode(&self, data: &[u8]) -> std::result::Result<MessageBox, CodecError> {
        (self.decode_fn)(data)
    }

    /// Debug rendering of a value of this meta's type, used by message logs.
    pub fn debug_message(&self, msg: &(dyn Any + Send + Sync)) -> String {
        (self.debug_fn)(msg)
    }

    /// Binds an opaque context value to this meta under `name`.
    pub fn set_context(&self, name: &str, value: impl Any + Send + Sync) -> &Self {
        self.ctx
            .write()
            .unwrap()
            .insert(name.to_string(), Box::new(value));
        self
    }

    /// Fetches a context value as a string, falling back to `default`.
    pub fn context_as_str(&self, name: &str, default: &str) -> String {
        let ctx = self.ctx.read().unwrap();
        ctx.get(name)
            .and_then(|v| v.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| default.to_string())
    }

    /// Fetches a context value as an i64, falling back to `default`.
    pub fn context_as_i64(&self, name: &str, default: i64) -> i64 {
        let ctx = self.ctx.read().unwrap();
        ctx.get(name)
            .and_then(|v| v.downcast_ref::<i64>().copied())
            .unwrap_or(default)
    }
}

impl fmt::Debug for MessageMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageMeta")
            .field("id", &self.id)
            .field("full_name", &self.full_name)
            .field("codec", &self.codec.name())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Registry {
    by_id: HashMap<u32, &'static MessageMeta>,
    by_name: HashMap<String, &'static MessageMeta>,
    by_type: HashMap<TypeId, &'static MessageMeta>,
}

static REGISTRY: LazyLock<RwLock<Registry>> = LazyLock::new(|| RwLock::new(Registry::default()));

/// Registers `M` under `full_name` with the given id and codec.
///
/// Ids must be nonzero; id, full name and type must each be unique across the
/// process. Violations are registration-time program bugs and panic, matching
/// the fatal-at-bootstrap contract.
pub fn register_message<M: Message>(
    full_name: &str,
    id: u32,
    codec: CodecKind,
) -> &'static MessageMeta {
    match try_register_message::<M>(full_name, id, codec) {
        Ok(meta) => meta,
        Err(err) => panic!("message registration failed: {err}"),
    }
}

/// Fallible form of [`register_message`], useful in tests.
pub fn try_register_message<M: Message>(
    full_name: &str,
    id: u32,
    codec: CodecKind,
) -> std::result::Result<&'static MessageMeta, RegistryError> {
    let type_name = short_type_name::<M>();

    if id == 0 {
        return Err(RegistryError::ZeroId { type_name });
    }

    let (encode_fn, decode_fn) = codec::codec_fns_for::<M>(codec);

    let meta: &'static MessageMeta = Box::leak(Box::new(MessageMeta {
        id,
        full_name: full_name.to_string(),
        type_id: TypeId::of::<M>(),
        type_name,
        codec,
        encode_fn,
        decode_fn,
        debug_fn: debug_message::<M>,
        ctx: RwLock::new(HashMap::new()),
    }));

    let mut reg = REGISTRY.write().unwrap();

    if reg.by_type.contains_key(&meta.type_id) {
        return Err(RegistryError::DuplicateType { type_name });
    }
    if reg.by_name.contains_key(full_name) {
        return Err(RegistryError::DuplicateName {
            full_name: full_name.to_string(),
        });
    }
    if let Some(prev) = reg.by_id.get(&id) {
        return Err(RegistryError::DuplicateId {
            id,
            type_name,
            previous: prev.type_name,
        });
    }

    reg.by_type.insert(meta.type_id, meta);
    reg.by_name.insert(full_name.to_string(), meta);
    reg.by_id.insert(id, meta);

    Ok(meta)
}

/// Looks up a meta by message id.
pub fn meta_by_id(id: u32) -> Option<&'static MessageMeta> {
    REGISTRY.read().unwrap().by_id.get(&id).copied()
}

/// Looks up a meta by full name.
pub fn meta_by_full_name(full_name: &str) -> Option<&'static MessageMeta> {
    REGISTRY.read().unwrap().by_name.get(full_name).copied()
}

/// Looks up a meta by concrete type.
pub fn meta_by_type(type_id: TypeId) -> Option<&'static MessageMeta> {
    REGISTRY.read().unwrap().by_type.get(&type_id).copied()
}

/// Looks up the meta of a boxed or borrowed message value.
pub fn meta_by_msg(msg: &(dyn Any + Send + Sync)) -> Option<&'static MessageMeta> {
    meta_by_type(msg.type_id())
}

/// Visits every meta whose full name matches `name_rule` (a regex), stopping
/// early when the callback returns false.
pub fn visit_metas(
    name_rule: &str,
    mut callback: impl FnMut(&'static MessageMeta) -> bool,
) -> Result<()> {
    let exp = regex::Regex::new(name_rule).map_err(RegistryError::InvalidNameRule)?;

    let metas: Vec<&'static MessageMeta> = {
        let reg = REGISTRY.read().unwrap();
        reg.by_name
            .iter()
            .filter(|(name, _)| exp.is_match(name))
            .map(|(_, meta)| *meta)
            .collect()
    };

    for meta in metas {
        if !callback(meta) {
            break;
        }
    }

    Ok(())
}

// ----------------------------------------------------------------------------
// Message Helpers
// ----------------------------------------------------------------------------

/// The registered full name of a message value, empty when unregistered.
pub fn message_full_name(msg: &(dyn Any + Send + Sync)) -> &'static str {
    meta_by_msg(msg).map(|m| m.full_name()).unwrap_or("")
}

/// The registered short type name of a message value, empty when unregistered.
pub fn message_type_name(msg: &(dyn Any + Send + Sync)) -> &'static str {
    meta_by_msg(msg).map(|m| m.type_name).unwrap_or("")
}

/// The registered id of a message value, 0 when unregistered.
pub fn message_id(msg: &(dyn Any + Send + Sync)) -> u32 {
    meta_by_msg(msg).map(|m| m.id).unwrap_or(0)
}

/// Encoded size of a message value; 0 when unregistered or encode fails.
/// Encodes the value to measure it, so this is for diagnostics only.
pub fn message_size(msg: &(dyn Any + Send + Sync)) -> usize {
    meta_by_msg(msg)
        .and_then(|m| m.encode(msg).ok())
        .map(|data| data.len())
        .unwrap_or(0)
}

/// Debug rendering of a message value; empty when unregistered.
pub fn message_to_string(msg: &(dyn Any + Send + Sync)) -> String {
    meta_by_msg(msg)
        .map(|m| m.debug_message(msg))
        .unwrap_or_default()
}

/// 16-bit string hash used to derive message ids when none is assigned
/// explicitly. Stable across runs and implementations:
/// `h = h + (h << 5) + ch + (ch << 7)` over the code points, mod 2^16.
pub fn string_hash(s: &str) -> u16 {
    let mut hash: u16 = 0;
    for c in s.chars() {
        let ch = c as u32 as u16;
        hash = hash
            .wrapping_add(hash << 5)
            .wrapping_add(ch)
            .wrapping_add(ch << 7);
    }
    hash
}

fn debug_message<M: Message>(msg: &(dyn Any + Send + Sync)) -> String {
    match msg.downcast_ref::<M>() {
        Some(value) => format!("{value:?}"),
        None => String::new(),
    }
}

fn short_type_name<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    full.rsplit("::").next().unwrap_or(full)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
