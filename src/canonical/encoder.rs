//! Serde front end for the canonical encoder.
//!
//! Any `Serialize` value is lowered into a [`CanonicalNode`] tree. Strings
//! and keys are NFC-normalized on the way in, objects are `BTreeMap`s so
//! key order is UTF-8 byte order, and the writer emits compact JSON with a
//! fixed escape table.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::ser::{self, Impossible, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::CanonicalizationError;
use crate::config::CanonicalConfig;

/// Wrapper key for binary payloads.
pub const BYTES_TAG: &str = "__bytes__";

/// Wrapper key for non-finite floats when they are allowed.
pub const FLOAT_TAG: &str = "__float__";

/// Normalized intermediate form of a canonicalized value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalNode {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// Number already rendered in its canonical text form.
    Number(String),
    /// NFC-normalized string.
    String(String),
    /// Ordered sequence.
    Array(Vec<CanonicalNode>),
    /// Object with byte-ordered, NFC-normalized keys.
    Object(BTreeMap<String, CanonicalNode>),
}

impl CanonicalNode {
    /// Render the node as canonical JSON bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_node(&mut buf, self);
        buf
    }
}

fn nfc(s: &str) -> String {
    s.nfc().collect()
}

fn tagged(tag: &str, value: String) -> CanonicalNode {
    let mut map = BTreeMap::new();
    map.insert(tag.to_owned(), CanonicalNode::String(value));
    CanonicalNode::Object(map)
}

fn single(key: &str, value: CanonicalNode) -> CanonicalNode {
    let mut map = BTreeMap::new();
    map.insert(nfc(key), value);
    CanonicalNode::Object(map)
}

// ── Value serializer ────────────────────────────────────────────────

/// Serializer producing a [`CanonicalNode`] at a given nesting depth.
#[derive(Clone, Copy)]
pub(crate) struct NodeSerializer<'a> {
    config: &'a CanonicalConfig,
    depth: usize,
}

impl<'a> NodeSerializer<'a> {
    pub(crate) fn new(config: &'a CanonicalConfig) -> Self {
        Self { config, depth: 0 }
    }

    fn enter(self) -> Result<Self, CanonicalizationError> {
        let depth = self.depth.saturating_add(1);
        if depth > self.config.max_depth {
            return Err(CanonicalizationError::MaxDepthExceeded {
                depth,
                limit: self.config.max_depth,
            });
        }
        Ok(Self {
            config: self.config,
            depth,
        })
    }

    fn float(self, value: f64, text: String) -> Result<CanonicalNode, CanonicalizationError> {
        if value.is_finite() {
            return Ok(CanonicalNode::Number(text));
        }
        let label = if value.is_nan() {
            "NaN"
        } else if value.is_sign_positive() {
            "Infinity"
        } else {
            "-Infinity"
        };
        if self.config.reject_non_finite {
            return Err(CanonicalizationError::NonFiniteNumber {
                value: label.to_owned(),
            });
        }
        Ok(tagged(FLOAT_TAG, label.to_owned()))
    }

    fn seq(self, len: Option<usize>) -> Result<SeqBuilder<'a>, CanonicalizationError> {
        Ok(SeqBuilder {
            inner: self.enter()?,
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn map(self) -> Result<MapBuilder<'a>, CanonicalizationError> {
        Ok(MapBuilder {
            inner: self.enter()?,
            entries: BTreeMap::new(),
            pending_key: None,
        })
    }
}

impl<'a> ser::Serializer for NodeSerializer<'a> {
    type Ok = CanonicalNode;
    type Error = CanonicalizationError;

    type SerializeSeq = SeqBuilder<'a>;
    type SerializeTuple = SeqBuilder<'a>;
    type SerializeTupleStruct = SeqBuilder<'a>;
    type SerializeTupleVariant = VariantSeqBuilder<'a>;
    type SerializeMap = MapBuilder<'a>;
    type SerializeStruct = MapBuilder<'a>;
    type SerializeStructVariant = VariantMapBuilder<'a>;

    fn serialize_bool(self, v: bool) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<CanonicalNode, Self::Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<CanonicalNode, Self::Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<CanonicalNode, Self::Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Number(v.to_string()))
    }

    fn serialize_i128(self, v: i128) -> Result<CanonicalNode, Self::Error> {
        if i64::try_from(v).is_ok() || u64::try_from(v).is_ok() {
            return Ok(CanonicalNode::Number(v.to_string()));
        }
        Err(CanonicalizationError::UnsupportedType {
            kind: "i128 outside the 64-bit range".to_owned(),
        })
    }

    fn serialize_u8(self, v: u8) -> Result<CanonicalNode, Self::Error> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<CanonicalNode, Self::Error> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<CanonicalNode, Self::Error> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Number(v.to_string()))
    }

    fn serialize_u128(self, v: u128) -> Result<CanonicalNode, Self::Error> {
        match u64::try_from(v) {
            Ok(small) => self.serialize_u64(small),
            Err(_) => Err(CanonicalizationError::UnsupportedType {
                kind: "u128 outside the 64-bit range".to_owned(),
            }),
        }
    }

    fn serialize_f32(self, v: f32) -> Result<CanonicalNode, Self::Error> {
        let text = if v == 0.0 { "0".to_owned() } else { v.to_string() };
        self.float(f64::from(v), text)
    }

    fn serialize_f64(self, v: f64) -> Result<CanonicalNode, Self::Error> {
        let text = if v == 0.0 { "0".to_owned() } else { v.to_string() };
        self.float(v, text)
    }

    fn serialize_char(self, v: char) -> Result<CanonicalNode, Self::Error> {
        let mut buf = [0u8; 4];
        Ok(CanonicalNode::String(nfc(v.encode_utf8(&mut buf))))
    }

    fn serialize_str(self, v: &str) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::String(nfc(v)))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<CanonicalNode, Self::Error> {
        self.enter()?;
        Ok(tagged(BYTES_TAG, BASE64.encode(v)))
    }

    fn serialize_none(self) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<CanonicalNode, Self::Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::String(nfc(variant)))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<CanonicalNode, Self::Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<CanonicalNode, Self::Error> {
        let inner = self.enter()?;
        Ok(single(variant, value.serialize(inner)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder<'a>, Self::Error> {
        self.seq(len)
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder<'a>, Self::Error> {
        self.seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqBuilder<'a>, Self::Error> {
        self.seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeqBuilder<'a>, Self::Error> {
        let wrapper = self.enter()?;
        Ok(VariantSeqBuilder {
            variant,
            seq: wrapper.seq(Some(len))?,
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapBuilder<'a>, Self::Error> {
        self.map()
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<MapBuilder<'a>, Self::Error> {
        self.map()
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantMapBuilder<'a>, Self::Error> {
        let wrapper = self.enter()?;
        Ok(VariantMapBuilder {
            variant,
            map: wrapper.map()?,
        })
    }
}

// ── Compound builders ───────────────────────────────────────────────

/// Collects sequence and tuple elements.
pub(crate) struct SeqBuilder<'a> {
    inner: NodeSerializer<'a>,
    items: Vec<CanonicalNode>,
}

impl SeqBuilder<'_> {
    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CanonicalizationError> {
        self.items.push(value.serialize(self.inner)?);
        Ok(())
    }
}

impl ser::SerializeSeq for SeqBuilder<'_> {
    type Ok = CanonicalNode;
    type Error = CanonicalizationError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.push(value)
    }

    fn end(self) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Array(self.items))
    }
}

impl ser::SerializeTuple for SeqBuilder<'_> {
    type Ok = CanonicalNode;
    type Error = CanonicalizationError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.push(value)
    }

    fn end(self) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Array(self.items))
    }
}

impl ser::SerializeTupleStruct for SeqBuilder<'_> {
    type Ok = CanonicalNode;
    type Error = CanonicalizationError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.push(value)
    }

    fn end(self) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Array(self.items))
    }
}

/// Tuple variant: `{"Variant": [..]}`.
pub(crate) struct VariantSeqBuilder<'a> {
    variant: &'static str,
    seq: SeqBuilder<'a>,
}

impl ser::SerializeTupleVariant for VariantSeqBuilder<'_> {
    type Ok = CanonicalNode;
    type Error = CanonicalizationError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        self.seq.push(value)
    }

    fn end(self) -> Result<CanonicalNode, Self::Error> {
        Ok(single(self.variant, CanonicalNode::Array(self.seq.items)))
    }
}

/// Collects map entries and struct fields, rejecting normalized duplicates.
pub(crate) struct MapBuilder<'a> {
    inner: NodeSerializer<'a>,
    entries: BTreeMap<String, CanonicalNode>,
    pending_key: Option<String>,
}

impl MapBuilder<'_> {
    fn insert(&mut self, key: String, value: CanonicalNode) -> Result<(), CanonicalizationError> {
        if self.entries.contains_key(&key) {
            return Err(CanonicalizationError::DuplicateKey { key });
        }
        self.entries.insert(key, value);
        Ok(())
    }
}

impl ser::SerializeMap for MapBuilder<'_> {
    type Ok = CanonicalNode;
    type Error = CanonicalizationError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Self::Error> {
        let raw = key.serialize(KeySerializer)?;
        self.pending_key = Some(nfc(&raw));
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        let key = self.pending_key.take().ok_or_else(|| {
            CanonicalizationError::Custom("map value serialized before its key".to_owned())
        })?;
        let node = value.serialize(self.inner)?;
        self.insert(key, node)
    }

    fn end(self) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Object(self.entries))
    }
}

impl ser::SerializeStruct for MapBuilder<'_> {
    type Ok = CanonicalNode;
    type Error = CanonicalizationError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        let node = value.serialize(self.inner)?;
        self.insert(nfc(key), node)
    }

    fn end(self) -> Result<CanonicalNode, Self::Error> {
        Ok(CanonicalNode::Object(self.entries))
    }
}

/// Struct variant: `{"Variant": {..}}`.
pub(crate) struct VariantMapBuilder<'a> {
    variant: &'static str,
    map: MapBuilder<'a>,
}

impl ser::SerializeStructVariant for VariantMapBuilder<'_> {
    type Ok = CanonicalNode;
    type Error = CanonicalizationError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        ser::SerializeStruct::serialize_field(&mut self.map, key, value)
    }

    fn end(self) -> Result<CanonicalNode, Self::Error> {
        Ok(single(self.variant, CanonicalNode::Object(self.map.entries)))
    }
}

// ── Key serializer ──────────────────────────────────────────────────

/// Accepts only string-like map keys.
struct KeySerializer;

fn non_string(kind: &str) -> CanonicalizationError {
    CanonicalizationError::NonStringKey {
        kind: kind.to_owned(),
    }
}

impl ser::Serializer for KeySerializer {
    type Ok = String;
    type Error = CanonicalizationError;

    type SerializeSeq = Impossible<String, CanonicalizationError>;
    type SerializeTuple = Impossible<String, CanonicalizationError>;
    type SerializeTupleStruct = Impossible<String, CanonicalizationError>;
    type SerializeTupleVariant = Impossible<String, CanonicalizationError>;
    type SerializeMap = Impossible<String, CanonicalizationError>;
    type SerializeStruct = Impossible<String, CanonicalizationError>;
    type SerializeStructVariant = Impossible<String, CanonicalizationError>;

    fn serialize_str(self, v: &str) -> Result<String, Self::Error> {
        Ok(v.to_owned())
    }

    fn serialize_char(self, v: char) -> Result<String, Self::Error> {
        Ok(v.to_string())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<String, Self::Error> {
        Ok(variant.to_owned())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<String, Self::Error> {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> Result<String, Self::Error> {
        Err(non_string("bool"))
    }

    fn serialize_i8(self, _v: i8) -> Result<String, Self::Error> {
        Err(non_string("integer"))
    }

    fn serialize_i16(self, _v: i16) -> Result<String, Self::Error> {
        Err(non_string("integer"))
    }

    fn serialize_i32(self, _v: i32) -> Result<String, Self::Error> {
        Err(non_string("integer"))
    }

    fn serialize_i64(self, _v: i64) -> Result<String, Self::Error> {
        Err(non_string("integer"))
    }

    fn serialize_u8(self, _v: u8) -> Result<String, Self::Error> {
        Err(non_string("integer"))
    }

    fn serialize_u16(self, _v: u16) -> Result<String, Self::Error> {
        Err(non_string("integer"))
    }

    fn serialize_u32(self, _v: u32) -> Result<String, Self::Error> {
        Err(non_string("integer"))
    }

    fn serialize_u64(self, _v: u64) -> Result<String, Self::Error> {
        Err(non_string("integer"))
    }

    fn serialize_f32(self, _v: f32) -> Result<String, Self::Error> {
        Err(non_string("float"))
    }

    fn serialize_f64(self, _v: f64) -> Result<String, Self::Error> {
        Err(non_string("float"))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<String, Self::Error> {
        Err(non_string("bytes"))
    }

    fn serialize_none(self) -> Result<String, Self::Error> {
        Err(non_string("none"))
    }

    fn serialize_some<T: ?Sized + Serialize>(self, _value: &T) -> Result<String, Self::Error> {
        Err(non_string("option"))
    }

    fn serialize_unit(self) -> Result<String, Self::Error> {
        Err(non_string("unit"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String, Self::Error> {
        Err(non_string("unit struct"))
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String, Self::Error> {
        Err(non_string("enum variant"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Err(non_string("sequence"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        Err(non_string("tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        Err(non_string("tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Err(non_string("enum variant"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Err(non_string("map"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        Err(non_string("struct"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Err(non_string("enum variant"))
    }
}

// ── Writer ──────────────────────────────────────────────────────────

fn write_node(buf: &mut Vec<u8>, node: &CanonicalNode) {
    match node {
        CanonicalNode::Null => buf.extend_from_slice(b"null"),
        CanonicalNode::Bool(true) => buf.extend_from_slice(b"true"),
        CanonicalNode::Bool(false) => buf.extend_from_slice(b"false"),
        CanonicalNode::Number(text) => buf.extend_from_slice(text.as_bytes()),
        CanonicalNode::String(s) => write_string(buf, s),
        CanonicalNode::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_node(buf, item);
            }
            buf.push(b']');
        }
        CanonicalNode::Object(entries) => {
            buf.push(b'{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_string(buf, key);
                buf.push(b':');
                write_node(buf, value);
            }
            buf.push(b'}');
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let mut out = String::with_capacity(s.len().saturating_add(2));
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\u{0020}' => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    buf.extend_from_slice(out.as_bytes());
}
