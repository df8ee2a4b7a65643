//! Owned value model for column elements
//!
//! The encoder borrows values at its API boundary and keeps owned copies only
//! where the format requires them (the previous-element cache and buffered
//! reference records). `Value` covers the closed storable type set plus the
//! MinKey/MaxKey sentinels, which are representable here so the encoder can
//! reject them with a proper error.

use crate::constants::TERMINATOR;
use crate::types::TypeTag;

/// A 12-byte object id: 4-byte timestamp, 5-byte instance-unique portion,
/// 3-byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    /// The 5 instance-unique bytes. Delta encoding is only possible between
    /// ids that share them.
    pub fn instance_unique(&self) -> &[u8] {
        &self.0[4..9]
    }
}

/// Binary payload with a subtype byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    /// Subtype byte, stored in the literal payload.
    pub subtype: u8,
    /// Raw bytes.
    pub data: Vec<u8>,
}

/// A single element value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit IEEE-754 floating point
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Nested record
    Object(Record),
    /// Array, serialized as a record with `"0"`, `"1"`, ... keys
    Array(Vec<Value>),
    /// Binary data with subtype
    Binary(Binary),
    /// Present but undefined
    Undefined,
    /// 12-byte object id
    ObjectId(ObjectId),
    /// Boolean
    Bool(bool),
    /// Milliseconds since the epoch
    Date(i64),
    /// Present but null
    Null,
    /// Regular expression
    RegEx {
        /// Pattern, stored as a zero-terminated string.
        pattern: String,
        /// Option characters, stored as a zero-terminated string.
        options: String,
    },
    /// Namespace reference
    DbRef {
        /// Namespace string.
        namespace: String,
        /// Referenced object id.
        id: ObjectId,
    },
    /// Code with scope
    CodeWScope {
        /// Code string.
        code: String,
        /// Scope record.
        scope: Record,
    },
    /// Symbol (string payload)
    Symbol(String),
    /// 32-bit signed integer
    Int32(i32),
    /// Internal 64-bit timestamp
    Timestamp(u64),
    /// 64-bit signed integer
    Int64(i64),
    /// 128-bit decimal, raw little-endian bytes
    Decimal128([u8; 16]),
    /// Always-smallest sentinel; rejected by the encoder
    MinKey,
    /// Always-largest sentinel; rejected by the encoder
    MaxKey,
}

impl Value {
    /// The wire type tag for this value.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Double(_) => TypeTag::Double,
            Value::String(_) => TypeTag::String,
            Value::Object(_) => TypeTag::Object,
            Value::Array(_) => TypeTag::Array,
            Value::Binary(_) => TypeTag::Binary,
            Value::Undefined => TypeTag::Undefined,
            Value::ObjectId(_) => TypeTag::ObjectId,
            Value::Bool(_) => TypeTag::Bool,
            Value::Date(_) => TypeTag::Date,
            Value::Null => TypeTag::Null,
            Value::RegEx { .. } => TypeTag::RegEx,
            Value::DbRef { .. } => TypeTag::DbRef,
            Value::CodeWScope { .. } => TypeTag::CodeWScope,
            Value::Symbol(_) => TypeTag::Symbol,
            Value::Int32(_) => TypeTag::Int32,
            Value::Timestamp(_) => TypeTag::Timestamp,
            Value::Int64(_) => TypeTag::Int64,
            Value::Decimal128(_) => TypeTag::Decimal128,
            Value::MinKey => TypeTag::MinKey,
            Value::MaxKey => TypeTag::MaxKey,
        }
    }

    /// Size in bytes of the value payload, excluding type byte and name.
    pub fn payload_size(&self) -> usize {
        match self {
            Value::Double(_) | Value::Date(_) | Value::Timestamp(_) | Value::Int64(_) => 8,
            Value::Int32(_) => 4,
            Value::Bool(_) => 1,
            Value::ObjectId(_) => 12,
            Value::Decimal128(_) => 16,
            Value::String(s) | Value::Symbol(s) => 4 + s.len() + 1,
            Value::Object(r) => r.document_size(),
            Value::Array(items) => array_document_size(items),
            Value::Binary(b) => 4 + 1 + b.data.len(),
            Value::Undefined | Value::Null | Value::MinKey | Value::MaxKey => 0,
            Value::RegEx { pattern, options } => pattern.len() + 1 + options.len() + 1,
            Value::DbRef { namespace, .. } => 4 + namespace.len() + 1 + 12,
            Value::CodeWScope { code, scope } => {
                4 + 4 + code.len() + 1 + scope.document_size()
            }
        }
    }

    /// Append the value payload bytes to `out`.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Value::Double(d) => out.extend_from_slice(&d.to_le_bytes()),
            Value::String(s) | Value::Symbol(s) => write_string_payload(s, out),
            Value::Object(r) => r.write_document(out),
            Value::Array(items) => write_array_document(items, out),
            Value::Binary(b) => {
                out.extend_from_slice(&(b.data.len() as i32).to_le_bytes());
                out.push(b.subtype);
                out.extend_from_slice(&b.data);
            }
            Value::Undefined | Value::Null | Value::MinKey | Value::MaxKey => {}
            Value::ObjectId(oid) => out.extend_from_slice(&oid.0),
            Value::Bool(b) => out.push(*b as u8),
            Value::Date(ms) => out.extend_from_slice(&ms.to_le_bytes()),
            Value::RegEx { pattern, options } => {
                out.extend_from_slice(pattern.as_bytes());
                out.push(0);
                out.extend_from_slice(options.as_bytes());
                out.push(0);
            }
            Value::DbRef { namespace, id } => {
                write_string_payload(namespace, out);
                out.extend_from_slice(&id.0);
            }
            Value::CodeWScope { code, scope } => {
                let total = 4 + 4 + code.len() + 1 + scope.document_size();
                out.extend_from_slice(&(total as i32).to_le_bytes());
                write_string_payload(code, out);
                scope.write_document(out);
            }
            Value::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
            Value::Timestamp(t) => out.extend_from_slice(&t.to_le_bytes()),
            Value::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
            Value::Decimal128(bytes) => out.extend_from_slice(bytes),
        }
    }

    /// Append a full element (type byte, zero-terminated name, payload).
    pub fn write_element(&self, name: &str, out: &mut Vec<u8>) {
        out.push(self.type_tag().as_u8());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        self.write_payload(out);
    }

    /// Convert from a JSON value. Integers that fit in 32 bits become
    /// `Int32`, other integers `Int64`, all other numbers `Double`.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        Value::Int32(i as i32)
                    } else {
                        Value::Int64(i)
                    }
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(Record::from_json(map)),
        }
    }
}

/// An ordered collection of named values. Field order is significant; the
/// interleaved reference schema matches fields by name in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field. Duplicate names are not rejected here; traversal and
    /// merge logic treat names positionally.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// The fields in order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True if a field with this name exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    /// Serialized document size: length prefix, elements, terminator.
    pub fn document_size(&self) -> usize {
        4 + self
            .fields
            .iter()
            .map(|(n, v)| 1 + n.len() + 1 + v.payload_size())
            .sum::<usize>()
            + 1
    }

    /// Append the serialized document to `out`.
    pub fn write_document(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.document_size() as i32).to_le_bytes());
        for (name, value) in &self.fields {
            value.write_element(name, out);
        }
        out.push(TERMINATOR);
    }

    /// Convert from a JSON object, preserving field order.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Record {
        let mut record = Record::new();
        for (name, value) in map {
            record.push(name.clone(), Value::from_json(value));
        }
        record
    }
}

fn write_string_payload(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&((s.len() + 1) as i32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn array_document_size(items: &[Value]) -> usize {
    4 + items
        .iter()
        .enumerate()
        .map(|(i, v)| 1 + decimal_digits(i) + 1 + v.payload_size())
        .sum::<usize>()
        + 1
}

fn write_array_document(items: &[Value], out: &mut Vec<u8>) {
    out.extend_from_slice(&(array_document_size(items) as i32).to_le_bytes());
    for (i, value) in items.iter().enumerate() {
        value.write_element(&i.to_string(), out);
    }
    out.push(TERMINATOR);
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}
