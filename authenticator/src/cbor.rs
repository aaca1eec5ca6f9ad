//! CTAP2 request maps with small integer keys.
//!
//! CTAP requires the keys of a command map to appear in canonical order.  The
//! decoder here enforces the stricter rule used by every handler in this
//! crate: the first key is `1` and each following key is larger than the one
//! before it.  Gaps are allowed.  Commands describe the fields they consume
//! with a [`Field`] table so the same checks apply everywhere.

use ciborium::{
    de::from_reader,
    ser::into_writer,
    value::{Integer, Value},
};

use crate::status::{Ctap2Error, Result, CTAP2_OK};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FieldType {
    Uint,
    Bytes,
    Map,
}

impl FieldType {
    fn check(self, value: &Value) -> Result<()> {
        let matches = match self {
            FieldType::Uint => matches!(value, Value::Integer(int) if u64::try_from(*int).is_ok()),
            FieldType::Bytes => matches!(value, Value::Bytes(_)),
            FieldType::Map => matches!(value, Value::Map(_)),
        };
        if matches {
            Ok(())
        } else {
            Err(Ctap2Error::UnexpectedType)
        }
    }
}

/// Schema entry for one integer key of a request map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Field {
    pub key: u64,
    pub ty: FieldType,
    pub required: bool,
}

impl Field {
    pub const fn required(key: u64, ty: FieldType) -> Self {
        Self {
            key,
            ty,
            required: true,
        }
    }

    pub const fn optional(key: u64, ty: FieldType) -> Self {
        Self {
            key,
            ty,
            required: false,
        }
    }
}

/// A decoded map whose keys passed the ordering rule and whose known fields
/// carry the type their schema asks for.  Keys the schema does not mention
/// are kept but never type-checked.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap {
    entries: Vec<(u64, Value)>,
}

impl OrderedMap {
    pub fn from_bytes(data: &[u8], schema: &[Field]) -> Result<Self> {
        let value: Value = from_reader(data).map_err(|_| Ctap2Error::InvalidEncoding)?;
        Self::from_value(value, schema)
    }

    pub fn from_value(value: Value, schema: &[Field]) -> Result<Self> {
        let Value::Map(map) = value else {
            return Err(Ctap2Error::InvalidEncoding);
        };

        let mut entries: Vec<(u64, Value)> = Vec::with_capacity(map.len());
        for (key, value) in map {
            let key = uint_key(&key)?;
            match entries.last() {
                None if key != 1 => return Err(Ctap2Error::MissingParameter),
                Some((previous, _)) if key <= *previous => {
                    return Err(Ctap2Error::InvalidEncoding)
                }
                _ => {}
            }
            if let Some(field) = schema.iter().find(|field| field.key == key) {
                field.ty.check(&value)?;
            }
            entries.push((key, value));
        }

        let missing = schema
            .iter()
            .filter(|field| field.required)
            .any(|field| !entries.iter().any(|(key, _)| *key == field.key));
        if missing {
            return Err(Ctap2Error::MissingParameter);
        }

        Ok(Self { entries })
    }

    fn get(&self, key: u64) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    pub fn uint(&self, key: u64) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Integer(int)) => u64::try_from(*int)
                .map(Some)
                .map_err(|_| Ctap2Error::UnexpectedType),
            Some(_) => Err(Ctap2Error::UnexpectedType),
        }
    }

    /// Moves a byte string out of the map.
    pub fn take_bytes(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::Bytes(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(Ctap2Error::UnexpectedType),
        }
    }

    pub fn take(&mut self, key: u64) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }
}

fn uint_key(key: &Value) -> Result<u64> {
    match key {
        Value::Integer(int) => u64::try_from(*int).map_err(|_| Ctap2Error::InvalidEncoding),
        _ => Err(Ctap2Error::InvalidEncoding),
    }
}

/// Encode an explicitly constructed map with no entries (`0xA0`).
pub fn encode_empty_map() -> Result<Vec<u8>> {
    encode_value(&Value::Map(Vec::new()))
}

pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut encoded = Vec::new();
    into_writer(value, &mut encoded).map_err(|_| Ctap2Error::Processing)?;
    Ok(encoded)
}

/// Prefix an encoded response body with `CTAP2_OK`.
pub fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(CTAP2_OK);
    out.extend_from_slice(body);
    out
}

/// Build a request map from `(key, value)` pairs in the given order.
pub fn int_map(entries: Vec<(u64, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(key, value)| (Value::Integer(Integer::from(key)), value))
            .collect(),
    )
}
