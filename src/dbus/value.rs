//! Owned representation of the values carried in method bodies, properties
//! and signals.

use std::{collections::BTreeMap, fmt};

/// Property name to value map, as returned by `GetAll` and carried in
/// `PropertiesChanged`.
pub type PropertyMap = BTreeMap<String, Value>;

/// A single value as it travels over the bus.
///
/// Containers keep their element signatures so a value received from the
/// host can be sent back unchanged (for example a settings payload read from
/// one call and passed to another).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `b`
    Bool(bool),
    /// `y`
    Byte(u8),
    /// `n`
    I16(i16),
    /// `q`
    U16(u16),
    /// `i`
    I32(i32),
    /// `u`
    U32(u32),
    /// `x`
    I64(i64),
    /// `t`
    U64(u64),
    /// `d`
    F64(f64),
    /// `s`
    Str(String),
    /// `o`
    ObjectPath(String),
    /// `g`
    Signature(String),
    /// `a<element>`
    Array {
        /// Signature of each element.
        element: String,
        /// Elements in wire order.
        items: Vec<Value>,
    },
    /// `a{<key><value>}`
    Dict {
        /// Signature of the keys (always a basic type).
        key: String,
        /// Signature of the values.
        value: String,
        /// Entries in wire order.
        entries: Vec<(Value, Value)>,
    },
    /// `(...)`
    Struct(Vec<Value>),
    /// `v`, a value wrapped together with its own signature.
    Variant(Box<Value>),
}

impl Value {
    /// Builds an array, taking the element signature explicitly so empty
    /// arrays stay well-typed.
    pub fn array(element: impl Into<String>, items: Vec<Value>) -> Self {
        Self::Array {
            element: element.into(),
            items,
        }
    }

    /// Builds an `a{sv}` dictionary, wrapping every value in a variant.
    pub fn vardict<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Dict {
            key: String::from("s"),
            value: String::from("v"),
            entries: entries
                .into_iter()
                .map(|(key, value)| (Value::Str(key.into()), Value::Variant(Box::new(value))))
                .collect(),
        }
    }

    /// Wire signature of this value.
    pub fn signature(&self) -> String {
        match self {
            Self::Bool(_) => String::from("b"),
            Self::Byte(_) => String::from("y"),
            Self::I16(_) => String::from("n"),
            Self::U16(_) => String::from("q"),
            Self::I32(_) => String::from("i"),
            Self::U32(_) => String::from("u"),
            Self::I64(_) => String::from("x"),
            Self::U64(_) => String::from("t"),
            Self::F64(_) => String::from("d"),
            Self::Str(_) => String::from("s"),
            Self::ObjectPath(_) => String::from("o"),
            Self::Signature(_) => String::from("g"),
            Self::Array { element, .. } => format!("a{element}"),
            Self::Dict { key, value, .. } => format!("a{{{key}{value}}}"),
            Self::Struct(fields) => {
                let inner: String = fields.iter().map(Value::signature).collect();
                format!("({inner})")
            }
            Self::Variant(_) => String::from("v"),
        }
    }

    /// Removes every variant wrapper, recursively.
    ///
    /// Container signatures are recomputed from the unwrapped contents, so a
    /// stripped value is meant for reading, not for sending back.
    pub fn strip_variants(self) -> Self {
        match self {
            Self::Variant(inner) => inner.strip_variants(),
            Self::Array { element, items } => {
                let items: Vec<Value> = items.into_iter().map(Value::strip_variants).collect();
                let element = items.first().map(Value::signature).unwrap_or(element);
                Self::Array { element, items }
            }
            Self::Dict {
                key,
                value,
                entries,
            } => {
                let entries: Vec<(Value, Value)> = entries
                    .into_iter()
                    .map(|(k, v)| (k.strip_variants(), v.strip_variants()))
                    .collect();
                let value = entries
                    .first()
                    .map(|(_, v)| v.signature())
                    .unwrap_or(value);
                Self::Dict {
                    key,
                    value,
                    entries,
                }
            }
            Self::Struct(fields) => {
                Self::Struct(fields.into_iter().map(Value::strip_variants).collect())
            }
            other => other,
        }
    }

    /// String content of `s`, `o` and `g` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::ObjectPath(s) | Self::Signature(s) => Some(s),
            Self::Variant(inner) => inner.as_str(),
            _ => None,
        }
    }

    /// Boolean content.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Variant(inner) => inner.as_bool(),
            _ => None,
        }
    }

    /// Unsigned content that fits in 32 bits.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Byte(v) => Some(u32::from(*v)),
            Self::U16(v) => Some(u32::from(*v)),
            Self::U32(v) => Some(*v),
            Self::U64(v) => u32::try_from(*v).ok(),
            Self::Variant(inner) => inner.as_u32(),
            _ => None,
        }
    }

    /// Signed content that fits in 64 bits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::I16(v) => Some(i64::from(*v)),
            Self::U16(v) => Some(i64::from(*v)),
            Self::I32(v) => Some(i64::from(*v)),
            Self::U32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            Self::U64(v) => i64::try_from(*v).ok(),
            Self::Variant(inner) => inner.as_i64(),
            _ => None,
        }
    }

    /// Unsigned 64 bit content.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            Self::Variant(inner) => inner.as_u64(),
            other => other.as_u32().map(u64::from),
        }
    }

    /// Floating point content.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            Self::Variant(inner) => inner.as_f64(),
            _ => None,
        }
    }

    /// Byte array content (`ay`), as used for SSIDs and raw paths.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Array { items, .. } => items
                .iter()
                .map(|item| match item {
                    Self::Byte(b) => Some(*b),
                    _ => None,
                })
                .collect(),
            Self::Variant(inner) => inner.as_bytes(),
            _ => None,
        }
    }

    /// Elements of an array value.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array { items, .. } => Some(items),
            Self::Variant(inner) => inner.as_array(),
            _ => None,
        }
    }

    /// Looks up a string key in a dictionary value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dict { entries, .. } => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            Self::Variant(inner) => inner.get(key),
            _ => None,
        }
    }

    /// Converts a string-keyed dictionary into a [`PropertyMap`], unwrapping
    /// one level of variant from each value.
    pub fn into_property_map(self) -> Option<PropertyMap> {
        match self {
            Self::Dict { entries, .. } => entries
                .into_iter()
                .map(|(key, value)| {
                    let key = key.as_str()?.to_owned();
                    let value = match value {
                        Self::Variant(inner) => *inner,
                        other => other,
                    };
                    Some((key, value))
                })
                .collect(),
            Self::Variant(inner) => inner.into_property_map(),
            _ => None,
        }
    }

    /// JSON rendering used by the command-line tool.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Bool(v) => Json::Bool(*v),
            Self::Byte(v) => Json::from(*v),
            Self::I16(v) => Json::from(*v),
            Self::U16(v) => Json::from(*v),
            Self::I32(v) => Json::from(*v),
            Self::U32(v) => Json::from(*v),
            Self::I64(v) => Json::from(*v),
            Self::U64(v) => Json::from(*v),
            Self::F64(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::Str(s) | Self::ObjectPath(s) | Self::Signature(s) => Json::String(s.clone()),
            Self::Array { items, .. } | Self::Struct(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Dict { entries, .. } => {
                let mut object = serde_json::Map::new();
                for (key, value) in entries {
                    let key = match key.as_str() {
                        Some(s) => s.to_owned(),
                        None => key.to_string(),
                    };
                    object.insert(key, value.to_json());
                }
                Json::Object(object)
            }
            Self::Variant(inner) => inner.to_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::ObjectPath(s) | Self::Signature(s) => write!(f, "{s}"),
            Self::Array { items, .. } => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Dict { entries, .. } => {
                write!(f, "{{")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Struct(fields) => {
                write!(f, "(")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, ")")
            }
            Self::Variant(inner) => write!(f, "<{inner}>"),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )+
    };
}

impl_from_scalar! {
    bool => Bool,
    u8 => Byte,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    String => Str,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::array("s", value.into_iter().map(Value::Str).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_of_nested_settings_payload() {
        let inner = Value::vardict([("id", Value::from("home"))]);
        let outer = Value::Dict {
            key: String::from("s"),
            value: String::from("a{sv}"),
            entries: vec![(Value::from("connection"), inner)],
        };

        assert_eq!(outer.signature(), "a{sa{sv}}");
    }

    #[test]
    fn strip_variants_unwraps_nested_wrappers() {
        let wrapped = Value::Variant(Box::new(Value::vardict([
            ("Count", Value::U32(5)),
            ("Name", Value::Variant(Box::new(Value::from("foo")))),
        ])));

        let stripped = wrapped.strip_variants();

        assert_eq!(stripped.get("Count"), Some(&Value::U32(5)));
        assert_eq!(stripped.get("Name"), Some(&Value::from("foo")));
        assert_eq!(stripped.signature(), "a{su}");
    }

    #[test]
    fn empty_array_keeps_declared_element_signature() {
        let empty = Value::array("o", vec![]).strip_variants();
        assert_eq!(empty.signature(), "ao");
    }

    #[test]
    fn property_map_unwraps_single_variant_level() {
        let map = Value::vardict([("Strength", Value::Byte(70))])
            .into_property_map()
            .unwrap_or_default();

        assert_eq!(map.get("Strength"), Some(&Value::Byte(70)));
    }

    #[test]
    fn byte_arrays_decode_to_bytes() {
        let ssid = Value::array("y", b"home".iter().copied().map(Value::Byte).collect());
        assert_eq!(ssid.as_bytes(), Some(b"home".to_vec()));
        assert_eq!(Value::array("s", vec![Value::from("x")]).as_bytes(), None);
    }

    #[test]
    fn json_rendering_flattens_variants() {
        let value = Value::vardict([("Count", Value::U32(5))]);
        assert_eq!(value.to_json(), serde_json::json!({ "Count": 5 }));
    }
}
