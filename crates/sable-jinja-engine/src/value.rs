// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::Error;

/// Ordered string-keyed mapping used by [`Value::Map`].
///
/// Lookup is by key equality; iteration follows insertion order.
pub type ValueMap = IndexMap<String, Value>;

/// Opaque host object exposed to templates.
///
/// Path resolution tries [`Object::field`] first and falls back to
/// [`Object::call_method`] (zero-argument methods only). Both are permissive:
/// returning `None` makes the lookup resolve to [`Value::None`] rather than
/// failing the render.
pub trait Object: fmt::Debug + Send + Sync {
    /// Looks up a named field on the object.
    fn field(&self, name: &str) -> Option<Value>;

    /// Invokes a zero-argument method on the object.
    fn call_method(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }

    /// String form used when the object itself is rendered.
    fn repr(&self) -> String {
        String::from("<object>")
    }
}

/// The engine's internal representation of any renderable datum.
///
/// Every host value crossing the boundary is normalised into this closed sum
/// type before evaluation; see [`to_value`] and [`Value::from_serde`]. Values
/// are structurally finite trees; the engine performs no cycle detection.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub enum Value {
    /// Absent/null datum. Renders as the empty string.
    #[default]
    None,
    /// Boolean, rendered as `true`/`false`.
    Bool(bool),
    /// Signed integer. All fixed signed widths collapse into `i64`.
    Int(i64),
    /// Unsigned integer. All fixed unsigned widths collapse into `u64`.
    UInt(u64),
    /// 32-bit float, kept at native precision for rendering.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Owned text, rendered verbatim.
    String(String),
    /// Ordered sequence of values.
    Seq(Vec<Value>),
    /// Ordered string-keyed mapping.
    Map(ValueMap),
    /// Opaque host object with reflective field/method access.
    Object(Arc<dyn Object>),
}

impl Value {
    /// Converts an already-marshaled `serde_json::Value` into the engine model.
    ///
    /// Mapping insertion order is preserved (serde_json is built with
    /// `preserve_order`).
    pub fn from_serde(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from_serde).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_serde(v)))
                    .collect(),
            ),
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::F32(_) | Value::F64(_) => "float",
            Value::String(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::Object(_) => "object",
        }
    }

    /// Truthiness used by `if` and the logical connectives.
    ///
    /// Falsy: none, false, numeric zero, empty string/sequence/mapping.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::UInt(u) => *u != 0,
            Value::F32(f) => *f != 0.0,
            Value::F64(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Seq(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Reports whether this is [`Value::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Element count for containers, Unicode scalar count for strings.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Seq(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Reports whether the value is an empty container or string.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Borrows the text of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric coercion used by comparisons and arithmetic.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::F32(f) => Some(f64::from(*f)),
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    /// Reports whether the value is any numeric variant.
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::UInt(_) | Value::F32(_) | Value::F64(_)
        )
    }

    /// Permissive attribute lookup applied in the fixed precedence order:
    /// mapping key, sequence index, object field, object zero-argument
    /// method. A miss resolves to [`Value::None`], never an error, so that
    /// templates may probe optional paths.
    pub fn get_attr(&self, name: &str) -> Value {
        match self {
            Value::Map(map) => map.get(name).cloned().unwrap_or(Value::None),
            Value::Seq(items) => name
                .parse::<usize>()
                .ok()
                .and_then(|idx| items.get(idx).cloned())
                .unwrap_or(Value::None),
            Value::Object(obj) => obj
                .field(name)
                .or_else(|| obj.call_method(name))
                .unwrap_or(Value::None),
            _ => Value::None,
        }
    }

    /// Permissive index lookup. Out-of-range sequence indices resolve to
    /// [`Value::None`].
    pub fn get_index(&self, index: &Value) -> Value {
        match (self, index) {
            (Value::Seq(items), _) => match index_to_usize(index) {
                Some(idx) => items.get(idx).cloned().unwrap_or(Value::None),
                None => Value::None,
            },
            (_, Value::String(key)) => self.get_attr(key),
            (Value::Map(map), _) => map
                .get(index.to_string().as_str())
                .cloned()
                .unwrap_or(Value::None),
            _ => Value::None,
        }
    }
}

fn index_to_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Int(i) if *i >= 0 => usize::try_from(*i).ok(),
        Value::UInt(u) => usize::try_from(*u).ok(),
        _ => None,
    }
}

/// Marshals any serializable host value into the engine model.
///
/// This is the host-side binding boundary: strings, booleans, every numeric
/// width, options/null pointers, sequences, string-keyed maps, and structs
/// (use `#[serde(flatten)]` for embedded-field promotion) all normalise into
/// the closed [`Value`] sum type. Fails with [`Error::BadSerialization`] when
/// the host value cannot be represented.
pub fn to_value<T: Serialize>(value: T) -> Result<Value, Error> {
    let json = serde_json::to_value(value).map_err(|err| Error::BadSerialization {
        message: err.to_string(),
    })?;
    Ok(Value::from_serde(json))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                *a >= 0 && *a as u64 == *b
            }
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// Canonical string conversion used by output interpolation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::F32(v) => write_float(f, v.to_string(), v.is_finite()),
            Value::F64(v) => write_float(f, v.to_string(), v.is_finite()),
            Value::String(s) => f.write_str(s),
            Value::Seq(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write_element(f, item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                // Key-sorted for deterministic output; iteration order stays
                // insertion order.
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (idx, key) in keys.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: ")?;
                    write_element(f, &map[key.as_str()])?;
                }
                f.write_str("}")
            }
            Value::Object(obj) => f.write_str(&obj.repr()),
        }
    }
}

// String elements inside collections render double-quoted; everything else
// uses its own conversion, so nested sequences recurse into bracket notation.
fn write_element(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "{s:?}"),
        other => write!(f, "{other}"),
    }
}

// Rust's shortest round-trip form drops the fraction for integral floats;
// keep a trailing `.0` so floats stay distinguishable from integers.
fn write_float(f: &mut fmt::Formatter<'_>, mut text: String, finite: bool) -> fmt::Result {
    if finite && !text.contains(['.', 'e', 'E']) {
        text.push_str(".0");
    }
    f.write_str(&text)
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! int_from {
    ($($ty:ty),+) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Int(i64::from(v))
            }
        })+
    };
}

macro_rules! uint_from {
    ($($ty:ty),+) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::UInt(u64::from(v))
            }
        })+
    };
}

int_from!(i8, i16, i32, i64);
uint_from!(u8, u16, u32, u64);

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::None,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

impl From<Arc<dyn Object>> for Value {
    fn from(obj: Arc<dyn Object>) -> Self {
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_string_forms() {
        assert_eq!(Value::None.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int(-42).to_string(), "-42");
        assert_eq!(Value::UInt(7).to_string(), "7");
        assert_eq!(Value::F64(3.14).to_string(), "3.14");
        assert_eq!(Value::F64(2.0).to_string(), "2.0");
        assert_eq!(Value::F32(1.5).to_string(), "1.5");
        assert_eq!(Value::String("plain".into()).to_string(), "plain");
    }

    #[test]
    fn sequence_rendering_quotes_strings_only() {
        let strings: Value = vec!["a", "b", "c"].into();
        assert_eq!(strings.to_string(), r#"["a", "b", "c"]"#);

        let numbers: Value = vec![1i64, 2, 3].into();
        assert_eq!(numbers.to_string(), "[1, 2, 3]");
    }

    #[test]
    fn nested_sequences_nest_brackets() {
        let nested: Value = vec![
            Value::from(vec![1i64, 2]),
            Value::from(vec!["x"]),
        ]
        .into();
        assert_eq!(nested.to_string(), r#"[[1, 2], ["x"]]"#);
    }

    #[test]
    fn mapping_rendering_is_key_sorted() {
        let mut map = ValueMap::new();
        map.insert("b".into(), Value::Int(2));
        map.insert("a".into(), Value::from("one"));
        assert_eq!(Value::Map(map).to_string(), r#"{"a": "one", "b": 2}"#);
    }

    #[test]
    fn from_serde_preserves_insertion_order() {
        let value = Value::from_serde(json!({"z": 1, "a": 2, "m": 3}));
        let Value::Map(map) = value else {
            panic!("expected mapping");
        };
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn truthiness_matches_conditional_semantics() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Seq(Vec::new()).is_truthy());
        assert!(!Value::Map(ValueMap::new()).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::F64(0.5).is_truthy());
    }

    #[test]
    fn cross_variant_numeric_equality() {
        assert_eq!(Value::Int(2), Value::UInt(2));
        assert_eq!(Value::Int(2), Value::F64(2.0));
        assert_ne!(Value::Int(-1), Value::UInt(u64::MAX));
        assert_ne!(Value::Int(2), Value::from("2"));
    }

    #[test]
    fn attr_lookup_is_permissive() {
        let value = Value::from_serde(json!({"a": {"b": 1}}));
        assert_eq!(value.get_attr("a").get_attr("b"), Value::Int(1));
        assert_eq!(value.get_attr("missing").get_attr("deeper"), Value::None);

        let seq: Value = vec![10i64, 20].into();
        assert_eq!(seq.get_index(&Value::Int(1)), Value::Int(20));
        assert_eq!(seq.get_index(&Value::Int(99)), Value::None);
    }

    #[test]
    fn string_length_counts_chars() {
        assert_eq!(Value::from("héllo").len(), Some(5));
    }

    #[derive(Debug)]
    struct Ticket {
        id: u64,
    }

    impl Object for Ticket {
        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "id" => Some(Value::UInt(self.id)),
                _ => None,
            }
        }

        fn call_method(&self, name: &str) -> Option<Value> {
            match name {
                "label" => Some(Value::String(format!("T-{}", self.id))),
                _ => None,
            }
        }
    }

    #[test]
    fn object_field_then_method_fallback() {
        let obj: Arc<dyn Object> = Arc::new(Ticket { id: 9 });
        let value = Value::Object(obj);
        assert_eq!(value.get_attr("id"), Value::UInt(9));
        assert_eq!(value.get_attr("label"), Value::from("T-9"));
        assert_eq!(value.get_attr("missing"), Value::None);
    }
}
