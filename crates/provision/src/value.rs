//! Property values and cross-resource references

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared properties of a resource, ordered by key
pub type Properties = BTreeMap<String, Value>;

/// A reference to another resource by logical identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    #[serde(rename = "ref")]
    pub target: String,
}

/// A declared property value
///
/// In documents a reference is written as a single-key table, `{ ref = "Vpc" }`,
/// and resolves to the physical identifier of the target once it exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Ref(Reference),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a reference to another resource
    pub fn reference(target: impl Into<String>) -> Self {
        Self::Ref(Reference {
            target: target.into(),
        })
    }

    /// Target of a direct reference, if this value is one
    pub fn as_ref_target(&self) -> Option<&str> {
        match self {
            Self::Ref(Reference { target }) => Some(target.as_str()),
            _ => None,
        }
    }

    /// Visit every reference target inside this value, depth first
    pub fn for_each_ref<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Self::Ref(Reference { target }) => f(target.as_str()),
            Self::List(items) => items.iter().for_each(|v| v.for_each_ref(f)),
            Self::Map(entries) => entries.values().for_each(|v| v.for_each_ref(f)),
            _ => {}
        }
    }

    /// Replace every reference with the physical id returned by `lookup`
    ///
    /// Returns the first target `lookup` could not resolve.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            Self::Ref(Reference { target }) => lookup(target.as_str())
                .map(Value::String)
                .ok_or_else(|| target.clone()),
            Self::List(items) => items
                .iter()
                .map(|v| v.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Map),
            other => Ok(other.clone()),
        }
    }

    /// Short human-readable rendering used in plans
    pub fn display_short(&self) -> String {
        let rendered = self.to_string();
        if rendered.chars().count() > 60 {
            let head: String = rendered.chars().take(57).collect();
            format!("{head}...")
        } else {
            rendered
        }
    }
}

/// Resolve every reference in a property map
///
/// Returns the first target `lookup` could not resolve.
pub fn resolve_properties<F>(properties: &Properties, lookup: &F) -> Result<Properties, String>
where
    F: Fn(&str) -> Option<String>,
{
    properties
        .iter()
        .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
        .collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Ref(Reference { target }) => write!(f, "ref({target})"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}
