// src/dm/value.rs

//! Resource values, payload entries and resource metadata

use crate::path::{Iid, Oid, Rid, UriPath};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded resource value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Uint(u64),
    ObjLink { oid: Oid, iid: Iid },
}

impl Value {
    /// Integer view of the value, if it has one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Uint(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{:?}", v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::ObjLink { oid, iid } => write!(f, "{}:{}", oid, iid),
        }
    }
}

/// One entry of a pre-decoded Write payload
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEntry {
    pub path: UriPath,
    pub value: Value,
}

impl WriteEntry {
    pub fn new(path: UriPath, value: Value) -> Self {
        Self { path, value }
    }
}

/// Kind of a resource as declared by its object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Read-only, single
    R,
    /// Write-only, single
    W,
    /// Read/write, single
    Rw,
    /// Read-only, multiple
    Rm,
    /// Write-only, multiple
    Wm,
    /// Read/write, multiple
    Rwm,
    /// Executable
    E,
    /// Accessible only by the Bootstrap Server, single
    BsRw,
    /// Accessible only by the Bootstrap Server, multiple
    BsRwm,
}

impl ResourceKind {
    /// True for multiple-instance resources
    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::Rm | Self::Wm | Self::Rwm | Self::BsRwm)
    }

    /// True if a regular server may read the resource
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::R | Self::Rw | Self::Rm | Self::Rwm)
    }

    /// True if the Bootstrap Server may read the resource
    pub fn is_bootstrap_readable(&self) -> bool {
        self.is_readable() || matches!(self, Self::BsRw | Self::BsRwm)
    }
}

/// Whether a declared resource currently holds a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

/// Entry returned by `list_resources`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub rid: Rid,
    pub kind: ResourceKind,
    pub presence: Presence,
}

impl ResourceDescriptor {
    pub fn present(rid: Rid, kind: ResourceKind) -> Self {
        Self {
            rid,
            kind,
            presence: Presence::Present,
        }
    }

    pub fn absent(rid: Rid, kind: ResourceKind) -> Self {
        Self {
            rid,
            kind,
            presence: Presence::Absent,
        }
    }

    pub fn is_present(&self) -> bool {
        self.presence == Presence::Present
    }
}

/// Argument passed to an Execute handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteArg {
    pub id: u8,
    pub value: Option<String>,
}

/// Object/Instance-level notification attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OiAttributes {
    pub min_period: Option<u32>,
    pub max_period: Option<u32>,
    pub min_eval_period: Option<u32>,
    pub max_eval_period: Option<u32>,
}

/// Resource and Resource Instance notification attributes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceAttributes {
    pub common: OiAttributes,
    pub greater_than: Option<f64>,
    pub less_than: Option<f64>,
    pub step: Option<f64>,
}

/// A value read back from the data model, tagged with its path
#[derive(Debug, Clone, PartialEq)]
pub struct ReadEntry {
    pub path: UriPath,
    pub value: Value,
}

/// Key used in the notify queue for resource-level changes
pub type ResourceKey = (Iid, Rid);
