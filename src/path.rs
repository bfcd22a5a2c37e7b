// src/path.rs

//! Data model paths
//!
//! A [`UriPath`] addresses the root, an Object, an Object Instance, a
//! Resource or a Resource Instance. It is stored as a fixed array of four
//! identifiers terminated by [`ID_INVALID`]. Values past the first
//! [`ID_INVALID`] are never looked at: two paths that differ only there are
//! equal, hash identically and compare equal.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Object ID
pub type Oid = u16;
/// Object Instance ID
pub type Iid = u16;
/// Resource ID
pub type Rid = u16;
/// Resource Instance ID
pub type Riid = u16;

/// Sentinel terminating a path
pub const ID_INVALID: u16 = u16::MAX;

/// Maximum path depth
pub const MAX_DEPTH: usize = 4;

/// Position of an identifier within a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IdType {
    Oid = 0,
    Iid = 1,
    Rid = 2,
    Riid = 3,
}

/// A data model path of up to four identifiers
#[derive(Clone, Copy)]
pub struct UriPath {
    ids: [u16; MAX_DEPTH],
}

impl UriPath {
    /// Build a path from raw identifiers, normalized or not
    pub const fn from_ids(ids: [u16; MAX_DEPTH]) -> Self {
        Self { ids }
    }

    /// The root path `/`
    pub const fn root() -> Self {
        Self::from_ids([ID_INVALID; MAX_DEPTH])
    }

    /// Object path `/oid`
    pub const fn object(oid: Oid) -> Self {
        Self::from_ids([oid, ID_INVALID, ID_INVALID, ID_INVALID])
    }

    /// Object Instance path `/oid/iid`
    pub const fn instance(oid: Oid, iid: Iid) -> Self {
        Self::from_ids([oid, iid, ID_INVALID, ID_INVALID])
    }

    /// Resource path `/oid/iid/rid`
    pub const fn resource(oid: Oid, iid: Iid, rid: Rid) -> Self {
        Self::from_ids([oid, iid, rid, ID_INVALID])
    }

    /// Resource Instance path `/oid/iid/rid/riid`
    pub const fn resource_instance(oid: Oid, iid: Iid, rid: Rid, riid: Riid) -> Self {
        Self::from_ids([oid, iid, rid, riid])
    }

    /// Number of meaningful identifiers (stops at the first invalid one)
    pub fn len(&self) -> usize {
        self.ids
            .iter()
            .position(|&id| id == ID_INVALID)
            .unwrap_or(MAX_DEPTH)
    }

    /// True for the root path
    pub fn is_root(&self) -> bool {
        self.len() == 0
    }

    /// True if the path reaches at least `id_type`
    pub fn has(&self, id_type: IdType) -> bool {
        self.len() > id_type as usize
    }

    /// True if `id_type` is the deepest identifier in the path
    pub fn leaf_is(&self, id_type: IdType) -> bool {
        self.len() == id_type as usize + 1
    }

    /// Identifier at `id_type`, if the path reaches that deep
    pub fn id(&self, id_type: IdType) -> Option<u16> {
        self.has(id_type).then(|| self.ids[id_type as usize])
    }

    pub fn oid(&self) -> Option<Oid> {
        self.id(IdType::Oid)
    }

    pub fn iid(&self) -> Option<Iid> {
        self.id(IdType::Iid)
    }

    pub fn rid(&self) -> Option<Rid> {
        self.id(IdType::Rid)
    }

    pub fn riid(&self) -> Option<Riid> {
        self.id(IdType::Riid)
    }

    /// True if no valid identifier follows the first invalid one
    pub fn is_normalized(&self) -> bool {
        self.ids[self.len()..].iter().all(|&id| id == ID_INVALID)
    }

    /// Copy of this path with every position past the terminator cleared
    pub fn normalized(&self) -> Self {
        let mut ids = [ID_INVALID; MAX_DEPTH];
        let len = self.len();
        ids[..len].copy_from_slice(&self.ids[..len]);
        Self::from_ids(ids)
    }

    /// True if this path is not contained in `base`
    ///
    /// A path is outside its base when it diverges from it, or is shorter
    /// than it, before the base's own terminator.
    pub fn outside_base(&self, base: &UriPath) -> bool {
        for i in 0..MAX_DEPTH {
            if base.ids[i] == ID_INVALID {
                return false;
            }
            if self.ids[i] != base.ids[i] {
                return true;
            }
        }
        false
    }

    fn meaningful(&self) -> &[u16] {
        &self.ids[..self.len()]
    }
}

impl Default for UriPath {
    fn default() -> Self {
        Self::root()
    }
}

impl PartialEq for UriPath {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for UriPath {}

impl Ord for UriPath {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in 0..MAX_DEPTH {
            match self.ids[i].cmp(&other.ids[i]) {
                Ordering::Equal if self.ids[i] == ID_INVALID => break,
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for UriPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for UriPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.meaningful().hash(state);
    }
}

impl fmt::Display for UriPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for id in self.meaningful() {
            write!(f, "/{}", id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for UriPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UriPath({})", self)
    }
}

impl FromStr for UriPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s
            .strip_prefix('/')
            .ok_or_else(|| Error::bad_request(format!("path must start with '/': {}", s)))?;
        let mut ids = [ID_INVALID; MAX_DEPTH];
        if trimmed.is_empty() {
            return Ok(Self::from_ids(ids));
        }
        for (depth, segment) in trimmed.split('/').enumerate() {
            if depth >= MAX_DEPTH {
                return Err(Error::bad_request(format!("path too deep: {}", s)));
            }
            let id: u16 = segment
                .parse()
                .map_err(|_| Error::bad_request(format!("invalid path segment '{}'", segment)))?;
            if id == ID_INVALID {
                return Err(Error::bad_request(format!("reserved ID in path: {}", s)));
            }
            ids[depth] = id;
        }
        Ok(Self::from_ids(ids))
    }
}
