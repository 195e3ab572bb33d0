//! # Actor Address
//!
//! A [`Pid`] names exactly one actor: the `address` of the engine that hosts
//! it and an `id` unique within that engine. Ids are hierarchical, with
//! segments joined by [`PID_SEPARATOR`], so a child's pid is derived from its
//! parent's by appending segments.
//!
//! The lookup key is an FNV-1a hash computed once at construction. `Hash`
//! only feeds that key to the hasher, which keeps registry lookups cheap no
//! matter how deep the id path grows.

use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Separator between id segments.
pub const PID_SEPARATOR: &str = "/";

const FNV_OFFSET_BASIS: u64 = 14_695_981_039_346_656_037;
const FNV_PRIME: u64 = 1_099_511_628_211;

/// Immutable actor address.
///
/// Cloning is cheap: both fields are reference counted.
#[derive(Clone)]
pub struct Pid {
    address: Arc<str>,
    id: Arc<str>,
    key: u64,
}

impl Pid {
    /// Creates a pid from an engine address and an actor id.
    pub fn new(address: impl AsRef<str>, id: impl AsRef<str>) -> Self {
        let address: Arc<str> = Arc::from(address.as_ref());
        let id: Arc<str> = Arc::from(id.as_ref());
        let key = lookup_key(&address, &id);
        Self { address, id, key }
    }

    /// Creates a pid whose id is `id` followed by each tag as a further
    /// segment.
    pub fn with_tags(address: impl AsRef<str>, id: impl AsRef<str>, tags: &[&str]) -> Self {
        Self::new(address, join_segments(id.as_ref(), tags))
    }

    /// Address of the engine hosting this actor.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Actor id, unique within its engine.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Derives a child pid on the same address: `self.id/id`.
    pub fn child(&self, id: impl AsRef<str>) -> Pid {
        self.child_with_tags(id, &[])
    }

    /// Derives a child pid with additional tag segments: `self.id/id/tag..`.
    pub fn child_with_tags(&self, id: impl AsRef<str>, tags: &[&str]) -> Pid {
        let child_id = join_segments(&format!("{}{}{}", self.id, PID_SEPARATOR, id.as_ref()), tags);
        let key = lookup_key(&self.address, &child_id);
        Pid {
            address: self.address.clone(),
            id: Arc::from(child_id),
            key,
        }
    }

    /// Precomputed hash used for registry lookups.
    pub fn lookup_key(&self) -> u64 {
        self.key
    }

    /// Returns `true` if `other` is a descendant of this pid on the same
    /// address.
    pub fn is_ancestor_of(&self, other: &Pid) -> bool {
        self.address == other.address
            && other.id.len() > self.id.len()
            && other.id.starts_with(&*self.id)
            && other.id[self.id.len()..].starts_with(PID_SEPARATOR)
    }
}

fn join_segments(id: &str, tags: &[&str]) -> String {
    let mut joined = String::from(id);
    for tag in tags {
        joined.push_str(PID_SEPARATOR);
        joined.push_str(tag);
    }
    joined
}

fn lookup_key(address: &str, id: &str) -> u64 {
    // 0xff never occurs in UTF-8, so (address, id) pairs cannot collide by
    // shifting bytes across the boundary.
    let bytes = address.bytes().chain(std::iter::once(0xff)).chain(id.bytes());
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl PartialEq for Pid {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.address == other.address && self.id == other.id
    }
}

impl Eq for Pid {}

impl Hash for Pid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.key);
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.address, PID_SEPARATOR, self.id)
    }
}

impl Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({self})")
    }
}
