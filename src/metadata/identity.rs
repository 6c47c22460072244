//! Compiled-unit identity.
//!
//! A unit's identity has two layers: the pair of simple name and MVID guid names
//! the unit, and a SHA-1 digest over its metadata pins the exact structure. The
//! [`crate::metadata::pool::UnitPool`] keys on name+mvid and uses the digest to
//! reject a structurally different unit smuggled in under an identity that is
//! already registered.

use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uguid::Guid;

static MVID_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identity of a compiled unit: simple name, MVID guid and content digest.
///
/// Equality and hashing cover only name and mvid - the digest is deliberately
/// excluded so that two candidates claiming the same identity compare equal and
/// the pool can then detect the structural mismatch via [`UnitIdentity::colliding`].
#[derive(Clone)]
pub struct UnitIdentity {
    /// Simple name of the unit, e.g. `Calc.Tests`
    pub name: String,
    /// Module version id distinguishing builds of the same name
    pub mvid: Guid,
    /// SHA-1 digest over the unit's metadata
    pub digest: [u8; 20],
}

impl UnitIdentity {
    /// Creates an identity from explicit parts.
    #[must_use]
    pub fn new(name: impl Into<String>, mvid: Guid, digest: [u8; 20]) -> Self {
        UnitIdentity {
            name: name.into(),
            mvid,
            digest,
        }
    }

    /// Mints a fresh MVID for a unit under construction.
    ///
    /// The guid is derived from the unit name and a process-wide sequence number,
    /// so every constructed unit gets a distinct identity even when names repeat.
    #[must_use]
    pub(crate) fn fresh_mvid(name: &str) -> Guid {
        let seq = MVID_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());
        hasher.update(seq.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Guid::from_bytes(bytes)
    }

    /// Computes the SHA-1 digest over a metadata summary.
    #[must_use]
    pub(crate) fn digest_of(content: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(content);
        hasher.finalize().into()
    }

    /// Returns true if `other` claims the same name+mvid but differs structurally.
    ///
    /// This is the pool's collision condition: registering both would make member
    /// references ambiguous.
    #[must_use]
    pub fn colliding(&self, other: &UnitIdentity) -> bool {
        self == other && self.digest != other.digest
    }
}

impl PartialEq for UnitIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.mvid == other.mvid
    }
}

impl Eq for UnitIdentity {}

impl std::hash::Hash for UnitIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.mvid.to_bytes().hash(state);
    }
}

impl fmt::Debug for UnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitIdentity({}, mvid: {})", self.name, self.mvid)
    }
}

impl fmt::Display for UnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, MVID={}", self.name, self.mvid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_mvid_distinct_per_unit() {
        let a = UnitIdentity::fresh_mvid("Lib");
        let b = UnitIdentity::fresh_mvid("Lib");
        assert_ne!(a, b);
    }

    #[test]
    fn test_equality_ignores_digest() {
        let mvid = UnitIdentity::fresh_mvid("Lib");
        let a = UnitIdentity::new("Lib", mvid, [1; 20]);
        let b = UnitIdentity::new("Lib", mvid, [2; 20]);
        assert_eq!(a, b);
        assert!(a.colliding(&b));
    }

    #[test]
    fn test_same_digest_is_not_a_collision() {
        let mvid = UnitIdentity::fresh_mvid("Lib");
        let a = UnitIdentity::new("Lib", mvid, [7; 20]);
        let b = UnitIdentity::new("Lib", mvid, [7; 20]);
        assert!(!a.colliding(&b));
    }

    #[test]
    fn test_different_name_never_collides() {
        let mvid = UnitIdentity::fresh_mvid("Lib");
        let a = UnitIdentity::new("Lib", mvid, [1; 20]);
        let b = UnitIdentity::new("Other", mvid, [2; 20]);
        assert!(!a.colliding(&b));
    }
}
