//! Every persisted key, assembled in one place.
//!
//! ```text
//! contents/
//!   .production.json   .staging.json   .lock
//!   .pending/{id}.json  .rejected/{id}.json  .{label}.json
//! editions/.head
//! editions/{id}/.origin  .flattened  {path}
//! objects/{hh}/{hash}.dat  {hash}.ref
//! ```
//!
//! `objects/{hh}/{hash}.info` is reserved for future object metadata and is
//! never written today.

use crate::edition::EditionId;
use crate::hash::ContentHash;

pub const PRODUCTION: &str = "production";
pub const STAGING: &str = "staging";

pub const LOCK: &str = "contents/.lock";
pub const HEAD: &str = "editions/.head";
pub const CONTENTS_PREFIX: &str = "contents/";
pub const PENDING_PREFIX: &str = "contents/.pending/";
pub const REJECTED_PREFIX: &str = "contents/.rejected/";
pub const OBJECTS_PREFIX: &str = "objects/";

/// Pointer document for a role: `production`, `staging`, or a working label.
pub fn pointer(name: &str) -> String {
    format!("contents/.{name}.json")
}

pub fn pending(id: EditionId) -> String {
    format!("{PENDING_PREFIX}{id}.json")
}

pub fn rejected(id: EditionId) -> String {
    format!("{REJECTED_PREFIX}{id}.json")
}

pub fn edition_prefix(id: EditionId) -> String {
    format!("editions/{id}/")
}

pub fn origin(id: EditionId) -> String {
    format!("editions/{id}/.origin")
}

pub fn flattened(id: EditionId) -> String {
    format!("editions/{id}/.flattened")
}

/// Path file recording `path`'s fate within edition `id`. `path` must
/// already be validated.
pub fn path_file(id: EditionId, path: &str) -> String {
    format!("editions/{id}/{path}")
}

/// Sharded object key: `objects/{hh}/{hash}.dat`.
pub fn object(hash: &ContentHash) -> String {
    format!("{OBJECTS_PREFIX}{}/{hash}.dat", hash.shard())
}

/// Ref-index companion of an object: staged edition ids, one per line.
pub fn object_ref(hash: &ContentHash) -> String {
    format!("{OBJECTS_PREFIX}{}/{hash}.ref", hash.shard())
}

/// Recover the content hash named by an `objects/{hh}/{hash}.dat` key.
pub fn object_key_hash(key: &str) -> Option<ContentHash> {
    let name = key.rsplit('/').next()?;
    ContentHash::from_hex(name.strip_suffix(".dat")?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn object_keys_are_sharded_and_reversible() {
        let hash = ContentHash::digest(b"# hi\n");
        let key = object(&hash);
        assert!(key.starts_with("objects/"));
        assert!(key.ends_with(".dat"));
        assert_eq!(key.split('/').nth(1).unwrap(), &hash.to_string()[..2]);
        assert_eq!(object_key_hash(&key), Some(hash));
        assert_eq!(object_key_hash("objects/ab/junk.dat"), None);
    }

    #[test]
    fn pointer_keys() {
        assert_eq!(pointer(PRODUCTION), "contents/.production.json");
        assert_eq!(pointer("draft"), "contents/.draft.json");
        assert_eq!(pending(EditionId::new(10001)), "contents/.pending/10001.json");
    }
}
