//! Conversion between entity ids and their stored string form.
//!
//! Sets hold decimal strings so the store compares members by their encoded
//! value.

use std::collections::HashSet;

use sieve_core::{EntityId, SetKey, StoreError};

/// Encode ids as store members. Duplicates collapse.
pub fn encode_ids(ids: &[EntityId]) -> HashSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// Decode store members back to ids, sorted ascending.
///
/// A member that is not a decimal integer is reported against `key`.
pub fn decode_ids(key: &SetKey, members: HashSet<String>) -> Result<Vec<EntityId>, StoreError> {
    let mut ids = members
        .into_iter()
        .map(|m| {
            m.parse::<EntityId>().map_err(|_| StoreError::CorruptMember {
                key: key.to_string(),
                member: m,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    ids.sort_unstable();
    Ok(ids)
}
