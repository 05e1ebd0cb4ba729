//! Share grants.
//!
//! A grant says "owner lets grantee read record". At most one grant exists
//! per `(record_id, grantee_id)`; the store enforces that with a unique
//! constraint and reports duplicates as a conflict.

use serde::{Deserialize, Serialize};

use crate::ids::{PrincipalId, RecordId};
use crate::record::RecordKind;

/// One sharing relationship over one record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub record_id: RecordId,
    pub kind: RecordKind,
    pub owner_id: PrincipalId,
    pub grantee_id: PrincipalId,
    /// When the grant was created (Unix millis).
    pub created_at: u64,
}

impl ShareGrant {
    pub fn new(
        record_id: RecordId,
        kind: RecordKind,
        owner_id: PrincipalId,
        grantee_id: PrincipalId,
    ) -> Self {
        Self {
            record_id,
            kind,
            owner_id,
            grantee_id,
            created_at: crate::now_millis(),
        }
    }

    /// The uniqueness key.
    pub fn key(&self) -> (RecordId, PrincipalId) {
        (self.record_id, self.grantee_id)
    }

    /// An owner is never their own grantee.
    pub fn is_self_grant(&self) -> bool {
        self.owner_id == self.grantee_id
    }
}
