//! Mutation gate.
//!
//! Only the owner of a record may edit, delete, or share it. The gate checks
//! that locally so a disallowed action fails fast without a round trip and so
//! the front end can hide affordances it would refuse anyway. The store's own
//! row policies remain the real enforcement boundary.

use serde::Serialize;

use kyoyu_types::{Payload, PrincipalId};

use crate::merge::{Relation, ViewEntry};
use crate::session::SessionHandle;

/// A mutation the viewer wants to perform on an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Edit,
    Delete,
    Share { grantee: PrincipalId },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Share { .. } => "share",
        }
    }
}

/// Why the gate refused an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error, strum::AsRefStr)]
pub enum Denied {
    #[error("not-owner")]
    #[strum(serialize = "not-owner")]
    NotOwner,
    #[error("cannot-share-with-self")]
    #[strum(serialize = "cannot-share-with-self")]
    CannotShareWithSelf,
    /// The nil id names no account.
    #[error("invalid-grantee")]
    #[strum(serialize = "invalid-grantee")]
    InvalidGrantee,
}

fn is_owner<P: Payload>(session: &SessionHandle, entry: &ViewEntry<P>) -> bool {
    entry.relation == Relation::Owned && entry.record.owner_id == session.principal_id()
}

/// Permit `action` on `entry` for the principal of `session`.
pub fn authorize<P: Payload>(
    session: &SessionHandle,
    entry: &ViewEntry<P>,
    action: &Action,
) -> Result<(), Denied> {
    let me = session.principal_id();

    if !is_owner(session, entry) {
        tracing::debug!(
            record = %entry.record.id,
            action = action.name(),
            relation = %entry.relation,
            "mutation denied: not owner"
        );
        return Err(Denied::NotOwner);
    }

    if let Action::Share { grantee } = action {
        if *grantee == me {
            return Err(Denied::CannotShareWithSelf);
        }
        if grantee.is_nil() {
            return Err(Denied::InvalidGrantee);
        }
    }

    Ok(())
}

/// Which mutation controls to offer for an entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Affordances {
    pub edit: bool,
    pub delete: bool,
    pub share: bool,
}

impl Affordances {
    pub fn for_entry<P: Payload>(session: &SessionHandle, entry: &ViewEntry<P>) -> Self {
        // Every action is owner-only; the grantee is checked once picked.
        let owner = is_owner(session, entry);
        Self {
            edit: owner,
            delete: owner,
            share: owner,
        }
    }

    pub fn any(&self) -> bool {
        self.edit || self.delete || self.share
    }
}
