//! External collaborator contracts.
//!
//! The core consumes these; it never implements persistence or auth itself.
//! [`crate::backends`] carries two implementations (in-memory and SQLite) for
//! tests and the command-line front end.
//!
//! All traits are async and object-safe so they can be held as
//! `Arc<dyn Trait>` and swapped per environment.

use async_trait::async_trait;
use tokio::sync::broadcast;

use kyoyu_types::{
    Payload, Principal, PrincipalId, Profile, ProfileUpdate, Record, RecordId, ShareGrant,
    SharedIn,
};

use crate::error::StoreResult;

/// Record storage for one payload kind.
#[async_trait]
pub trait RecordStore<P: Payload>: Send + Sync {
    /// Records whose owner is `owner`, each with its outbound `shared_with`.
    async fn owned_by(&self, owner: PrincipalId) -> StoreResult<Vec<Record<P>>>;

    /// Records reached through grants whose grantee is `grantee`, joined with
    /// the owner's profile.
    async fn shared_with(&self, grantee: PrincipalId) -> StoreResult<Vec<SharedIn<P>>>;

    /// Insert a new record owned by `owner`.
    async fn insert(&self, owner: PrincipalId, payload: P) -> StoreResult<Record<P>>;

    /// Replace the payload of an existing record.
    async fn update(&self, id: RecordId, payload: P) -> StoreResult<Record<P>>;

    /// Delete a record. Grant cleanup is the backend's business.
    async fn delete(&self, id: RecordId) -> StoreResult<()>;
}

/// Share-grant storage, unique per `(record_id, grantee_id)`.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert a grant. A duplicate yields [`crate::StoreError::Conflict`].
    async fn insert_grant(&self, grant: &ShareGrant) -> StoreResult<()>;
}

/// Profile lookup and update.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The profile row for `id`, or `None` if it does not exist (yet).
    async fn profile(&self, id: PrincipalId) -> StoreResult<Option<Profile>>;

    /// Every profile except `id`, for share-target pickers.
    async fn profiles_except(&self, id: PrincipalId) -> StoreResult<Vec<Profile>>;

    /// Apply `update` to the profile row and return the stored result.
    async fn update_profile(&self, id: PrincipalId, update: ProfileUpdate) -> StoreResult<Profile>;
}

/// Sign-in / sign-out transitions reported by a session provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Principal),
    SignedOut,
    /// Account details (e.g. email) changed for the signed-in principal.
    UserUpdated(Principal),
}

/// Source of the current principal.
pub trait SessionProvider: Send + Sync {
    /// The principal currently signed in, if any.
    fn current(&self) -> Option<Principal>;

    /// Subscribe to auth transitions.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
