//! Shared identity, record, and grant types for kyoyu.
//!
//! This crate is the relational foundation: typed IDs, principals and their
//! profiles, task and finance payloads, and share grants. It has **no
//! internal kyoyu dependencies**.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Principal (PrincipalId) ← signed-in account
//!     └── has Profile (provisioned asynchronously by the backend)
//!     └── owns Record<Task | FinanceEntry> (RecordId)
//!
//! Record (RecordId)
//!     └── owner_id → Principal
//!     └── shared_with → {Principal}, one ShareGrant each
//!
//! ShareGrant (record_id, grantee_id) ← unique
//! ```
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`Principal`]     | Authenticated account (id + email)           |
//! | [`Profile`]       | Display row (name + email)                   |
//! | [`Record`]        | Owned record with outbound shares            |
//! | [`SharedIn`]      | Record reached through a grant, plus owner   |
//! | [`ShareGrant`]    | One (record, owner, grantee) relationship    |
//! | [`Task`]          | To-do payload                                |
//! | [`FinanceEntry`]  | Income/expense payload                       |
//! |-------------------|----------------------------------------------|

pub mod grant;
pub mod ids;
pub mod principal;
pub mod record;

pub use grant::ShareGrant;
pub use ids::{PrincipalId, RecordId};
pub use principal::{Principal, Profile, ProfileUpdate, UNKNOWN_NAME};
pub use record::{
    FinanceEntry, Flow, Payload, PayloadError, Priority, Record, RecordKind, SharedIn, Task,
};

/// Current time as Unix milliseconds. Used by constructors throughout the crate.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
