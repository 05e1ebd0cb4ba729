//! # kyoyu-core
//!
//! Ownership and sharing reconciliation for kyoyu.
//!
//! Every record has exactly one owner. Owners may grant other principals
//! read access, one grant per (record, grantee). For a signed-in principal
//! the core:
//! - resolves "records I own" and "records shared with me" concurrently
//!   ([`Resolver`]), failing the whole view if either side fails
//! - merges them into one deduplicated list, tagged `Owned` or `SharedIn`
//!   ([`merge`]), owned winning on collision
//! - gates every edit, delete, and share so only the owner may perform it
//!   ([`authorize`])
//! - tracks the session and the asynchronously provisioned profile
//!   ([`SessionManager`])
//! - drops refresh results that a newer refresh superseded
//!   ([`ViewController`])

pub mod backends;
pub mod config;
pub mod error;
pub mod filter;
pub mod gate;
pub mod inbox;
pub mod merge;
pub mod mutation;
pub mod resolver;
pub mod session;
pub mod store;
pub mod view;

pub use backends::{FetchSide, MemoryBackend, SqlPayload, SqliteBackend};
pub use config::{ConfigError, KyoyuConfig};
pub use error::{CoreError, CoreResult, StoreError, StoreResult};
pub use filter::{FinanceFilter, FinanceSummary, TaskFilter, TaskStatus, YearMonth};
pub use gate::{Action, Affordances, Denied, authorize};
pub use inbox::SharedInbox;
pub use merge::{Counterparty, Directory, Relation, ViewEntry, merge};
pub use mutation::{Mutations, ShareOutcome};
pub use resolver::{Resolution, Resolver};
pub use session::{ProfileState, SessionChange, SessionHandle, SessionManager};
pub use store::{AuthEvent, GrantStore, ProfileStore, RecordStore, SessionProvider};
pub use view::{RefreshOutcome, ViewController};
