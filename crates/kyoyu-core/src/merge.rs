//! Reconciliation merger.
//!
//! Combines "records I own" with "records shared with me" into one view,
//! keyed by record identity. Owned entries are inserted first and win any
//! collision, so a record can never show up as both mine and someone else's.
//!
//! ```text
//!   owned ─────┐
//!              ├─▶ IndexMap<RecordId, ViewEntry> ─▶ Vec<ViewEntry>
//!   shared-in ─┘   (first insert wins)               (insertion order)
//! ```
//!
//! The merge is a pure function: same inputs give the same sequence, the
//! same tags, and the same counterparties.

use indexmap::IndexMap;
use serde::Serialize;

use kyoyu_types::{Payload, PrincipalId, Profile, Record, RecordId, SharedIn, UNKNOWN_NAME};

/// How the viewing principal relates to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Relation {
    Owned,
    SharedIn,
}

/// The other side of a record's sharing relationship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Counterparty {
    /// Owned and not shared with anyone.
    None,
    /// Owned and shared with these principals (sorted by id).
    Grantees(Vec<PrincipalId>),
    /// Shared in; display name of the owner.
    Owner(String),
}

/// A record plus its relation to the viewer. Recomputed on every fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViewEntry<P> {
    pub record: Record<P>,
    pub relation: Relation,
    pub counterparty: Counterparty,
}

impl<P: Payload> ViewEntry<P> {
    /// An owned entry; grantees come from the record's `shared_with`.
    pub fn owned(record: Record<P>) -> Self {
        let counterparty = if record.shared_with.is_empty() {
            Counterparty::None
        } else {
            Counterparty::Grantees(record.shared_with.iter().copied().collect())
        };
        Self {
            record,
            relation: Relation::Owned,
            counterparty,
        }
    }

    /// A shared-in entry named after its owner.
    pub fn shared_in(shared: SharedIn<P>) -> Self {
        let owner = shared.owner_name();
        Self {
            record: shared.record,
            relation: Relation::SharedIn,
            counterparty: Counterparty::Owner(owner),
        }
    }

    pub fn id(&self) -> RecordId {
        self.record.id
    }

    pub fn is_owned(&self) -> bool {
        self.relation == Relation::Owned
    }

    /// Counterparty name for display.
    ///
    /// Grantee names are looked up in `directory`; unknown grantees render
    /// as [`UNKNOWN_NAME`]. Returns `None` for an unshared owned record.
    pub fn counterparty_name(&self, directory: &Directory) -> Option<String> {
        match &self.counterparty {
            Counterparty::None => None,
            Counterparty::Owner(name) => Some(name.clone()),
            Counterparty::Grantees(ids) => Some(
                ids.iter()
                    .map(|id| directory.name_of(*id))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        }
    }
}

/// Merge owned and shared-in records into one deduplicated view.
///
/// Owned records are inserted first and tagged [`Relation::Owned`]; a
/// shared-in record whose id is already present is discarded. Within each
/// side the first occurrence of an id wins.
pub fn merge<P: Payload>(
    owned: impl IntoIterator<Item = Record<P>>,
    shared_in: impl IntoIterator<Item = SharedIn<P>>,
) -> Vec<ViewEntry<P>> {
    let mut by_id: IndexMap<RecordId, ViewEntry<P>> = IndexMap::new();

    for record in owned {
        by_id
            .entry(record.id)
            .or_insert_with(|| ViewEntry::owned(record));
    }

    let mut discarded = 0usize;
    for shared in shared_in {
        if by_id.contains_key(&shared.record.id) {
            discarded += 1;
            continue;
        }
        by_id.insert(shared.record.id, ViewEntry::shared_in(shared));
    }

    if discarded > 0 {
        tracing::debug!(discarded, "shared-in records shadowed by owned records");
    }

    by_id.into_values().collect()
}

/// Principal id → profile, in insertion order.
///
/// Backs share-target pickers and grantee-name rendering.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    profiles: IndexMap<PrincipalId, Profile>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, profile: Profile) {
        self.profiles.insert(profile.id, profile);
    }

    pub fn get(&self, id: PrincipalId) -> Option<&Profile> {
        self.profiles.get(&id)
    }

    /// Display name of `id`, or [`UNKNOWN_NAME`].
    pub fn name_of(&self, id: PrincipalId) -> String {
        self.get(id)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    /// Case-insensitive email lookup.
    pub fn find_by_email(&self, email: &str) -> Option<&Profile> {
        self.profiles
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl FromIterator<Profile> for Directory {
    fn from_iter<I: IntoIterator<Item = Profile>>(iter: I) -> Self {
        let mut dir = Directory::new();
        for profile in iter {
            dir.insert(profile);
        }
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyoyu_types::Task;

    fn owned(owner: PrincipalId, text: &str) -> Record<Task> {
        Record::new(owner, Task::new(text))
    }

    fn shared(owner: &Profile, text: &str) -> SharedIn<Task> {
        SharedIn {
            record: Record::new(owner.id, Task::new(text)),
            owner: Some(owner.clone()),
        }
    }

    #[test]
    fn test_disjoint_sets_keep_every_entry() {
        let me = PrincipalId::new();
        let ana = Profile::new(PrincipalId::new(), "Ana", "ana@example.com");

        let o = vec![owned(me, "a"), owned(me, "b")];
        let s = vec![shared(&ana, "c"), shared(&ana, "d"), shared(&ana, "e")];
        let view = merge(o.clone(), s.clone());

        assert_eq!(view.len(), 5);
        assert!(view[..2].iter().all(|e| e.relation == Relation::Owned));
        assert!(view[2..].iter().all(|e| e.relation == Relation::SharedIn));
        assert_eq!(view[0].id(), o[0].id);
        assert_eq!(view[4].id(), s[2].record.id);
    }

    #[test]
    fn test_owned_wins_on_collision() {
        let me = PrincipalId::new();
        let ana = Profile::new(PrincipalId::new(), "Ana", "ana@example.com");

        let mine = owned(me, "owned payload");
        let mut theirs = shared(&ana, "shared payload");
        theirs.record.id = mine.id;

        let view = merge(vec![mine.clone()], vec![theirs]);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].relation, Relation::Owned);
        assert_eq!(view[0].record.payload.text, "owned payload");
        assert_eq!(view[0].counterparty, Counterparty::None);
    }

    #[test]
    fn test_collision_position_follows_owned_side() {
        let me = PrincipalId::new();
        let ana = Profile::new(PrincipalId::new(), "Ana", "ana@example.com");

        let first = shared(&ana, "only shared");
        let mine = owned(me, "mine");
        let mut dup = shared(&ana, "dup");
        dup.record.id = mine.id;

        let view = merge(vec![mine.clone()], vec![first.clone(), dup]);
        let ids: Vec<_> = view.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![mine.id, first.record.id]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let me = PrincipalId::new();
        let ana = Profile::new(PrincipalId::new(), "Ana", "ana@example.com");
        let mut o = owned(me, "x");
        o.shared_with.insert(PrincipalId::new());
        o.shared_with.insert(PrincipalId::new());
        let s = vec![shared(&ana, "y"), shared(&ana, "z")];

        let a = merge(vec![o.clone()], s.clone());
        let b = merge(vec![o], s);
        assert_eq!(a, b);
    }

    #[test]
    fn test_counterparties() {
        let me = PrincipalId::new();
        let ana = Profile::new(PrincipalId::new(), "Ana", "ana@example.com");
        let bo = Profile::new(PrincipalId::new(), "Bo", "bo@example.com");

        let mut mine = owned(me, "shared out");
        mine.shared_with.insert(ana.id);
        mine.shared_with.insert(bo.id);
        let orphan = SharedIn {
            record: Record::new(PrincipalId::new(), Task::new("no profile")),
            owner: None,
        };

        let view = merge(vec![mine, owned(me, "private")], vec![shared(&ana, "in"), orphan]);
        let directory: Directory = [ana.clone(), bo.clone()].into_iter().collect();

        let names = view[0].counterparty_name(&directory).unwrap();
        assert!(names.contains("Ana") && names.contains("Bo"));
        assert_eq!(view[1].counterparty_name(&directory), None);
        assert_eq!(view[2].counterparty_name(&directory).as_deref(), Some("Ana"));
        assert_eq!(view[3].counterparty_name(&directory).as_deref(), Some(UNKNOWN_NAME));
    }

    #[test]
    fn test_empty_inputs() {
        let view: Vec<ViewEntry<Task>> = merge(Vec::new(), Vec::new());
        assert!(view.is_empty());
    }

    #[test]
    fn test_directory_lookup() {
        let ana = Profile::new(PrincipalId::new(), "Ana", "Ana@Example.com");
        let dir: Directory = std::iter::once(ana.clone()).collect();
        assert_eq!(dir.find_by_email("ana@example.com").map(|p| p.id), Some(ana.id));
        assert_eq!(dir.name_of(PrincipalId::new()), UNKNOWN_NAME);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_relation_display() {
        assert_eq!(Relation::Owned.to_string(), "owned");
        assert_eq!(Relation::SharedIn.to_string(), "shared-in");
    }
}
