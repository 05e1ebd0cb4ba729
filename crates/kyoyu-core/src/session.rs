//! Session handle and profile reconciliation.
//!
//! The backend provisions a profile row for each new account from a trigger,
//! some time after sign-up. "Not provisioned yet" and "does not exist" look
//! the same on the wire (no row), so the difference is carried as explicit
//! state:
//!
//! ```text
//!   Unresolved ──found──────────▶ Ready(profile)
//!       │                            ▲
//!       └──missing──▶ Failed ──found─┘
//!
//!   Pending ──missing──▶ Pending      (entered right after sign-up)
//!       └────found─────▶ Ready
//!
//!   any ──fetch error──▶ Failed
//! ```
//!
//! The current principal is never global: a [`SessionHandle`] is passed to
//! the resolver, the gate, and the view controller as an argument.

use std::collections::HashSet;
use std::sync::Arc;

use kyoyu_types::{Principal, PrincipalId, Profile, ProfileUpdate};

use crate::error::{CoreError, CoreResult, StoreResult};
use crate::store::{AuthEvent, ProfileStore, SessionProvider};

/// Reason recorded when an established account has no profile row.
pub const PROFILE_MISSING: &str = "profile not found";

/// Where the signed-in principal's profile stands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProfileState {
    /// Not fetched yet.
    #[default]
    Unresolved,
    /// Account just created; the backend has not provisioned the row yet.
    Pending,
    Ready(Profile),
    Failed(String),
}

impl ProfileState {
    /// Next state after a profile fetch.
    pub fn on_fetch(self, result: StoreResult<Option<Profile>>) -> Self {
        match (self, result) {
            (_, Ok(Some(profile))) => ProfileState::Ready(profile),
            (ProfileState::Pending, Ok(None)) => ProfileState::Pending,
            (_, Ok(None)) => ProfileState::Failed(PROFILE_MISSING.to_string()),
            (_, Err(e)) => ProfileState::Failed(e.to_string()),
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            ProfileState::Ready(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ProfileState::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ProfileState::Pending)
    }
}

/// An explicitly passed, signed-in session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    principal: Principal,
    profile: ProfileState,
}

impl SessionHandle {
    /// A session whose profile has not been fetched.
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            profile: ProfileState::Unresolved,
        }
    }

    /// A session for an account created moments ago.
    pub fn pending(principal: Principal) -> Self {
        Self {
            principal,
            profile: ProfileState::Pending,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal.id
    }

    pub fn profile(&self) -> &ProfileState {
        &self.profile
    }

    /// Profile name when ready, else the account email.
    pub fn display_name(&self) -> &str {
        match &self.profile {
            ProfileState::Ready(p) => p.display_name(),
            _ => &self.principal.email,
        }
    }
}

/// What a handled auth event means for views.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn(PrincipalId),
    SignedOut,
    /// A different principal replaced the previous one.
    Switched { from: PrincipalId, to: PrincipalId },
    /// Same principal, details changed.
    Updated,
    Unchanged,
}

impl SessionChange {
    /// Whether views must re-run the resolver.
    pub fn needs_refresh(&self) -> bool {
        matches!(
            self,
            SessionChange::SignedIn(_) | SessionChange::SignedOut | SessionChange::Switched { .. }
        )
    }
}

/// Tracks the current session and reconciles its profile.
pub struct SessionManager {
    profiles: Arc<dyn ProfileStore>,
    current: Option<SessionHandle>,
    /// Accounts registered during this process, whose profile may lag.
    registered: HashSet<PrincipalId>,
}

impl SessionManager {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            profiles,
            current: None,
            registered: HashSet::new(),
        }
    }

    pub fn current(&self) -> Option<&SessionHandle> {
        self.current.as_ref()
    }

    /// The current session, or [`CoreError::NotAuthenticated`].
    pub fn require(&self) -> CoreResult<&SessionHandle> {
        self.current.as_ref().ok_or(CoreError::NotAuthenticated)
    }

    /// Remember that `principal` was just registered; its first sign-in
    /// starts in [`ProfileState::Pending`].
    pub fn note_registered(&mut self, principal: &Principal) {
        self.registered.insert(principal.id);
    }

    /// Adopt whatever session the provider holds right now.
    pub async fn bootstrap(&mut self, provider: &dyn SessionProvider) -> CoreResult<SessionChange> {
        match provider.current() {
            Some(principal) => self.handle(AuthEvent::SignedIn(principal)).await,
            None => self.handle(AuthEvent::SignedOut).await,
        }
    }

    /// Apply one auth transition.
    pub async fn handle(&mut self, event: AuthEvent) -> CoreResult<SessionChange> {
        match event {
            AuthEvent::SignedIn(principal) => self.sign_in(principal).await,
            AuthEvent::SignedOut => {
                let change = match self.current.take() {
                    Some(_) => SessionChange::SignedOut,
                    None => SessionChange::Unchanged,
                };
                if change == SessionChange::SignedOut {
                    tracing::info!("signed out");
                }
                Ok(change)
            }
            AuthEvent::UserUpdated(principal) => {
                let same = self
                    .current
                    .as_ref()
                    .is_some_and(|s| s.principal.id == principal.id);
                if !same {
                    return self.sign_in(principal).await;
                }
                if let Some(session) = self.current.as_mut() {
                    session.principal = principal;
                }
                Ok(SessionChange::Updated)
            }
        }
    }

    async fn sign_in(&mut self, principal: Principal) -> CoreResult<SessionChange> {
        if !principal.email_confirmed {
            tracing::warn!(email = %principal.email, "refusing session with unconfirmed email");
            return Err(CoreError::EmailNotConfirmed(principal.email));
        }

        let previous = self.current.as_ref().map(|s| s.principal.id);
        if previous == Some(principal.id) {
            if let Some(session) = self.current.as_mut() {
                session.principal = principal;
            }
            return Ok(SessionChange::Unchanged);
        }

        let mut session = if self.registered.contains(&principal.id) {
            SessionHandle::pending(principal)
        } else {
            SessionHandle::new(principal)
        };
        self.fetch_profile(&mut session).await;

        let to = session.principal.id;
        if session.profile.is_ready() {
            self.registered.remove(&to);
        }
        tracing::info!(principal = %to, profile = ?session.profile, "signed in");
        self.current = Some(session);

        Ok(match previous {
            Some(from) => SessionChange::Switched { from, to },
            None => SessionChange::SignedIn(to),
        })
    }

    async fn fetch_profile(&self, session: &mut SessionHandle) {
        let result = self.profiles.profile(session.principal.id).await;
        if let Err(e) = &result {
            tracing::warn!(principal = %session.principal.id, error = %e, "profile fetch failed");
        }
        let state = std::mem::take(&mut session.profile);
        session.profile = state.on_fetch(result);
    }

    /// Re-fetch the current profile; moves `Pending` to `Ready` once the
    /// backend has provisioned it. No automatic retry.
    pub async fn refresh_profile(&mut self) -> CoreResult<ProfileState> {
        let mut session = self.current.take().ok_or(CoreError::NotAuthenticated)?;
        self.fetch_profile(&mut session).await;
        if session.profile.is_ready() {
            self.registered.remove(&session.principal.id);
        }
        let state = session.profile.clone();
        self.current = Some(session);
        Ok(state)
    }

    /// Update the current profile's name and/or email.
    ///
    /// A blank name keeps the existing one; an unchanged email is not sent.
    pub async fn update_profile(
        &mut self,
        name: Option<&str>,
        email: Option<&str>,
    ) -> CoreResult<Profile> {
        let session = self.current.as_ref().ok_or(CoreError::NotAuthenticated)?;
        let update = ProfileUpdate {
            name: name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from),
            email: email
                .map(str::trim)
                .filter(|e| !e.is_empty() && *e != session.principal.email)
                .map(String::from),
        };

        let id = session.principal.id;
        let profile = self
            .profiles
            .update_profile(id, update.clone())
            .await
            .map_err(CoreError::rejected)?;

        if let Some(session) = self.current.as_mut() {
            if let Some(email) = update.email {
                session.principal.email = email;
            }
            session.profile = ProfileState::Ready(profile.clone());
        }
        self.registered.remove(&id);
        tracing::info!(principal = %id, "profile updated");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn profile() -> Profile {
        Profile::new(PrincipalId::new(), "Ana", "ana@example.com")
    }

    #[test]
    fn test_unresolved_transitions() {
        let p = profile();
        assert_eq!(
            ProfileState::Unresolved.on_fetch(Ok(Some(p.clone()))),
            ProfileState::Ready(p)
        );
        assert_eq!(
            ProfileState::Unresolved.on_fetch(Ok(None)),
            ProfileState::Failed(PROFILE_MISSING.into())
        );
    }

    #[test]
    fn test_pending_waits_for_provisioning() {
        let state = ProfileState::Pending.on_fetch(Ok(None));
        assert!(state.is_pending());
        let state = state.on_fetch(Ok(None));
        assert!(state.is_pending());
        let p = profile();
        assert_eq!(state.on_fetch(Ok(Some(p.clone()))), ProfileState::Ready(p));
    }

    #[test]
    fn test_fetch_error_fails_from_any_state() {
        let err = StoreError::backend("offline");
        for start in [
            ProfileState::Unresolved,
            ProfileState::Pending,
            ProfileState::Ready(profile()),
        ] {
            assert!(matches!(start.on_fetch(Err(err.clone())), ProfileState::Failed(_)));
        }
    }

    #[test]
    fn test_failed_recovers_on_later_fetch() {
        let p = profile();
        let state = ProfileState::Failed("offline".into()).on_fetch(Ok(Some(p.clone())));
        assert_eq!(state.profile(), Some(&p));
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let principal = Principal::new("bo@example.com").confirmed();
        let session = SessionHandle::pending(principal);
        assert_eq!(session.display_name(), "bo@example.com");
    }

    #[test]
    fn test_needs_refresh() {
        let id = PrincipalId::new();
        assert!(SessionChange::SignedIn(id).needs_refresh());
        assert!(SessionChange::SignedOut.needs_refresh());
        assert!(SessionChange::Switched { from: id, to: PrincipalId::new() }.needs_refresh());
        assert!(!SessionChange::Updated.needs_refresh());
        assert!(!SessionChange::Unchanged.needs_refresh());
    }
}
