//! Session manager: the signed-in user and the credential operations.
//!
//! The manager listens to the identity service's auth-state stream while it
//! is started. For every signed-in principal it loads the matching profile
//! from the `users` collection, creating it on first sign-in, and only then
//! publishes the user to consumers.

use lostfound_common::validation::{
    validate_email, validate_fields, validate_image, validate_name, validate_password,
    validate_phone, ValidationResult,
};
use lostfound_common::{
    log_error, messages, AuthUser, DocumentStore, DocumentWrite, IdentityService, LostFoundError,
    ProfileUpdate, RemoteError, User, USERS_COLLECTION,
};
use lostfound_config::UserConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::media::ImageUploader;

/// What consumers observe: the current user and whether the first auth
/// event is still being resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            user: None,
            is_loading: true,
        }
    }
}

pub struct SessionManager {
    identity: Arc<dyn IdentityService>,
    store: Arc<dyn DocumentStore>,
    limits: UserConfig,
    uploader: Option<ImageUploader>,
    state: watch::Sender<SessionState>,
    /// Bumped by every change to the local user; a profile resolved under
    /// an older generation is discarded.
    generation: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        store: Arc<dyn DocumentStore>,
        limits: UserConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            identity,
            store,
            limits,
            uploader: None,
            state,
            generation: AtomicU64::new(0),
            listener: Mutex::new(None),
        }
    }

    /// Enables uploading device-local profile pictures in
    /// [`update_profile`](Self::update_profile).
    pub fn with_uploader(mut self, uploader: ImageUploader) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Starts following the identity service's auth-state stream. Calling
    /// it again while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.listener.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let mut auth_rx = self.identity.auth_state();
        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                let principal = auth_rx.borrow_and_update().clone();
                match weak.upgrade() {
                    Some(session) => session.handle_auth_change(principal).await,
                    None => break,
                }
                if auth_rx.changed().await.is_err() {
                    break;
                }
            }
            debug!("auth-state listener stopped");
        }));
        info!("session manager started");
    }

    /// Stops the auth-state listener. Local state is kept.
    pub fn stop(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
            info!("session manager stopped");
        }
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    /// Change notifications for consumers that re-render on session changes.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Signs in. Returns `Ok(false)` when the credentials are rejected and
    /// only fails on validation or transport errors.
    pub async fn login(&self, email: &str, password: &str) -> Result<bool, LostFoundError> {
        validate_email(email).into_result("email")?;
        if password.is_empty() {
            return Err(LostFoundError::Validation(format!(
                "password: {}",
                messages::REQUIRED
            )));
        }

        let principal = match self.identity.sign_in(email.trim(), password).await {
            Ok(principal) => principal,
            Err(err) if err.is_network() => return Err(remote_failure(err, "login")),
            Err(err) if err.is_credential_rejection() => {
                warn!("login rejected for {}: {}", email.trim(), err);
                return Ok(false);
            }
            Err(err) => {
                log_error(&err, "login");
                return Ok(false);
            }
        };

        let user = self.profile_or_fallback(&principal).await;
        let generation = self.advance();
        self.publish_for(&principal, user, generation);
        info!("user {} logged in", principal.uid);
        Ok(true)
    }

    /// Creates an account and its profile, then signs out again so the
    /// caller has to log in explicitly. Every failure is returned.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        student_id: &str,
    ) -> Result<(), LostFoundError> {
        let student_id_check = if student_id.trim().is_empty() {
            ValidationResult::invalid(messages::REQUIRED)
        } else {
            ValidationResult::ok()
        };
        validate_fields([
            ("name", validate_name(name, self.limits.max_name_length)),
            ("email", validate_email(email)),
            (
                "password",
                validate_password(password, self.limits.min_password_length),
            ),
            ("studentId", student_id_check),
        ])
        .into_result()?;

        let name = name.trim();
        let email = email.trim();
        let principal = self
            .identity
            .sign_up(email, password)
            .await
            .map_err(|e| remote_failure(e, "register: create account"))?;

        self.identity
            .update_profile(Some(name), None)
            .await
            .map_err(|e| remote_failure(e, "register: set display name"))?;

        // A plain set: the auth listener may already have created a minimal
        // profile for the new principal, and registration data wins.
        let profile = DocumentWrite::new()
            .set("name", name)
            .set("email", email)
            .set("studentId", student_id.trim())
            .server_timestamp("createdAt");
        self.store
            .set(USERS_COLLECTION, &principal.uid, profile)
            .await
            .map_err(|e| remote_failure(e, "register: write profile"))?;

        self.identity
            .sign_out()
            .await
            .map_err(|e| remote_failure(e, "register: sign out"))?;
        self.advance();
        self.state.send_modify(|s| {
            s.user = None;
            s.is_loading = false;
        });

        info!("registered user {}", principal.uid);
        Ok(())
    }

    /// Signs out and clears the local user.
    pub async fn logout(&self) -> Result<(), LostFoundError> {
        self.advance();
        self.state.send_modify(|s| {
            s.user = None;
            s.is_loading = false;
        });
        self.identity
            .sign_out()
            .await
            .map_err(|e| remote_failure(e, "logout"))?;
        info!("user logged out");
        Ok(())
    }

    /// Writes the defined fields to the profile document and, for name and
    /// picture, to the identity service's display profile.
    pub async fn update_profile(&self, mut update: ProfileUpdate) -> Result<(), LostFoundError> {
        let user = self.current_user().ok_or(LostFoundError::Unauthenticated)?;

        let mut checks = Vec::new();
        if let Some(name) = &update.name {
            checks.push(("name", validate_name(name, self.limits.max_name_length)));
        }
        if let Some(email) = &update.email {
            checks.push(("email", validate_email(email)));
        }
        if let Some(phone) = &update.phone {
            checks.push(("phone", validate_phone(phone)));
        }
        if let Some(uri) = &update.profile_image_uri {
            checks.push((
                "profileImageUri",
                validate_image(uri, None, self.limits.max_profile_image_size),
            ));
        }
        validate_fields(checks).into_result()?;

        if update.is_empty() {
            return Ok(());
        }

        if let (Some(uri), Some(uploader)) = (&update.profile_image_uri, &self.uploader) {
            update.profile_image_uri = uploader.resolve_profile_image(&user.id, uri).await?;
        }

        let write = DocumentWrite::new()
            .set_optional("name", update.name.clone())
            .set_optional("email", update.email.clone())
            .set_optional("phone", update.phone.clone())
            .set_optional("studentId", update.student_id.clone())
            .set_optional("profileImageUri", update.profile_image_uri.clone());

        match self.store.update(USERS_COLLECTION, &user.id, write.clone()).await {
            Ok(()) => {}
            Err(err) if err.code == lostfound_common::codes::NOT_FOUND => {
                // profile vanished; write the whole merged record back
                let mut merged = user.clone();
                update.apply_to(&mut merged);
                self.store
                    .set(USERS_COLLECTION, &user.id, profile_write(&merged))
                    .await
                    .map_err(|e| remote_failure(e, "update profile"))?;
            }
            Err(err) => return Err(remote_failure(err, "update profile")),
        }

        if update.name.is_some() || update.profile_image_uri.is_some() {
            self.identity
                .update_profile(update.name.as_deref(), update.profile_image_uri.as_deref())
                .await
                .map_err(|e| remote_failure(e, "update display profile"))?;
        }

        self.advance();
        self.state.send_modify(|s| {
            if let Some(current) = s.user.as_mut().filter(|u| u.id == user.id) {
                update.apply_to(current);
            }
        });
        info!("profile updated for {}", user.id);
        Ok(())
    }

    /// Sends a password reset mail. Returns `Ok(false)` when the service
    /// refuses, and fails only on validation or transport errors.
    pub async fn reset_password(&self, email: &str) -> Result<bool, LostFoundError> {
        validate_email(email).into_result("email")?;
        match self.identity.send_password_reset(email.trim()).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_network() => Err(remote_failure(err, "reset password")),
            Err(err) => {
                warn!("password reset refused for {}: {}", email.trim(), err);
                Ok(false)
            }
        }
    }

    /// Reads another user's profile, for attribution backfill.
    pub async fn lookup_profile(&self, uid: &str) -> Result<Option<User>, LostFoundError> {
        let doc = self
            .store
            .get(USERS_COLLECTION, uid)
            .await
            .map_err(|e| remote_failure(e, "lookup profile"))?;
        match doc {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    async fn handle_auth_change(&self, principal: Option<AuthUser>) {
        let generation = self.advance();
        match principal {
            None => {
                self.state.send_modify(|s| {
                    s.user = None;
                    s.is_loading = false;
                });
            }
            Some(principal) => {
                let user = self.profile_or_fallback(&principal).await;
                self.publish_for(&principal, user, generation);
            }
        }
    }

    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publishes the user only while `principal` is still the signed-in one
    /// and nothing changed the local user since `generation`, so a slow
    /// resolution never overwrites a newer session or profile edit.
    fn publish_for(&self, principal: &AuthUser, user: User, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("dropping superseded profile for {}", principal.uid);
            return;
        }
        let still_current = self
            .identity
            .current_user()
            .is_some_and(|current| current.uid == principal.uid);
        if !still_current {
            debug!("dropping stale profile for {}", principal.uid);
            return;
        }
        self.state.send_modify(|s| {
            s.user = Some(user);
            s.is_loading = false;
        });
    }

    async fn profile_or_fallback(&self, principal: &AuthUser) -> User {
        match self.resolve_profile(principal).await {
            Ok(user) => user,
            Err(err) => {
                error!("failed to load profile for {}: {}", principal.uid, err);
                basic_profile(principal)
            }
        }
    }

    /// Fetches the profile, creating it with a conditional write when it
    /// does not exist yet.
    async fn resolve_profile(&self, principal: &AuthUser) -> Result<User, LostFoundError> {
        if let Some(mut user) = self.lookup_profile(&principal.uid).await? {
            backfill(&mut user, principal);
            return Ok(user);
        }

        let user = basic_profile(principal);
        let created = self
            .store
            .create(
                USERS_COLLECTION,
                &principal.uid,
                profile_write(&user).server_timestamp("createdAt"),
            )
            .await
            .map_err(|e| remote_failure(e, "create profile"))?;
        if created {
            debug!("created profile for {}", principal.uid);
            return Ok(user);
        }

        // lost the race to another writer; theirs is the profile
        let mut user = self
            .lookup_profile(&principal.uid)
            .await?
            .unwrap_or_else(|| basic_profile(principal));
        backfill(&mut user, principal);
        Ok(user)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

fn remote_failure(err: RemoteError, context: &str) -> LostFoundError {
    log_error(&err, context);
    LostFoundError::from_remote(err)
}

fn basic_profile(principal: &AuthUser) -> User {
    let email = principal.email.clone().unwrap_or_default();
    let name = principal
        .display_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    User {
        id: principal.uid.clone(),
        name,
        email,
        phone: None,
        student_id: None,
        profile_image_uri: principal.photo_url.clone(),
    }
}

fn backfill(user: &mut User, principal: &AuthUser) {
    user.id = principal.uid.clone();
    if user.email.is_empty() {
        user.email = principal.email.clone().unwrap_or_default();
    }
    if user.name.is_empty() {
        user.name = basic_profile(principal).name;
    }
}

fn profile_write(user: &User) -> DocumentWrite {
    DocumentWrite::new()
        .set("name", user.name.clone())
        .set("email", user.email.clone())
        .set_optional("phone", user.phone.clone())
        .set_optional("studentId", user.student_id.clone())
        .set_optional("profileImageUri", user.profile_image_uri.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_profile_falls_back_to_email_prefix() {
        let principal = AuthUser {
            uid: "u1".into(),
            email: Some("jane@u.edu".into()),
            display_name: None,
            photo_url: None,
        };
        let user = basic_profile(&principal);
        assert_eq!(user.name, "jane");
        assert_eq!(user.email, "jane@u.edu");
    }

    #[test]
    fn test_profile_write_omits_missing_optionals() {
        let user = User {
            id: "u1".into(),
            name: "Jane".into(),
            email: "jane@u.edu".into(),
            phone: None,
            student_id: Some("S1".into()),
            profile_image_uri: None,
        };
        let write = profile_write(&user);
        assert!(!write.contains("phone"));
        assert!(!write.contains("profileImageUri"));
        assert!(write.contains("studentId"));
    }
}
