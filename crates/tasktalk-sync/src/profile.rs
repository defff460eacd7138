use tracing::info;

use tasktalk_types::models::User;

use crate::Backend;
use crate::auth::{AuthFacade, MIN_PASSWORD_LEN, ProfileUpdate};
use crate::error::{Result, SyncError};
use crate::session::Session;

/// Largest avatar upload accepted, in bytes.
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

/// Edits the signed-in user's own profile.
pub struct ProfileEditor {
    auth: AuthFacade,
    backend: Backend,
    session: Session,
}

impl ProfileEditor {
    pub fn new(backend: Backend, session: Session) -> Self {
        Self {
            auth: AuthFacade::new(backend.clone()),
            backend,
            session,
        }
    }

    pub fn user(&self) -> &User {
        &self.session.user
    }

    /// The session with any edits made through this editor applied.
    pub fn into_session(self) -> Session {
        self.session
    }

    pub async fn update_display_name(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::validation("Please enter a valid name"));
        }
        self.auth
            .update_profile(
                self.session.user_id(),
                ProfileUpdate {
                    display_name: Some(name.to_string()),
                    photo_url: None,
                },
            )
            .await?;
        self.session.user.display_name = name.to_string();
        Ok(())
    }

    /// Uploads a new avatar and points the profile at it. Returns the URL.
    pub async fn update_avatar(&mut self, image: &[u8]) -> Result<String> {
        if image.is_empty() {
            return Err(SyncError::validation("Please choose an image"));
        }
        if image.len() > MAX_AVATAR_BYTES {
            return Err(SyncError::validation("Image must be 5 MB or smaller"));
        }

        let key = format!("profileImages/{}", self.session.user_id());
        let object = self.backend.storage.put(&key, image).await?;
        let url = self.backend.storage.download_url(&object);

        self.auth
            .update_profile(
                self.session.user_id(),
                ProfileUpdate {
                    display_name: None,
                    photo_url: Some(url.clone()),
                },
            )
            .await?;
        self.session.user.photo_url = Some(url.clone());
        info!("Avatar updated for {}", self.session.user_id());
        Ok(url)
    }

    pub async fn change_password(&self, old: &str, new: &str, confirm: &str) -> Result<()> {
        if old.is_empty() || new.is_empty() || confirm.is_empty() {
            return Err(SyncError::validation("Please fill all fields"));
        }
        if new != confirm {
            return Err(SyncError::validation("New passwords do not match!"));
        }
        if new.chars().count() < MIN_PASSWORD_LEN {
            return Err(SyncError::validation("Password must be at least 6 characters long"));
        }

        let uid = self.session.user_id();
        self.auth.reauthenticate(uid, old).await?;
        self.auth.set_password(uid, new).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::testing::{backend, session};

    #[tokio::test]
    async fn display_name_is_trimmed_and_required() {
        let backend = backend().await;
        let me = session(&backend, "gail@example.com").await;
        let mut editor = ProfileEditor::new(backend.clone(), me);

        let err = editor.update_display_name("   ").await.unwrap_err();
        assert_eq!(err.to_string(), "Please enter a valid name");

        editor.update_display_name("  Gail G ").await.unwrap();
        assert_eq!(editor.user().display_name, "Gail G");

        let uid = editor.user().uid;
        let stored = AuthFacade::new(backend).get_user(uid).await.unwrap().unwrap();
        assert_eq!(stored.display_name, "Gail G");
    }

    #[tokio::test]
    async fn avatar_is_stored_under_profile_images() {
        let backend = backend().await;
        let me = session(&backend, "hal@example.com").await;
        let uid = me.user_id();
        let mut editor = ProfileEditor::new(backend.clone(), me);

        let url = editor.update_avatar(b"\x89PNG fake").await.unwrap();
        assert!(url.starts_with(&format!("http://files.test/profileImages/{}?v=", uid)));
        assert_eq!(
            backend.storage.read(&format!("profileImages/{}", uid)).await.unwrap(),
            b"\x89PNG fake"
        );
        assert_eq!(editor.into_session().user.photo_url.as_deref(), Some(url.as_str()));

        let too_big = vec![0u8; MAX_AVATAR_BYTES + 1];
        let mut editor = ProfileEditor::new(backend.clone(), session(&backend, "ivy@example.com").await);
        assert!(matches!(editor.update_avatar(&too_big).await, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn password_change_requires_old_password() {
        let backend = backend().await;
        let me = session(&backend, "jon@example.com").await;
        let editor = ProfileEditor::new(backend.clone(), me);

        let check = |r: Result<()>| r.unwrap_err().to_string();
        assert_eq!(check(editor.change_password("", "x", "x").await), "Please fill all fields");
        assert_eq!(
            check(editor.change_password("Secret1", "Newpass1", "Newpass2").await),
            "New passwords do not match!"
        );
        assert_eq!(
            check(editor.change_password("Secret1", "abc", "abc").await),
            "Password must be at least 6 characters long"
        );
        let err = editor
            .change_password("wrong", "Newpass1", "Newpass1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::ReauthenticationFailed)));
        assert_eq!(err.to_string(), "Old password is incorrect!");

        editor.change_password("Secret1", "Newpass1", "Newpass1").await.unwrap();
        let auth = AuthFacade::new(backend);
        assert!(auth.sign_in("jon@example.com", "Secret1").await.is_err());
        auth.sign_in("jon@example.com", "Newpass1").await.unwrap();
    }
}
