use anyhow::anyhow;
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

use tasktalk_types::api::Claims;
use tasktalk_types::events::ChangeEvent;
use tasktalk_types::models::User;

use crate::error::{AuthError, Result, SyncError};
use crate::session::Session;
use crate::Backend;

/// Shortest password the identity provider accepts.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Identity-provider settings.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub hash_params: Params,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>, token_ttl: chrono::Duration) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl,
            hash_params: Params::default(),
        }
    }

    /// Cheap hashing so test suites do not spend seconds in argon2.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            jwt_secret: "test-secret".into(),
            token_ttl: chrono::Duration::hours(1),
            hash_params: Params::new(Params::MIN_M_COST, 1, 1, None).expect("valid argon2 params"),
        }
    }
}

/// Partial profile edit; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Sign-up, sign-in and account management against the identity provider,
/// mirrored into the `users` store.
#[derive(Clone)]
pub struct AuthFacade {
    backend: Backend,
}

impl AuthFacade {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<User> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail.into());
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword.into());
        }

        let lookup = email.clone();
        if self
            .backend
            .store(move |db| db.get_account_by_email(&lookup))
            .await?
            .is_some()
        {
            return Err(AuthError::EmailAlreadyInUse.into());
        }

        let password_hash = self.hash(password).await?;
        let now = Utc::now();
        let user = User {
            uid: Uuid::new_v4(),
            email,
            display_name: name.trim().to_string(),
            photo_url: None,
            created_at: now,
            last_login: now,
        };

        let record = user.clone();
        let created = self
            .backend
            .store(move |db| {
                if !db.create_account(record.uid, &record.email, &password_hash, now)? {
                    return Ok(false);
                }
                db.put_user(&record)?;
                Ok(true)
            })
            .await?;
        if !created {
            return Err(AuthError::EmailAlreadyInUse.into());
        }

        info!("Account created for {} ({})", user.email, user.uid);
        self.backend
            .dispatcher
            .publish(ChangeEvent::UserUpdated { user_id: user.uid });
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(SyncError::validation("Email is required"));
        }
        if password.is_empty() {
            return Err(SyncError::validation("Password is required"));
        }

        let lookup = email.clone();
        let account = self
            .backend
            .store(move |db| db.get_account_by_email(&lookup))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !self.verify(password, account.password.clone()).await? {
            warn!("Failed sign-in for {}", email);
            return Err(AuthError::WrongPassword.into());
        }

        let uid = account.uid()?;
        let now = Utc::now();
        let user = self
            .backend
            .store(move |db| {
                db.touch_last_login(uid, now)?;
                match db.get_user(uid)? {
                    Some(user) => Ok(user),
                    None => {
                        // Mirror lost: rebuild it from the account.
                        let user = User {
                            uid,
                            email: account.email,
                            display_name: String::new(),
                            photo_url: None,
                            created_at: now,
                            last_login: now,
                        };
                        db.put_user(&user)?;
                        Ok(user)
                    }
                }
            })
            .await?;

        let token = self.issue_token(&user)?;
        info!("{} ({}) signed in", user.email, user.uid);
        self.backend.dispatcher.publish(ChangeEvent::AuthStateChanged {
            user_id: user.uid,
            signed_in: true,
        });
        Ok(Session { user, token })
    }

    pub async fn sign_out(&self, session: Session) -> Result<()> {
        info!("{} ({}) signed out", session.user.email, session.user_id());
        self.backend.dispatcher.publish(ChangeEvent::AuthStateChanged {
            user_id: session.user_id(),
            signed_in: false,
        });
        Ok(())
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.backend.auth.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken.into())
    }

    /// Rebuilds a session from a bearer token.
    pub async fn resume(&self, token: &str) -> Result<Session> {
        let claims = self.verify_token(token)?;
        let user = self
            .get_user(claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        Ok(Session {
            user,
            token: token.to_string(),
        })
    }

    pub async fn get_user(&self, uid: Uuid) -> Result<Option<User>> {
        self.backend.store(move |db| db.get_user(uid)).await
    }

    /// Every mirrored user except `except`.
    pub async fn list_users(&self, except: Uuid) -> Result<Vec<User>> {
        let users = self.backend.store(|db| db.list_users()).await?;
        Ok(users.into_iter().filter(|u| u.uid != except).collect())
    }

    pub async fn update_profile(&self, uid: Uuid, update: ProfileUpdate) -> Result<()> {
        let found = self
            .backend
            .store(move |db| {
                db.update_user_profile(uid, update.display_name.as_deref(), update.photo_url.as_deref())
            })
            .await?;
        if !found {
            return Err(SyncError::NotFound(format!("user {}", uid)));
        }
        self.backend
            .dispatcher
            .publish(ChangeEvent::UserUpdated { user_id: uid });
        Ok(())
    }

    /// Re-checks the current password before a sensitive change.
    pub async fn reauthenticate(&self, uid: Uuid, password: &str) -> Result<()> {
        let account = self
            .backend
            .store(move |db| db.get_account(uid))
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("account {}", uid)))?;
        if self.verify(password, account.password).await? {
            Ok(())
        } else {
            Err(AuthError::ReauthenticationFailed.into())
        }
    }

    pub async fn set_password(&self, uid: Uuid, password: &str) -> Result<()> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword.into());
        }
        let password_hash = self.hash(password).await?;
        let found = self
            .backend
            .store(move |db| db.set_password(uid, &password_hash))
            .await?;
        if !found {
            return Err(SyncError::NotFound(format!("account {}", uid)));
        }
        info!("Password changed for {}", uid);
        Ok(())
    }

    fn issue_token(&self, user: &User) -> Result<String> {
        let claims = Claims {
            sub: user.uid,
            email: user.email.clone(),
            exp: (Utc::now() + self.backend.auth.token_ttl).timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.backend.auth.jwt_secret.as_bytes()),
        )
        .map_err(|e| SyncError::Store(e.into()))
    }

    async fn hash(&self, password: &str) -> Result<String> {
        let argon2 = self.argon2();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| anyhow!("password hashing failed: {}", e))
        })
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
        .map_err(SyncError::Store)
    }

    async fn verify(&self, password: &str, stored_hash: String) -> Result<bool> {
        let argon2 = self.argon2();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&stored_hash)
                .map_err(|e| anyhow!("corrupt password hash: {}", e))?;
            Ok(argon2.verify_password(password.as_bytes(), &parsed).is_ok())
        })
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
        .map_err(SyncError::Store)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            self.backend.auth.hash_params.clone(),
        )
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Loose address check: one `@`, a non-empty local part, a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|part| !part.is_empty())
}

/// A validation failure on one sign-up form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// The sign-up form as the client submits it, checked before any call to
/// the identity provider.
#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignupForm {
    /// Returns every failing field, first rule per field.
    pub fn validate(&self) -> std::result::Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut fail = |field, message| errors.push(FieldError { field, message });

        let name = self.name.trim();
        if name.is_empty() {
            fail("name", "Name is required");
        } else if name.chars().count() < 2 {
            fail("name", "Name must be at least 2 characters");
        }

        let email = self.email.trim();
        if email.is_empty() {
            fail("email", "Email is required");
        } else if !is_valid_email(email) {
            fail("email", "Invalid email");
        }

        let password = &self.password;
        if password.is_empty() {
            fail("password", "Password is required");
        } else if password.chars().count() < MIN_PASSWORD_LEN {
            fail("password", "Password must be at least 6 characters");
        } else if !(password.chars().any(|c| c.is_ascii_lowercase())
            && password.chars().any(|c| c.is_ascii_uppercase())
            && password.chars().any(|c| c.is_ascii_digit()))
        {
            fail("password", "Password must contain uppercase, lowercase and number");
        }

        if self.confirm_password.is_empty() {
            fail("confirm_password", "Confirm password is required");
        } else if self.confirm_password != self.password {
            fail("confirm_password", "Passwords must match");
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{backend, session};

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let backend = backend().await;
        let auth = AuthFacade::new(backend.clone());

        let user = auth.sign_up(" Ada@Example.com ", "Secret1", "Ada").await.unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.display_name, "Ada");

        let session = auth.sign_in("ada@example.com", "Secret1").await.unwrap();
        assert_eq!(session.user_id(), user.uid);
        assert_eq!(auth.verify_token(&session.token).unwrap().sub, user.uid);
        assert_eq!(auth.resume(&session.token).await.unwrap().user.uid, user.uid);
    }

    #[tokio::test]
    async fn provider_errors_map_to_user_messages() {
        let backend = backend().await;
        let auth = AuthFacade::new(backend.clone());
        auth.sign_up("bob@example.com", "Secret1", "Bob").await.unwrap();

        let err = auth.sign_up("bob@example.com", "Secret1", "Bob").await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::EmailAlreadyInUse)));

        let err = auth.sign_up("carol@example.com", "12345", "").await.unwrap_err();
        assert_eq!(err.to_string(), "Password should be at least 6 characters.");

        let err = auth.sign_up("not-an-email", "Secret1", "").await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::InvalidEmail)));

        let err = auth.sign_in("nobody@example.com", "Secret1").await.unwrap_err();
        assert_eq!(err.to_string(), "No account found with this email. Please sign up first.");

        let err = auth.sign_in("bob@example.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Incorrect password. Please try again.");
        assert!(matches!(err, SyncError::Auth(ref a) if a.code() == "auth/wrong-password"));
    }

    #[tokio::test]
    async fn concurrent_sign_ups_create_one_account() {
        let backend = backend().await;
        let auth = AuthFacade::new(backend.clone());

        let (a, b) = tokio::join!(
            auth.sign_up("eve@example.com", "Secret1", "Eve"),
            auth.sign_up("eve@example.com", "Secret1", "Eve"),
        );
        let (ok, err) = match (a, b) {
            (Ok(user), Err(e)) | (Err(e), Ok(user)) => (user, e),
            (a, b) => panic!("expected one success, got {:?} and {:?}", a.is_ok(), b.is_ok()),
        };
        assert!(matches!(err, SyncError::Auth(AuthError::EmailAlreadyInUse)));

        let users = backend.store(|db| db.list_users()).await.unwrap();
        let eves: Vec<_> = users.iter().filter(|u| u.email == "eve@example.com").collect();
        assert_eq!(eves.len(), 1);
        assert_eq!(eves[0].uid, ok.uid);
    }

    #[tokio::test]
    async fn tokens_from_another_secret_are_rejected() {
        let backend = backend().await;
        let session = session(&backend, "dan@example.com").await;

        let mut other = backend.clone();
        other.auth.jwt_secret = "someone-else".into();
        let err = AuthFacade::new(other).verify_token(&session.token).unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn list_users_excludes_caller_and_profile_updates_apply() {
        let backend = backend().await;
        let auth = AuthFacade::new(backend.clone());
        let me = session(&backend, "eve@example.com").await;
        let peer = session(&backend, "frank@example.com").await;

        let others = auth.list_users(me.user_id()).await.unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].uid, peer.user_id());

        auth.update_profile(
            me.user_id(),
            ProfileUpdate {
                display_name: Some("Eve".into()),
                photo_url: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(auth.get_user(me.user_id()).await.unwrap().unwrap().display_name, "Eve");

        let err = auth
            .update_profile(Uuid::new_v4(), ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn signup_form_rules() {
        let mut form = SignupForm {
            name: "A".into(),
            email: "a@b".into(),
            password: "secret1".into(),
            confirm_password: "secret2".into(),
        };
        let errors = form.validate().unwrap_err();
        let messages: Vec<&str> = errors.iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![
                "Name must be at least 2 characters",
                "Invalid email",
                "Password must contain uppercase, lowercase and number",
                "Passwords must match",
            ]
        );

        form.name = "Al".into();
        form.email = "al@example.com".into();
        form.password = "Secret1".into();
        form.confirm_password = "Secret1".into();
        assert_eq!(form.validate(), Ok(()));
    }

    #[test]
    fn email_check() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a@@b.co"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("a@b..co"));
    }
}
