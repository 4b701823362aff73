//! Local user accounts backing the login form.
//!
//! Users live in `<dir>/users.json` with argon2 password hashes. A successful
//! login issues a random token that stays valid for 24 hours.

use crate::error::{DashboardError, DashboardResult};
use crate::session::{CredentialValidator, Credentials, Grant};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const USERS_FILE: &str = "users.json";
const TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Message shown when a username/password pair is rejected.
pub const INVALID_CREDENTIALS: &str = "Nom d'utilisateur ou mot de passe incorrect";

/// A registered user.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub username: String,
    pub email: String,
    /// Argon2 hash of the user's password
    pub password_hash: String,
}

/// A token handed out at login.
#[derive(Debug, Clone)]
struct IssuedToken {
    username: String,
    expires_at: SystemTime,
}

/// File-backed user directory and the tokens issued against it.
#[derive(Debug)]
pub struct UserDirectory {
    users_file: PathBuf,
    tokens: RwLock<HashMap<String, IssuedToken>>,
}

impl UserDirectory {
    /// Open the directory, creating `dir` and an empty users file if needed.
    pub fn open(dir: impl AsRef<Path>) -> DashboardResult<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            create_dir_all(dir)?;
        }

        let users_file = dir.join(USERS_FILE);
        if !users_file.exists() {
            let mut file = File::create(&users_file)?;
            file.write_all(b"{}")?;
        }

        Ok(UserDirectory {
            users_file,
            tokens: RwLock::new(HashMap::new()),
        })
    }

    pub fn users(&self) -> DashboardResult<HashMap<String, User>> {
        let contents = fs::read_to_string(&self.users_file).map_err(|e| {
            DashboardError::Persistence(format!("failed to read users file: {}", e))
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| DashboardError::Persistence(format!("failed to parse users data: {}", e)))
    }

    fn save_users(&self, users: &HashMap<String, User>) -> DashboardResult<()> {
        let json = serde_json::to_string_pretty(users)?;
        fs::write(&self.users_file, json)
            .map_err(|e| DashboardError::Persistence(format!("failed to write users file: {}", e)))
    }

    /// Add a user. Usernames and email addresses must be unused.
    pub fn register(&self, username: &str, email: &str, password: &str) -> DashboardResult<()> {
        if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(DashboardError::Validation(
                "username, email and password cannot be empty".to_string(),
            ));
        }

        let mut users = self.users()?;
        if users.contains_key(username) {
            return Err(DashboardError::Validation("username already exists".to_string()));
        }
        if users.values().any(|user| user.email == email) {
            return Err(DashboardError::Validation(
                "email address is already registered".to_string(),
            ));
        }

        let user = User {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
        };
        users.insert(username.to_string(), user);
        self.save_users(&users)?;

        log::info!("registered user {}", username);
        Ok(())
    }

    /// Whether `password` is the password of `username`. Unknown users are
    /// simply not verified.
    pub fn verify(&self, username: &str, password: &str) -> DashboardResult<Option<User>> {
        let users = self.users()?;
        match users.get(username) {
            Some(user) if verify_password(password, &user.password_hash)? => Ok(Some(user.clone())),
            _ => Ok(None),
        }
    }

    /// Issue a fresh token for `username`.
    pub fn issue_token(&self, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let issued = IssuedToken {
            username: username.to_string(),
            expires_at: SystemTime::now() + TOKEN_LIFETIME,
        };

        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|_, t| t.expires_at > SystemTime::now());
        tokens.insert(token.clone(), issued);
        token
    }

    /// The user a token was issued to, if it is known and has not expired.
    pub fn token_user(&self, token: &str) -> Option<String> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(token)
            .filter(|t| t.expires_at > SystemTime::now())
            .map(|t| t.username.clone())
    }

    pub fn revoke(&self, token: &str) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.remove(token);
    }
}

impl CredentialValidator for UserDirectory {
    async fn validate(&self, credentials: &Credentials) -> DashboardResult<Grant> {
        match self.verify(&credentials.username, &credentials.password)? {
            Some(user) => Ok(Grant {
                token: self.issue_token(&user.username),
                user: json!({ "username": user.username, "email": user.email }),
            }),
            None => Err(DashboardError::Validation(INVALID_CREDENTIALS.to_string())),
        }
    }

    async fn validate_token(&self, token: &str) -> DashboardResult<bool> {
        Ok(self.token_user(token).is_some())
    }

    async fn sign_out(&self, token: &str) -> DashboardResult<()> {
        self.revoke(token);
        Ok(())
    }
}

fn hash_password(password: &str) -> DashboardResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DashboardError::Validation(format!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> DashboardResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|_| DashboardError::Persistence("invalid password hash format".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();

        users.register("admin", "admin@example.com", "secret").unwrap();
        assert!(users.verify("admin", "secret").unwrap().is_some());
        assert!(users.verify("admin", "wrong").unwrap().is_none());
        assert!(users.verify("nobody", "secret").unwrap().is_none());

        let stored = fs::read_to_string(dir.path().join(USERS_FILE)).unwrap();
        assert!(!stored.contains("\"secret\""));
    }

    #[test]
    fn duplicate_registrations_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();

        users.register("admin", "admin@example.com", "secret").unwrap();
        assert!(users.register("admin", "other@example.com", "x").is_err());
        assert!(users.register("other", "admin@example.com", "x").is_err());
        assert!(users.register("", "a@b.c", "x").is_err());
    }

    #[test]
    fn tokens_can_be_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();

        let token = users.issue_token("admin");
        assert_eq!(users.token_user(&token).as_deref(), Some("admin"));
        users.revoke(&token);
        assert_eq!(users.token_user(&token), None);
        assert_eq!(users.token_user("made-up"), None);
    }

    #[tokio::test]
    async fn validator_issues_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserDirectory::open(dir.path()).unwrap();
        users.register("admin", "admin@example.com", "secret").unwrap();

        let grant = users
            .validate(&Credentials::new("admin", "secret"))
            .await
            .unwrap();
        assert!(users.validate_token(&grant.token).await.unwrap());
        assert_eq!(grant.user["username"], "admin");

        let err = users
            .validate(&Credentials::new("admin", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_CREDENTIALS);
    }
}
