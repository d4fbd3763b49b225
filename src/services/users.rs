//! Authentication and user management service

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::{AdminConfig, AuthConfig},
    error::{AppError, AppResult},
    models::{
        user::{normalize_email, LoginRequest, SignupRequest},
        NewUser, Role, User, UserClaims,
    },
    repository::Repository,
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
    config: AuthConfig,
}

impl UsersService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Register a MEMBER account and return it with a bearer token
    pub async fn signup(&self, request: SignupRequest) -> AppResult<(String, User)> {
        let request = request.normalized();
        request.validate()?;

        let user = self
            .repository
            .users
            .create_user(NewUser {
                name: request.name,
                email: request.email,
                password_hash: hash_password(&request.password)?,
                role: Role::Member,
            })
            .await?;

        tracing::info!(user_id = %user.id, "User signed up");

        let token = self.create_token(&user)?;
        Ok((token, user))
    }

    /// Authenticate by email and password
    pub async fn login(&self, request: LoginRequest) -> AppResult<(String, User)> {
        let user = self
            .repository
            .users
            .find_user_by_email(&normalize_email(&request.email))
            .await?
            .ok_or_else(|| AppError::Authentication(INVALID_CREDENTIALS.to_string()))?;

        if !verify_password(&user.password, &request.password)? {
            tracing::warn!(user_id = %user.id, "Login rejected: wrong password");
            return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string()));
        }

        let token = self.create_token(&user)?;
        Ok((token, user))
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: Uuid) -> AppResult<User> {
        self.repository
            .users
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    /// Create the bootstrap ADMIN unless its email is already registered
    pub async fn ensure_admin(&self, admin: &AdminConfig) -> AppResult<Option<User>> {
        let email = normalize_email(&admin.email);
        if self.repository.users.find_user_by_email(&email).await?.is_some() {
            return Ok(None);
        }

        let user = self
            .repository
            .users
            .create_user(NewUser {
                name: admin.name.trim().to_string(),
                email,
                password_hash: hash_password(&admin.password)?,
                role: Role::Admin,
            })
            .await?;

        tracing::info!(user_id = %user.id, email = %user.email, "Bootstrap admin created");
        Ok(Some(user))
    }

    fn create_token(&self, user: &User) -> AppResult<String> {
        UserClaims::for_user(user, self.config.jwt_expiration_hours)
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
