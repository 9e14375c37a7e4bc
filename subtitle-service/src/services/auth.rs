use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;

use crate::dtos::auth::{LoginRequest, RegisterRequest, UpdateProfileRequest};
use crate::models::user::normalize_email;
use crate::models::{Role, User};
use crate::services::authorization::{authorize, Action};
use crate::services::error::ServiceError;
use crate::services::jwt::{AuthenticationError, JwtService, Principal, TokenResponse};
use crate::services::repository::{Repository, RepositoryError};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

#[derive(Clone)]
pub struct AuthService {
    repo: Arc<dyn Repository>,
    jwt: JwtService,
}

impl AuthService {
    pub fn new(repo: Arc<dyn Repository>, jwt: JwtService) -> Self {
        Self { repo, jwt }
    }

    /// Creates a `user`-role account. The caller never picks the role.
    #[tracing::instrument(skip(self, req), fields(email = %req.email))]
    pub async fn register(&self, req: RegisterRequest) -> Result<User, ServiceError> {
        let password_hash = hash_password(&Password::new(req.password))?;
        let user = User::new(
            &req.email,
            password_hash.into_string(),
            req.first_name,
            req.last_name,
        );

        match self.repo.insert_user(&user).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return Err(ServiceError::Conflict("Email already registered".into()))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    #[tracing::instrument(skip(self, req), fields(email = %req.email))]
    pub async fn login(&self, req: LoginRequest) -> Result<TokenResponse, ServiceError> {
        let email = normalize_email(&req.email);
        let Some(user) = self.repo.find_user_by_email(&email).await? else {
            tracing::warn!("Login failed: unknown email");
            return Err(AuthenticationError::InvalidCredentials.into());
        };

        let valid = verify_password(
            &Password::new(req.password),
            &PasswordHashString::new(user.password_hash.clone()),
        )?;
        if !valid {
            tracing::warn!(user_id = %user.id, "Login failed: wrong password");
            return Err(AuthenticationError::InvalidCredentials.into());
        }

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Login refused: account disabled");
            return Err(AuthenticationError::AccountDisabled.into());
        }

        let token = self.jwt.issue(&user)?;
        tracing::info!(user_id = %user.id, role = %user.role, "User logged in");
        Ok(token)
    }

    pub async fn profile(&self, principal: &Principal) -> Result<User, ServiceError> {
        authorize(principal.role, Action::ViewOwnProfile)?;
        self.repo
            .find_user_by_id(principal.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".into()))
    }

    pub async fn update_profile(
        &self,
        principal: &Principal,
        req: UpdateProfileRequest,
    ) -> Result<User, ServiceError> {
        authorize(principal.role, Action::UpdateOwnProfile)?;
        let mut user = self.profile(principal).await?;

        if let Some(first_name) = req.first_name {
            user.first_name = Some(first_name);
        }
        if let Some(last_name) = req.last_name {
            user.last_name = Some(last_name);
        }

        Ok(self.repo.update_user(&user).await?)
    }

    /// Ensures `email` exists as an active super_admin, creating or
    /// promoting the account. An existing password is left untouched.
    pub async fn bootstrap_super_admin(
        &self,
        email: &str,
        password: &Secret<String>,
    ) -> Result<User, ServiceError> {
        let email = normalize_email(email);

        if let Some(mut user) = self.repo.find_user_by_email(&email).await? {
            if user.role == Role::SuperAdmin && user.is_active {
                tracing::info!(user_id = %user.id, "Bootstrap super admin already present");
                return Ok(user);
            }
            user.role = Role::SuperAdmin;
            user.is_active = true;
            let user = self.repo.update_user(&user).await?;
            tracing::info!(user_id = %user.id, "Existing account promoted to super admin");
            return Ok(user);
        }

        let hash = hash_password(&Password::new(password.expose_secret().clone()))?;
        let mut user = User::new(&email, hash.into_string(), None, None);
        user.role = Role::SuperAdmin;
        self.repo.insert_user(&user).await?;

        tracing::info!(user_id = %user.id, "Bootstrap super admin created");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::services::repository::MemoryRepository;

    fn service() -> AuthService {
        let repo = Arc::new(MemoryRepository::new());
        AuthService::new(repo, JwtService::new(&test_config().jwt))
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "password123".into(),
            first_name: Some("Test".into()),
            last_name: None,
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let auth = service();
        let user = auth.register(register_request("New@Example.com")).await.unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.email, "new@example.com");

        let token = auth
            .login(LoginRequest {
                email: "new@example.com".into(),
                password: "password123".into(),
            })
            .await
            .unwrap();
        assert_eq!(token.user_id, user.id);
        assert_eq!(token.role, Role::User);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let auth = service();
        auth.register(register_request("dup@example.com")).await.unwrap();

        let err = auth
            .register(register_request("DUP@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_email_look_alike() {
        let auth = service();
        auth.register(register_request("a@example.com")).await.unwrap();

        for (email, password) in [("a@example.com", "wrong-pass"), ("b@example.com", "password123")] {
            let err = auth
                .login(LoginRequest {
                    email: email.into(),
                    password: password.into(),
                })
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ServiceError::Authentication(AuthenticationError::InvalidCredentials)
            ));
        }
    }

    #[tokio::test]
    async fn test_bootstrap_creates_then_promotes() {
        let auth = service();
        let existing = auth.register(register_request("root@example.com")).await.unwrap();

        let promoted = auth
            .bootstrap_super_admin("root@example.com", &Secret::new("ignored-password".into()))
            .await
            .unwrap();
        assert_eq!(promoted.id, existing.id);
        assert_eq!(promoted.role, Role::SuperAdmin);

        let created = auth
            .bootstrap_super_admin("fresh@example.com", &Secret::new("bootstrap-pass".into()))
            .await
            .unwrap();
        assert_eq!(created.role, Role::SuperAdmin);

        let token = auth
            .login(LoginRequest {
                email: "fresh@example.com".into(),
                password: "bootstrap-pass".into(),
            })
            .await
            .unwrap();
        assert_eq!(token.role, Role::SuperAdmin);
    }
}
