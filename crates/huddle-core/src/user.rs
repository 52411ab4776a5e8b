use huddle_db::users::{self, UserRow};
use huddle_models::user::{PublicKey, UserProfile};
use huddle_util::validation;

use crate::auth::{self, Identity};
use crate::error::CoreError;
use crate::{next_id, AppState};

pub const SEARCH_LIMIT: i64 = 20;

#[derive(Debug, Default)]
pub struct Registration<'a> {
    pub username: Option<&'a str>,
    pub email: Option<&'a str>,
    pub password: Option<&'a str>,
    pub public_key: Option<&'a str>,
}

/// A freshly issued token pair for `user`.
#[derive(Debug)]
pub struct Session {
    pub user: UserRow,
    pub access_token: String,
    pub refresh_token: String,
}

fn identity_of(user: &UserRow) -> Identity {
    Identity {
        id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
    }
}

/// Sign a new pair and make the refresh token the only one accepted for `user`.
async fn issue_session(state: &AppState, user: UserRow) -> Result<Session, CoreError> {
    let config = &state.config;
    let access_token = auth::create_access_token(
        &identity_of(&user),
        &config.jwt_secret,
        config.access_token_ttl_seconds,
    )?;
    let refresh_token =
        auth::create_refresh_token(user.id, &config.refresh_secret, config.refresh_token_ttl_seconds)?;
    let digest = auth::refresh_token_digest(&refresh_token);
    users::set_refresh_token(&state.db, user.id, Some(&digest)).await?;
    Ok(Session {
        user,
        access_token,
        refresh_token,
    })
}

pub async fn register(state: &AppState, input: Registration<'_>) -> Result<UserRow, CoreError> {
    let (Some(username), Some(email), Some(password)) = (
        input.username.map(str::trim).filter(|v| !v.is_empty()),
        input.email.map(str::trim).filter(|v| !v.is_empty()),
        input.password.filter(|v| !v.is_empty()),
    ) else {
        return Err(CoreError::validation("All fields are required"));
    };
    validation::validate_username(username)?;
    validation::validate_email(email)?;
    validation::validate_password(password)?;
    let email = email.to_ascii_lowercase();

    if users::find_by_username_or_email(&state.db, username, &email)
        .await?
        .is_some()
    {
        return Err(CoreError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let password_hash = auth::hash_password(password)?;
    let public_key = input.public_key.map(str::trim).unwrap_or_default();
    let user = users::create_user(&state.db, next_id(), username, &email, &password_hash, public_key)
        .await?;
    tracing::info!(user_id = user.id, username = %user.username, "user registered");
    Ok(user)
}

pub async fn login(
    state: &AppState,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<Session, CoreError> {
    let (Some(username), Some(password)) = (
        username.map(str::trim).filter(|v| !v.is_empty()),
        password.filter(|v| !v.is_empty()),
    ) else {
        return Err(CoreError::validation("Username and password are required"));
    };

    let user = users::get_user_by_username(&state.db, username)
        .await?
        .ok_or_else(|| CoreError::not_found("User does not exist"))?;
    if !auth::verify_password(password, &user.password_hash)? {
        tracing::debug!(user_id = user.id, "login rejected");
        return Err(auth::AuthError::InvalidCredentials.into());
    }

    let session = issue_session(state, user).await?;
    tracing::info!(user_id = session.user.id, "user logged in");
    Ok(session)
}

pub async fn logout(state: &AppState, user_id: i64) -> Result<(), CoreError> {
    users::set_refresh_token(&state.db, user_id, None).await?;
    tracing::info!(user_id, "user logged out");
    Ok(())
}

/// Rotate the pair. The presented token must be the one issued last, so a
/// token survives only until its first use or the next login or logout.
pub async fn refresh(state: &AppState, refresh_token: Option<&str>) -> Result<Session, CoreError> {
    let token = refresh_token
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::Unauthenticated("Refresh token is missing".into()))?;
    let claims = auth::validate_refresh_token(token, &state.config.refresh_secret)
        .map_err(|_| CoreError::Unauthenticated("Invalid refresh token".into()))?;

    let user = users::get_user_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| CoreError::Unauthenticated("Invalid refresh token".into()))?;
    if user.refresh_token.as_deref() != Some(auth::refresh_token_digest(token).as_str()) {
        tracing::warn!(user_id = user.id, "stale refresh token presented");
        return Err(CoreError::Unauthenticated(
            "Refresh token is expired or used".into(),
        ));
    }

    issue_session(state, user).await
}

pub async fn me(state: &AppState, user_id: i64) -> Result<UserRow, CoreError> {
    users::get_user_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| CoreError::not_found("User does not exist"))
}

/// Case-insensitive substring match on usernames, excluding the caller.
pub async fn search(
    state: &AppState,
    caller: i64,
    query: Option<&str>,
) -> Result<Vec<UserProfile>, CoreError> {
    let query = validation::required(query, "username")?;
    let rows = users::search_users(&state.db, query, caller, SEARCH_LIMIT).await?;
    Ok(rows.iter().map(UserRow::profile).collect())
}

pub async fn public_key(state: &AppState, username: &str) -> Result<PublicKey, CoreError> {
    let user = users::get_user_by_username(&state.db, username.trim())
        .await?
        .ok_or_else(|| CoreError::not_found("User does not exist"))?;
    Ok(PublicKey {
        username: user.username,
        public_key: user.public_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn alice<'a>() -> Registration<'a> {
        Registration {
            username: Some("alice"),
            email: Some("Alice@Example.com"),
            password: Some("correct horse"),
            public_key: Some("pk-alice"),
        }
    }

    #[tokio::test]
    async fn register_requires_every_field_and_unique_identity() {
        let state = test_support::state().await;
        let err = register(
            &state,
            Registration {
                email: None,
                ..alice()
            },
        )
        .await
        .expect_err("missing email");
        assert!(matches!(err, CoreError::Validation(_)));

        let user = register(&state, alice()).await.expect("register");
        assert_eq!(user.email, "alice@example.com");

        let err = register(
            &state,
            Registration {
                username: Some("alice2"),
                ..alice()
            },
        )
        .await
        .expect_err("duplicate email");
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn login_distinguishes_unknown_user_from_bad_password() {
        let state = test_support::state().await;
        register(&state, alice()).await.expect("register");

        let err = login(&state, Some("nobody"), Some("whatever1")).await.expect_err("unknown");
        assert!(matches!(err, CoreError::NotFound(_)));
        let err = login(&state, Some("alice"), Some("wrong pass")).await.expect_err("bad");
        assert!(matches!(err, CoreError::Unauthenticated(_)));

        let session = login(&state, Some("alice"), Some("correct horse")).await.expect("login");
        let identity =
            auth::validate_access_token(&session.access_token, &state.config.jwt_secret).expect("jwt");
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn refresh_rotates_and_logout_revokes() {
        let state = test_support::state().await;
        register(&state, alice()).await.expect("register");
        let first = login(&state, Some("alice"), Some("correct horse")).await.expect("login");

        let second = refresh(&state, Some(&first.refresh_token)).await.expect("rotate");
        let err = refresh(&state, Some(&first.refresh_token)).await.expect_err("reused");
        assert!(matches!(err, CoreError::Unauthenticated(_)));

        logout(&state, second.user.id).await.expect("logout");
        let err = refresh(&state, Some(&second.refresh_token)).await.expect_err("revoked");
        assert!(matches!(err, CoreError::Unauthenticated(_)));
        assert!(me(&state, second.user.id).await.expect("me").refresh_token.is_none());
    }

    #[tokio::test]
    async fn search_excludes_the_caller_and_public_key_resolves() {
        let state = test_support::state().await;
        let me_row = register(&state, alice()).await.expect("register");
        test_support::user(&state, "alicia").await;
        test_support::user(&state, "bob").await;

        let found = search(&state, me_row.id, Some("ALI")).await.expect("search");
        assert_eq!(found.iter().map(|p| p.username.as_str()).collect::<Vec<_>>(), ["alicia"]);
        let err = search(&state, me_row.id, Some(" ")).await.expect_err("blank");
        assert!(matches!(err, CoreError::Validation(_)));

        let key = public_key(&state, "alice").await.expect("key");
        assert_eq!(key.public_key, "pk-alice");
        assert!(matches!(
            public_key(&state, "ghost").await,
            Err(CoreError::NotFound(_))
        ));
    }
}
