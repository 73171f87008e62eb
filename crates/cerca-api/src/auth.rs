use std::sync::Arc;

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::{Rng, distr::Alphanumeric};
use tracing::{error, info, warn};

use cerca_db::Database;
use cerca_types::api::{
    Claims, DeleteAccountRequest, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};
use cerca_types::models::RemoveOptions;

use crate::{blocking, status};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
}

const GENERATED_PASSWORD_LEN: usize = 20;

/// Prefix of a hash made with the current parameters. Anything else is
/// rehashed on the next successful login.
const CURRENT_HASH_PREFIX: &str = "$argon2id$v=19$m=65536,t=3,p=4$";

/// Argon2id with the parameters every stored hash is expected to carry
/// (`m=65536, t=3, p=4`).
fn hasher() -> anyhow::Result<Argon2<'static>> {
    let params =
        Params::new(65536, 3, 4, None).map_err(|e| anyhow::anyhow!("argon2 params: {e}"))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash password: {e}"))?;
    Ok(hash.to_string())
}

/// `UNAUTHORIZED` on mismatch. A stored hash that does not parse is a
/// server-side problem, usually an unmigrated legacy hash.
pub(crate) fn verify_password(password: &str, stored: &str) -> Result<(), StatusCode> {
    let parsed = PasswordHash::new(stored).map_err(|e| {
        warn!("Stored password hash does not parse ({}); has `cerca migrate` run?", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

/// A random alphanumeric password for admin-issued credentials.
pub(crate) fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

pub(crate) fn hash_or_500(password: &str) -> Result<String, StatusCode> {
    hash_password(password).map_err(|e| {
        error!("{:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub(crate) fn needs_rehash(stored: &str) -> bool {
    !stored.starts_with(CURRENT_HASH_PREFIX)
}

/// Brings a stored hash up to the current parameters. A failure is logged
/// and otherwise ignored; the login already succeeded.
fn rehash(db: &Database, user_id: i64, password: &str) {
    let hash = match hash_password(password) {
        Ok(hash) => hash,
        Err(e) => {
            warn!("Could not rehash the password of user {}: {:#}", user_id, e);
            return;
        }
    };
    match db.update_password_hash(user_id, &hash) {
        Ok(()) => info!("Rehashed the password of user {}", user_id),
        Err(e) => warn!("Could not store the new hash of user {}: {}", user_id, e),
    }
}

pub(crate) fn validate_username(name: &str) -> Result<(), StatusCode> {
    let len = name.chars().count();
    if !(3..=32).contains(&len) || name.trim() != name {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let RegisterRequest {
        username,
        password,
        link,
    } = req;
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    validate_username(&username)?;
    if password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let name = username.clone();
    let user_id = blocking(&state, move |db| {
        if db.check_username_exists(&name).map_err(status)? {
            return Err(StatusCode::CONFLICT);
        }
        let password_hash = hash_or_500(&password)?;
        db.register_user(&name, &password_hash, &host, &link)
            .map_err(status)
    })
    .await?;

    let token = create_token(&state.jwt_secret, user_id, &username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, StatusCode> {
    let user = blocking(&state, move |db| {
        let user = db.get_credentials(&req.username).map_err(|e| {
            if e.is_not_found() {
                StatusCode::UNAUTHORIZED
            } else {
                status(e)
            }
        })?;
        verify_password(&req.password, &user.password_hash)?;

        if needs_rehash(&user.password_hash) {
            rehash(db, user.id, &req.password);
        }
        Ok(user)
    })
    .await?;

    let token = create_token(&state.jwt_secret, user.id, &user.name)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.name,
        token,
    }))
}

/// Removes the caller's own account after re-checking their password.
/// Admins have to be demoted first.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DeleteAccountRequest>,
) -> Result<StatusCode, StatusCode> {
    let user_id = claims.sub;
    blocking(&state, move |db| {
        let user = db.get_user(user_id).map_err(status)?;
        let credentials = db.get_credentials(&user.name).map_err(status)?;
        verify_password(&req.password, &credentials.password_hash)?;

        if db.is_admin(user_id).map_err(status)? {
            return Err(StatusCode::CONFLICT);
        }

        let options = RemoveOptions {
            keep_content: req.keep_content,
            keep_username: req.keep_username,
        };
        db.remove_user(user_id, options).map_err(status)
    })
    .await?;

    info!("User {} deleted their account", user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_token(secret: &str, user_id: i64, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use cerca_db::Environ;
    use cerca_db::pwhash::is_modern;
    use cerca_types::models::DELETED_USER_NAME;

    use super::*;
    use crate::testutil::{account, state};

    fn register_req(username: &str, password: &str) -> Json<RegisterRequest> {
        Json(RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
            link: String::new(),
        })
    }

    fn headers(host: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, host.parse().unwrap());
        headers
    }

    fn login_req(username: &str, password: &str) -> Json<LoginRequest> {
        Json(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    #[test]
    fn new_hashes_are_modern() {
        let hash = hash_password("correct horse").unwrap();
        assert!(is_modern(&hash));
        assert!(verify_password("correct horse", &hash).is_ok());
        assert_eq!(verify_password("wrong", &hash), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn generated_passwords_are_alphanumeric() {
        let password = generate_password();
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_password());
    }

    #[tokio::test]
    async fn register_then_login() {
        let state = state();
        let req = register_req("alice", "long enough");
        let resp = register(State(state.clone()), HeaderMap::new(), req)
            .await
            .unwrap()
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let Json(logged_in) = login(State(state.clone()), login_req("alice", "long enough"))
            .await
            .unwrap();
        assert_eq!(logged_in.username, "alice");
        assert_eq!(logged_in.user_id, state.db.get_user_id("alice").unwrap());

        let err = login(State(state), login_req("alice", "not the password")).await.unwrap_err();
        assert_eq!(err, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_rejects_bad_input() {
        let state = state();
        account(&state, "taken", "whatever1");

        for (name, password, expected) in [
            ("ab", "long enough", StatusCode::BAD_REQUEST),
            (" padded", "long enough", StatusCode::BAD_REQUEST),
            ("carol", "short", StatusCode::BAD_REQUEST),
            ("taken", "long enough", StatusCode::CONFLICT),
            (DELETED_USER_NAME, "long enough", StatusCode::CONFLICT),
        ] {
            let err = register(State(state.clone()), HeaderMap::new(), register_req(name, password))
                .await
                .map(|_| ())
                .unwrap_err();
            assert_eq!(err, expected, "registering {name:?}");
        }
    }

    #[tokio::test]
    async fn registration_keeps_host_and_link() {
        let state = state();
        let req = Json(RegisterRequest {
            username: "alice".to_string(),
            password: "long enough".to_string(),
            link: "https://forum.example/invite/3".to_string(),
        });
        register(State(state.clone()), headers("forum.example"), req)
            .await
            .map(|_| ())
            .unwrap();

        let alice = state.db.get_user_id("alice").unwrap();
        let (host, link): (String, String) = state
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT host, link FROM registrations WHERE userid = ?1",
                    [alice],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .environ("registration")
            })
            .unwrap();
        assert_eq!(host, "forum.example");
        assert_eq!(link, "https://forum.example/invite/3");
    }

    #[tokio::test]
    async fn login_upgrades_outdated_hashes() {
        let state = state();
        let params = Params::new(65536, 2, 4, None).unwrap();
        let salt = SaltString::generate(&mut OsRng);
        let outdated = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(b"old but valid", &salt)
            .unwrap()
            .to_string();
        assert!(needs_rehash(&outdated));
        state.db.create_user("bob", &outdated).unwrap();

        login(State(state.clone()), login_req("bob", "old but valid")).await.unwrap();

        let stored = state.db.get_credentials("bob").unwrap().password_hash;
        assert!(!needs_rehash(&stored));
        assert!(verify_password("old but valid", &stored).is_ok());

        // Current hashes are left alone.
        login(State(state.clone()), login_req("bob", "old but valid")).await.unwrap();
        assert_eq!(state.db.get_credentials("bob").unwrap().password_hash, stored);
    }

    #[tokio::test]
    async fn nobody_logs_in_as_the_deleted_user() {
        let state = state();
        let err = login(State(state), login_req(DELETED_USER_NAME, "")).await.unwrap_err();
        assert_eq!(err, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn delete_account_checks_password() {
        let state = state();
        let bob = account(&state, "bob", "bobs password");
        let (thread, _) = state.db.create_thread("hi", 0, bob.sub, "my words").unwrap();

        let req = |password: &str| {
            Json(DeleteAccountRequest {
                password: password.to_string(),
                keep_content: true,
                keep_username: false,
            })
        };

        let err = delete_account(State(state.clone()), Extension(bob.clone()), req("nope"))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::UNAUTHORIZED);

        let done = delete_account(
            State(state.clone()),
            Extension(bob.clone()),
            req("bobs password"),
        )
        .await
        .unwrap();
        assert_eq!(done, StatusCode::NO_CONTENT);
        assert!(!state.db.check_user_exists(bob.sub).unwrap());
        assert_eq!(state.db.get_thread(thread).unwrap()[0].content, "my words");
    }

    #[tokio::test]
    async fn admins_cannot_delete_themselves() {
        let state = state();
        let carol = account(&state, "carol", "carols password");
        state.db.add_admin(carol.sub).unwrap();

        let err = delete_account(
            State(state.clone()),
            Extension(carol.clone()),
            Json(DeleteAccountRequest {
                password: "carols password".to_string(),
                keep_content: false,
                keep_username: false,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err, StatusCode::CONFLICT);
        assert!(state.db.check_user_exists(carol.sub).unwrap());
    }
}
