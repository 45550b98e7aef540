#![cfg(not(tarpaulin_include))]

//! Principal directory, password hashing and login sessions.

#[cfg(feature = "web")]
use crate::app::AppState;
use crate::error::{DashboardError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
#[cfg(feature = "web")]
use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Name of the login cookie.
pub const SESSION_COOKIE: &str = "gestion_session";

/// Longest session lifetime handed out, one leap year.
pub const MAX_SESSION_HOURS: u64 = 24 * 366;

/// What a principal may do. `Admin` may upload and reset the workbook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Viewer,
}

/// An authenticated user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// One entry of the principal directory file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    /// Argon2 PHC string
    pub password_hash: String,
    pub role: Role,
}

/// Username to credentials mapping, stored as JSON:
///
/// ```json
/// { "ana": { "password_hash": "$argon2id$...", "role": "admin" } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalDirectory {
    users: BTreeMap<String, PrincipalRecord>,
}

impl PrincipalDirectory {
    /// Load the directory from disk
    ///
    /// A missing file yields an empty directory (nobody can log in) and a
    /// warning; a malformed one is an error.
    ///
    /// # Arguments
    /// * `path` - Location of the JSON file
    ///
    /// # Returns
    /// * `Result<PrincipalDirectory>` - The parsed directory or an error
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("principal directory {} not found; no user can log in", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| DashboardError::Config(format!("invalid principal directory: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DashboardError::Config(format!("cannot serialize principal directory: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Adds or replaces a user, hashing the password.
    pub fn upsert(&mut self, username: &str, password: &str, role: Role) -> Result<()> {
        let password_hash = hash_password(password)?;
        self.users.insert(
            username.to_string(),
            PrincipalRecord {
                password_hash,
                role,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Checks credentials. Unknown users and wrong passwords both give
    /// `Ok(None)`; a corrupt stored hash is an error.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<Principal>> {
        let Some(record) = self.users.get(username.trim()) else {
            return Ok(None);
        };
        if verify_password(password, &record.password_hash)? {
            Ok(Some(Principal {
                username: username.trim().to_string(),
                role: record.role,
            }))
        } else {
            Ok(None)
        }
    }
}

/// Hash a password using Argon2
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String>` - The PHC-formatted hash or an `Auth` error
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| DashboardError::Auth("password hashing failed".to_string()))
}

/// Verify a password against a stored hash
///
/// # Returns
/// * `Result<bool>` - Whether the password matches; `Auth` error if the hash
///   cannot be parsed
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|_| DashboardError::Auth("invalid password hash format".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// A login session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub principal: Principal,
    pub expires_at: SystemTime,
}

lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, AuthSession>> = RwLock::new(HashMap::new());
}

/// Create a login session lasting `hours` (capped at [`MAX_SESSION_HOURS`])
/// and return its id.
pub fn create_session(principal: Principal, hours: u64) -> String {
    let session_id = Uuid::new_v4().to_string();
    let now = SystemTime::now();
    let lifetime = Duration::from_secs(hours.min(MAX_SESSION_HOURS) * 60 * 60);
    let expires_at = now.checked_add(lifetime).unwrap_or(now);
    info!("login: {} ({:?})", principal.username, principal.role);
    if let Ok(mut sessions) = SESSIONS.write() {
        sessions.insert(
            session_id.clone(),
            AuthSession {
                principal,
                expires_at,
            },
        );
    }
    session_id
}

/// The principal of a live session. Expired sessions are dropped.
pub fn validate_session(session_id: &str) -> Option<Principal> {
    let now = SystemTime::now();
    {
        let sessions = SESSIONS.read().ok()?;
        match sessions.get(session_id) {
            Some(s) if s.expires_at > now => return Some(s.principal.clone()),
            Some(_) => {}
            None => return None,
        }
    }
    end_session(session_id);
    None
}

pub fn end_session(session_id: &str) {
    if let Ok(mut sessions) = SESSIONS.write() {
        sessions.remove(session_id);
    }
}

/// Drop every expired login session and return their ids.
pub fn purge_expired_sessions() -> Vec<String> {
    let now = SystemTime::now();
    let Ok(mut sessions) = SESSIONS.write() else {
        return Vec::new();
    };
    let expired: Vec<String> = sessions
        .iter()
        .filter(|(_, s)| s.expires_at <= now)
        .map(|(id, _)| id.clone())
        .collect();
    for id in &expired {
        sessions.remove(id);
    }
    expired
}

/// Identity attached to authenticated requests.
#[cfg(feature = "web")]
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub session_id: String,
    pub principal: Principal,
}

#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Serve the login page HTML
#[cfg(feature = "web")]
pub async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

/// Handle login form submissions
///
/// On success a login session and a dashboard session are opened under the
/// same id and the browser is sent to the home area.
///
/// # Arguments
/// * `state` - Shared application state (directory, session stores)
/// * `jar` - Cookie jar for storing the session cookie
/// * `form` - Username and password
///
/// # Returns
/// * `Response` - Redirect on success, 401 otherwise
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match state.directory.authenticate(&form.username, &form.password) {
        Ok(Some(principal)) => {
            let session_id = create_session(principal.clone(), state.settings.session_hours);
            state.sessions.insert(&session_id, principal);
            let mut cookie = Cookie::new(SESSION_COOKIE, session_id);
            cookie.set_path("/");
            cookie.set_http_only(true);
            (jar.add(cookie), Redirect::to("/inicio")).into_response()
        }
        Ok(None) => {
            warn!("failed login for {}", form.username);
            (StatusCode::UNAUTHORIZED, "Usuario o contraseña incorrectos").into_response()
        }
        Err(e) => {
            warn!("login error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error de autenticación").into_response()
        }
    }
}

/// Ends both sessions and clears the cookie.
#[cfg(feature = "web")]
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        end_session(cookie.value());
        state.sessions.close(cookie.value());
    }
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    (jar.remove(cookie), Redirect::to("/login"))
}

/// Authentication middleware
///
/// Lets the request through with an [`AuthContext`] extension when the
/// cookie names a live session, otherwise redirects to the login page.
#[cfg(feature = "web")]
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(principal) = validate_session(cookie.value()) {
            // The dashboard session may be gone after a restart of the store.
            if state.sessions.get(cookie.value()).is_none() {
                state.sessions.insert(cookie.value(), principal.clone());
            }
            request.extensions_mut().insert(AuthContext {
                session_id: cookie.value().to_string(),
                principal,
            });
            return next.run(request).await;
        }
        // Expired or unknown login: its filters and outputs go too.
        state.sessions.close(cookie.value());
    }
    Redirect::to("/login").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> PrincipalDirectory {
        let mut d = PrincipalDirectory::default();
        d.upsert("ana", "secreta", Role::Admin).unwrap();
        d.upsert("luis", "otra", Role::Viewer).unwrap();
        d
    }

    #[test]
    fn authenticates_known_users_only() {
        let d = directory();
        let ana = d.authenticate("ana", "secreta").unwrap().unwrap();
        assert!(ana.is_admin());
        assert!(d.authenticate("ana", "mala").unwrap().is_none());
        assert!(d.authenticate("nadie", "secreta").unwrap().is_none());
        assert_eq!(d.authenticate("luis", "otra").unwrap().unwrap().role, Role::Viewer);
    }

    #[test]
    fn directory_survives_json() {
        let d = directory();
        let back = PrincipalDirectory::from_json(&d.to_json().unwrap()).unwrap();
        assert_eq!(back, d);
        assert!(back.to_json().unwrap().contains("\"role\": \"admin\""));
    }

    #[test]
    fn corrupt_hash_is_an_auth_error() {
        let d = PrincipalDirectory::from_json(r#"{"x": {"password_hash": "nope", "role": "viewer"}}"#)
            .unwrap();
        assert!(matches!(d.authenticate("x", "y"), Err(DashboardError::Auth(_))));
    }

    #[test]
    fn missing_file_is_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let d = PrincipalDirectory::load(&dir.path().join("users.json")).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn sessions_validate_and_end() {
        let p = Principal {
            username: "ana".into(),
            role: Role::Admin,
        };
        let id = create_session(p.clone(), 1);
        assert_eq!(validate_session(&id), Some(p));
        end_session(&id);
        assert_eq!(validate_session(&id), None);
        assert_eq!(validate_session("desconocida"), None);
    }

    #[test]
    fn huge_lifetime_is_capped_not_overflowed() {
        let p = Principal {
            username: "luis".into(),
            role: Role::Viewer,
        };
        let id = create_session(p.clone(), u64::MAX);
        assert_eq!(validate_session(&id), Some(p));
        end_session(&id);
    }

    #[test]
    fn purge_removes_only_expired_sessions() {
        let p = Principal {
            username: "ana".into(),
            role: Role::Admin,
        };
        let expired = create_session(p.clone(), 0);
        let live = create_session(p.clone(), 1);
        let purged = purge_expired_sessions();
        assert!(!purged.contains(&live));
        assert_eq!(validate_session(&expired), None);
        assert_eq!(validate_session(&live), Some(p));
        end_session(&live);
    }
}
