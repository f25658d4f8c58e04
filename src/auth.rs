use std::ops::Add;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequest, RequestParts, TypedHeader};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{NewUser, PublicUser, Role, User, UserSession};
use crate::routes::AppState;
use crate::store::{RosterStore, SessionStore};
use crate::validate::Registration;
use crate::{breaks, proceeds, Error, Payload};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Identity of whoever sent the request, resolved from their session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i32,
    pub role: Role,
    pub ssid: String,
}

#[derive(Clone)]
pub struct AuthService {
    roster: Arc<dyn RosterStore>,
    sessions: Arc<dyn SessionStore>,
    session_ttl: Duration,
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    Ok(Pbkdf2
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))?
        .to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    let hash = PasswordHash::new(hash)?;
    Ok(Pbkdf2.verify_password(password.as_bytes(), &hash).is_ok())
}

fn new_ssid() -> String {
    let ssid_bytes: [u8; 32] = thread_rng().gen();

    let mut hasher: Sha256 = Digest::new();
    hasher.update(&ssid_bytes);
    hex::encode(hasher.finalize())
}

impl AuthService {
    pub fn new(
        roster: Arc<dyn RosterStore>,
        sessions: Arc<dyn SessionStore>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            roster,
            sessions,
            session_ttl,
        }
    }

    /// Public sign-up always yields a student account.
    pub async fn register(&self, registration: Registration) -> Result<User, Error> {
        let password_hash = hash_password(&registration.password)?;
        let user = self
            .roster
            .insert_user(NewUser {
                name: registration.name,
                surname: registration.surname,
                legajo: registration.legajo,
                email: registration.email,
                role: Role::Student,
                study_plan: registration.study_plan,
                password_hash,
            })
            .await?;
        log::info!("registered student account {}", user.id);
        Ok(user)
    }

    /// `identifier` is tried as a legajo first, then as an email.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoggedIn, Error> {
        let identifier = identifier.trim();
        if identifier.is_empty() || password.is_empty() {
            return Err(Error::invalid("Email/legajo and password are required"));
        }

        let user = match self.roster.find_user_by_legajo(identifier).await? {
            Some(user) => Some(user),
            None => self.roster.find_user_by_email(identifier).await?,
        };
        let user = match user {
            Some(user) => user,
            None => {
                log::warn!("login failed: unknown identifier");
                return Err(Error::unauthorized(INVALID_CREDENTIALS));
            }
        };

        if !verify_password(password, &user.password_hash)? {
            log::warn!("login failed for user {}: password mismatch", user.id);
            return Err(Error::unauthorized(INVALID_CREDENTIALS));
        }

        let now = Utc::now();
        let purged = self.sessions.delete_expired(now).await?;
        if purged > 0 {
            log::debug!("purged {} expired session(s)", purged);
        }

        let session = UserSession {
            ssid: new_ssid(),
            belongs_to: user.id,
            expires_at: now.add(self.session_ttl),
        };
        self.sessions.insert_session(session.clone()).await?;

        Ok(LoggedIn {
            session_id: session.ssid,
            expires_at: session.expires_at,
            user: user.public(),
        })
    }

    pub async fn logout(&self, ssid: &str) -> Result<bool, Error> {
        self.sessions.delete_session(ssid).await
    }

    /// Expired sessions are dropped the moment they are presented.
    pub async fn authenticate(&self, ssid: &str) -> Result<Caller, Error> {
        if ssid.is_empty() {
            return Err(Error::unauthorized("Invalid session"));
        }
        let session = self
            .sessions
            .find_session(ssid)
            .await?
            .ok_or_else(|| Error::unauthorized("Invalid session"))?;

        if Utc::now().gt(&session.expires_at) {
            self.sessions.delete_session(ssid).await?;
            return Err(Error::unauthorized("Session expired"));
        }

        let user = self
            .roster
            .find_user(session.belongs_to)
            .await?
            .ok_or_else(|| Error::unauthorized("Invalid session"))?;

        Ok(Caller {
            user_id: user.id,
            role: user.role,
            ssid: session.ssid,
        })
    }

    pub async fn profile(&self, caller: &Caller) -> Result<PublicUser, Error> {
        self.roster
            .find_user(caller.user_id)
            .await?
            .map(|user| user.public())
            .ok_or_else(|| Error::not_found("User not found"))
    }
}

#[async_trait]
impl<B> FromRequest<B> for Caller
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request(req)
                .await
                .map_err(|_| Error::unauthorized("Missing bearer token"))?;
        let Extension(state) = Extension::<AppState>::from_request(req)
            .await
            .map_err(|err| Error::InternalError {
                kind: "ExtensionError",
                message: err.to_string(),
            })?;
        state.auth.authenticate(bearer.token()).await
    }
}

pub async fn register_student(
    Extension(state): Extension<AppState>,
    body: Result<Json<CreateStudent>, axum::extract::rejection::JsonRejection>,
) -> Payload<CreatedStudent> {
    let Json(student) = body.map_err(|err| Error::invalid(err.to_string()))?;
    let registration = Registration::parse(
        &student.name,
        &student.surname,
        &student.legajo,
        &student.email,
        &student.password,
        student.study_plan.as_deref(),
    )?;
    let user = state.auth.register(registration).await?;
    proceeds(CreatedStudent {
        user: user.public(),
    })
}

pub async fn login_student(
    Extension(state): Extension<AppState>,
    body: Result<Json<LoginStudent>, axum::extract::rejection::JsonRejection>,
) -> Payload<LoggedIn> {
    let Json(login) = body.map_err(|err| Error::invalid(err.to_string()))?;
    let identifier = match (login.email, login.legajo) {
        (Some(email), _) if !email.trim().is_empty() => email,
        (_, Some(legajo)) => legajo,
        _ => return breaks(Error::invalid("Email or legajo is required")),
    };
    proceeds(state.auth.login(&identifier, &login.password).await?)
}

pub async fn drop_session(
    caller: Caller,
    Extension(state): Extension<AppState>,
) -> Payload<SessionDropped> {
    let dropped = state.auth.logout(&caller.ssid).await?;
    proceeds(SessionDropped {
        user_id: caller.user_id,
        drop_success: dropped,
    })
}

pub async fn profile(caller: Caller, Extension(state): Extension<AppState>) -> Payload<Profile> {
    proceeds(Profile {
        user: state.auth.profile(&caller).await?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDropped {
    pub user_id: i32,
    pub drop_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedIn {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub user: PublicUser,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedStudent {
    pub user: PublicUser,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user: PublicUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginStudent {
    pub email: Option<String>,
    pub legajo: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStudent {
    pub name: String,
    pub surname: String,
    pub legajo: String,
    pub email: String,
    pub password: String,
    pub study_plan: Option<String>,
}
