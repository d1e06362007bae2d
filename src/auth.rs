use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Identity, Profile, Role},
    session::SessionStore,
};

/// Audience GoTrue puts on access tokens of signed-in users.
pub const AUTHENTICATED_AUDIENCE: &str = "authenticated";

/// Claims
///
/// Payload of a GoTrue access token. Only the fields the portal relies on are modelled.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): id of the `auth.users` row the token was issued for.
    pub sub: Uuid,
    /// Expiration Time (exp): the token must not be used after this instant.
    pub exp: usize,
    /// Issued At (iat)
    pub iat: usize,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
}

/// decode_claims
///
/// Verifies an access token against the project's JWT secret (HS256, expiry and
/// audience checked) and returns its claims. Used when restoring a persisted
/// session, so a tampered or foreign token is never adopted.
pub fn decode_claims(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_audience(&[AUTHENTICATED_AUDIENCE]);

    decode::<Claims>(token, &decoding_key, &validation).map(|data| data.claims)
}

/// CurrentUser
///
/// The signed-in user as the session store sees them at the time of the request.
/// Handlers behind the route guard take this instead of reading the store directly.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub identity: Identity,
    /// Present only once role resolution succeeded with a role record.
    pub role: Option<Role>,
    pub profile: Option<Profile>,
}

impl CurrentUser {
    pub fn id(&self) -> Uuid {
        self.identity.id
    }

    pub fn full_name(&self) -> Option<String> {
        self.profile.as_ref().map(|p| p.full_name.clone())
    }
}

/// CurrentUser Extractor Implementation
///
/// Reads one snapshot from the session store. There is no token on the request to
/// check: the process serves a single user and the store is the authority on who
/// that is. Rejects with 401 when nobody is signed in.
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    SessionStore: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let snapshot = SessionStore::from_ref(state).snapshot();
        let role = snapshot.role();
        let identity = snapshot.identity.ok_or(AppError::Unauthorized)?;

        Ok(CurrentUser {
            identity,
            role,
            profile: snapshot.profile,
        })
    }
}
