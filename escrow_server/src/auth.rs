//! Access tokens.
//!
//! Callers authenticate with an HS256 JWT, sent either as `Authorization: Bearer <token>` or in the
//! `meg_access_token` header. The token names the user and the roles they hold. Tokens are issued by the
//! marketplace's identity service using the shared `MEG_JWT_SECRET`; [`TokenIssuer`] exists for operators and tests.
use std::future::{ready, Ready};

use actix_web::{dev::Payload, http::header::HeaderMap, FromRequest, HttpMessage, HttpRequest};
use chrono::{Duration, Utc};
use escrow_engine::{
    db_types::{Role, Roles},
    Caller,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::AuthConfig,
    errors::{AuthError, ServerError},
};

pub const ACCESS_TOKEN_HEADER: &str = "meg_access_token";
const DEFAULT_TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// The user id
    pub sub: String,
    pub roles: Roles,
    pub iat: i64,
    pub exp: i64,
}

impl JwtClaims {
    pub fn new<S: Into<String>>(user_id: S, roles: Roles, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self { sub: user_id.into(), roles, iat: now.timestamp(), exp: (now + lifetime).timestamp() }
    }

    pub fn caller(&self) -> Caller {
        Caller::new(self.sub.clone(), self.roles.clone())
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}

impl FromRequest for JwtClaims {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let claims = req.extensions().get::<JwtClaims>().cloned().ok_or_else(|| {
            warn!("💻️ No JWT claims found in request extensions. Is the route outside the authenticated scope?");
            ServerError::AuthenticationError(AuthError::MissingToken)
        });
        ready(claims)
    }
}

/// Pulls the raw token out of the request headers.
pub fn extract_token(headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(value) = headers.get(ACCESS_TOKEN_HEADER) {
        let token = value.to_str().map_err(|e| AuthError::PoorlyFormattedToken(e.to_string()))?;
        return Ok(token.trim().to_string());
    }
    let value = headers.get("Authorization").ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|e| AuthError::PoorlyFormattedToken(e.to_string()))?;
    value
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .ok_or_else(|| AuthError::PoorlyFormattedToken("Expected a Bearer token".into()))
}

#[derive(Clone)]
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(config: &AuthConfig) -> Self {
        let key = DecodingKey::from_secret(config.jwt_secret.reveal().as_bytes());
        Self { key, validation: Validation::new(Algorithm::HS256) }
    }

    pub fn validate(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("💻️ Access token rejected. {e}");
            AuthError::ValidationError(e.to_string())
        })?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::ValidationError("Token has no subject".into()));
        }
        Ok(data.claims)
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self { key: EncodingKey::from_secret(config.jwt_secret.reveal().as_bytes()) }
    }

    /// Issue a new access token. The caller is responsible for having authenticated the user.
    pub fn issue_token(&self, user_id: &str, roles: Roles, lifetime: Option<Duration>) -> Result<String, AuthError> {
        let lifetime = lifetime.unwrap_or_else(|| Duration::hours(DEFAULT_TOKEN_LIFETIME_HOURS));
        let claims = JwtClaims::new(user_id, roles, lifetime);
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| AuthError::CouldNotIssueToken(e.to_string()))
    }
}
