//! JWT authentication middleware
//!
//! Pluggable bearer-token validation for the bridge's client surface.
//! Requests are rejected with 401 before the proxy handlers run; on
//! success the decoded claims are attached to the request extensions for
//! downstream handlers.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::proxy::Middleware;

/// Claims carried by an accepted token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user or client id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Roles granted to the subject
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Configuration for the JWT validator
#[derive(Debug, Clone)]
pub struct JwtValidatorConfig {
    /// HMAC secret the tokens are signed with
    pub secret: String,
    /// Expected issuer; unchecked when `None`
    pub issuer: Option<String>,
    /// Expected audience; unchecked when `None`
    pub audience: Option<String>,
}

/// Validates bearer tokens against a shared-secret HS256 configuration
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: JwtValidatorConfig) -> Self {
        let mut validation = Validation::default();
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str) -> Result<Claims, String> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| e.to_string())
    }

    /// Wrap the validator as a bridge middleware.
    pub fn into_middleware(self) -> Middleware {
        let validator = Arc::new(self);
        Arc::new(move |router: Router| {
            let validator = validator.clone();
            router.layer(middleware::from_fn(move |req: Request, next: Next| {
                let validator = validator.clone();
                async move { authenticate(validator, req, next).await }
            }))
        })
    }
}

async fn authenticate(validator: Arc<JwtValidator>, mut req: Request, next: Next) -> Response {
    let header_value = match req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => value,
        None => {
            return (StatusCode::UNAUTHORIZED, "Authorization header required").into_response();
        }
    };

    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return (
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format",
        )
            .into_response();
    };

    match validator.validate(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(reason) => {
            tracing::debug!(reason = %reason, "rejected bearer token");
            (StatusCode::UNAUTHORIZED, format!("Invalid token: {reason}")).into_response()
        }
    }
}

/// Mint a token for tests and local tooling.
pub fn create_token(
    secret: &str,
    subject: &str,
    ttl: std::time::Duration,
    issuer: Option<&str>,
) -> Result<String, String> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| e.to_string())?
        .as_secs();

    let claims = Claims {
        sub: subject.to_string(),
        exp: now + ttl.as_secs(),
        iat: now,
        iss: issuer.map(str::to_string),
        aud: None,
        roles: Vec::new(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| e.to_string())
}
