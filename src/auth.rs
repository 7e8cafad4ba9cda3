//! Bearer-token gate in front of the `/api` routes.
//!
//! Every check the validator performs is a field of `TokenValidation`, so
//! turning one off is a visible configuration decision.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashSet, fmt};
use thiserror::Error;
use tracing::{debug, warn};

/// Token checks applied to every protected request.
#[derive(Clone)]
pub struct TokenValidation {
    pub verify_signature: bool,
    pub verify_expiry: bool,
    pub verify_audience: bool,
    pub audiences: Vec<String>,
    /// Empty means no issuer is accepted.
    pub allowed_issuers: Vec<String>,
    /// A token must carry at least one of these. Empty means none is accepted.
    pub allowed_scopes: Vec<String>,
    pub scope_claim: String,
    pub algorithm: Algorithm,
    /// HMAC secret for `HS*`, PEM public key for `RS*`/`PS*`/`ES*`.
    pub signing_key: Option<String>,
    pub leeway_secs: u64,
}

impl fmt::Debug for TokenValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenValidation")
            .field("verify_signature", &self.verify_signature)
            .field("verify_expiry", &self.verify_expiry)
            .field("verify_audience", &self.verify_audience)
            .field("audiences", &self.audiences)
            .field("allowed_issuers", &self.allowed_issuers)
            .field("allowed_scopes", &self.allowed_scopes)
            .field("scope_claim", &self.scope_claim)
            .field("algorithm", &self.algorithm)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("issuer `{0}` is not allowed")]
    IssuerNotAllowed(String),
    #[error("token carries no allowed scope")]
    ScopeNotAllowed,
    #[error("auth misconfigured: {0}")]
    Config(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken(_) => {
                AppError::unauthorized(err.to_string())
            }
            AuthError::IssuerNotAllowed(_) | AuthError::ScopeNotAllowed => {
                AppError::forbidden(err.to_string())
            }
            AuthError::Config(_) => AppError::internal(err.to_string()),
        }
    }
}

/// The caller behind an accepted token, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: Option<String>,
    pub issuer: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    iss: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

/// Validator built once from `TokenValidation` and shared by all requests.
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
    allowed_issuers: HashSet<String>,
    allowed_scopes: HashSet<String>,
    scope_claim: String,
}

impl TokenValidator {
    pub fn new(settings: &TokenValidation) -> Result<Self, AuthError> {
        let mut validation = Validation::new(settings.algorithm);
        validation.leeway = settings.leeway_secs;
        validation.validate_exp = settings.verify_expiry;
        if !settings.verify_expiry {
            validation.required_spec_claims.clear();
        }
        if settings.verify_audience {
            if settings.audiences.is_empty() {
                return Err(AuthError::Config(
                    "audience verification needs at least one audience".into(),
                ));
            }
            validation.set_audience(&settings.audiences);
        } else {
            validation.validate_aud = false;
        }

        let key = if settings.verify_signature {
            let material = settings.signing_key.as_deref().ok_or_else(|| {
                AuthError::Config("signature verification needs a signing key".into())
            })?;
            decoding_key(settings.algorithm, material)?
        } else {
            warn!("token signature verification is DISABLED");
            validation.insecure_disable_signature_validation();
            DecodingKey::from_secret(&[])
        };

        if settings.allowed_issuers.is_empty() {
            warn!("no allowed issuers configured; every token will be rejected");
        }
        if settings.allowed_scopes.is_empty() {
            warn!("no allowed scopes configured; every token will be rejected");
        }

        Ok(Self {
            key,
            validation,
            allowed_issuers: settings.allowed_issuers.iter().cloned().collect(),
            allowed_scopes: settings.allowed_scopes.iter().cloned().collect(),
            scope_claim: settings.scope_claim.clone(),
        })
    }

    /// Decode `token` and apply the issuer and scope allow-lists.
    pub fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?
            .claims;

        let issuer = claims.iss.unwrap_or_default();
        if !self.allowed_issuers.contains(&issuer) {
            return Err(AuthError::IssuerNotAllowed(issuer));
        }

        let scopes = scopes_from(claims.extra.get(&self.scope_claim));
        if !scopes.iter().any(|scope| self.allowed_scopes.contains(scope)) {
            return Err(AuthError::ScopeNotAllowed);
        }

        Ok(Principal {
            subject: claims.sub,
            issuer,
            scopes,
        })
    }
}

fn decoding_key(algorithm: Algorithm, material: &str) -> Result<DecodingKey, AuthError> {
    let key = match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Ok(DecodingKey::from_secret(material.as_bytes()))
        }
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(material.as_bytes()),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(material.as_bytes()),
        _ => DecodingKey::from_rsa_pem(material.as_bytes()),
    };
    key.map_err(|err| AuthError::Config(format!("unusable signing key: {}", err)))
}

/// Scopes may come as one space-separated string or as an array.
fn scopes_from(claim: Option<&Value>) -> Vec<String> {
    match claim {
        Some(Value::String(joined)) => joined.split_whitespace().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract bearer token from Authorization header
fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware guarding the `/api` routes.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(validator) = state.tokens.as_deref() else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::MissingToken)?;

    let principal = validator.validate(token).map_err(|err| {
        debug!(error = %err, "rejected bearer token");
        err
    })?;
    debug!(subject = ?principal.subject, issuer = %principal.issuer, "authenticated request");
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}
