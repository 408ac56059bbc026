//! AT Protocol session data and JWT inspection
//!
//! This module holds the session bundle returned by the server, plus the
//! JWT helpers the provider uses to decide whether a persisted session can
//! be resumed as-is, needs a refresh, or is beyond saving.
//!
//! # Example
//!
//! ```rust
//! use atproto_client::session::is_jwt_expired;
//!
//! let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...";
//! if is_jwt_expired(token) {
//!     println!("Token is expired, need to refresh");
//! }
//! ```

pub mod provider;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// JWT parsing error
    #[error("JWT parsing error: {0}")]
    JwtParseError(String),

    /// JWT validation error
    #[error("JWT validation error: {0}")]
    JwtValidationError(#[from] jsonwebtoken::errors::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Active session data for authenticated requests
///
/// This is the bundle `com.atproto.server.createSession` returns and what
/// the vault persists between launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Access JWT token for authenticated requests
    pub access_jwt: String,

    /// Refresh JWT token for getting new access tokens
    pub refresh_jwt: String,

    /// The user's DID
    pub did: String,

    /// The user's handle
    pub handle: String,

    /// The user's email address (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether the session is active
    #[serde(default = "default_active")]
    pub active: bool,

    /// Account status (e.g., "takendown", "suspended", "deactivated")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

fn default_active() -> bool {
    true
}

impl SessionData {
    /// Check whether the access token has already lapsed
    pub fn access_expired(&self) -> bool {
        is_jwt_expired(&self.access_jwt)
    }

    /// Check whether the refresh token has already lapsed
    ///
    /// When this is true the session cannot be recovered without a full
    /// sign-in.
    pub fn refresh_expired(&self) -> bool {
        is_jwt_expired(&self.refresh_jwt)
    }
}

/// JWT claims structure
///
/// The decoded payload of a JWT token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (DID)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issued at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Expiration timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Scope (e.g., "com.atproto.access" for access tokens)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Additional claims
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Parse JWT claims without validation
///
/// Extracts expiration time and other claims from a JWT without verifying
/// the signature. Should only be used for informational purposes; the
/// server remains the authority on token validity.
pub fn parse_jwt_claims(token: &str) -> Result<JwtClaims> {
    let header = decode_header(token)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;

    let token_data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(&[]), // Dummy key since we're not validating
        &validation,
    )?;

    Ok(token_data.claims)
}

/// Get the expiration time from a JWT token
///
/// Returns None if the token doesn't have an expiration claim or if parsing fails.
pub fn get_jwt_expiration(token: &str) -> Option<DateTime<Utc>> {
    let claims = parse_jwt_claims(token).ok()?;
    claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
}

/// Check if a JWT token is expired
///
/// A token is considered expired if:
/// - It doesn't have an expiration claim (returns true for safety)
/// - The expiration time is in the past
pub fn is_jwt_expired(token: &str) -> bool {
    match get_jwt_expiration(token) {
        Some(exp_time) => exp_time <= Utc::now(),
        None => true, // If we can't get expiration, consider it expired for safety
    }
}

/// Check if a JWT token will expire soon (within the given duration)
pub fn is_jwt_expiring_soon(token: &str, threshold: Duration) -> bool {
    match get_jwt_expiration(token) {
        Some(exp_time) => exp_time <= Utc::now() + threshold,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    fn make_token(exp: DateTime<Utc>, scope: &str) -> String {
        let claims = JwtClaims {
            sub: Some("did:plc:test123".to_string()),
            iat: Some(Utc::now().timestamp()),
            exp: Some(exp.timestamp()),
            scope: Some(scope.to_string()),
            extra: serde_json::json!({}),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test_secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_jwt_claims() {
        let token = make_token(Utc::now() + Duration::hours(1), "com.atproto.access");

        let parsed = parse_jwt_claims(&token).unwrap();

        assert_eq!(parsed.sub, Some("did:plc:test123".to_string()));
        assert_eq!(parsed.scope, Some("com.atproto.access".to_string()));
        assert!(parsed.exp.is_some());
        assert!(parsed.iat.is_some());
    }

    #[test]
    fn test_parse_jwt_claims_garbage() {
        assert!(parse_jwt_claims("not a jwt").is_err());
    }

    #[test]
    fn test_get_jwt_expiration() {
        let exp_time = Utc::now() + Duration::hours(2);
        let token = make_token(exp_time, "com.atproto.access");

        let parsed_exp = get_jwt_expiration(&token).unwrap();

        // Allow 1 second difference for test execution time
        let diff = (parsed_exp.timestamp() - exp_time.timestamp()).abs();
        assert!(diff <= 1, "Expiration time should match within 1 second");
    }

    #[test]
    fn test_is_jwt_expired_with_valid_token() {
        let token = make_token(Utc::now() + Duration::hours(1), "com.atproto.access");
        assert!(!is_jwt_expired(&token));
    }

    #[test]
    fn test_is_jwt_expired_with_expired_token() {
        let token = make_token(Utc::now() - Duration::hours(1), "com.atproto.access");
        assert!(is_jwt_expired(&token));
    }

    #[test]
    fn test_is_jwt_expired_with_unparseable_token() {
        assert!(is_jwt_expired("garbage"));
    }

    #[test]
    fn test_is_jwt_expiring_soon() {
        let token = make_token(Utc::now() + Duration::minutes(3), "com.atproto.access");

        assert!(is_jwt_expiring_soon(&token, Duration::minutes(5)));
        assert!(!is_jwt_expiring_soon(&token, Duration::minutes(2)));
    }

    #[test]
    fn test_session_data_expiry_checks() {
        let session = SessionData {
            access_jwt: make_token(Utc::now() - Duration::hours(1), "com.atproto.access"),
            refresh_jwt: make_token(Utc::now() + Duration::days(30), "com.atproto.refresh"),
            did: "did:plc:test123".to_string(),
            handle: "alice.bsky.social".to_string(),
            email: None,
            active: true,
            status: None,
        };

        assert!(session.access_expired());
        assert!(!session.refresh_expired());
    }

    #[test]
    fn test_session_data_serialization() {
        let session = SessionData {
            access_jwt: "access".to_string(),
            refresh_jwt: "refresh".to_string(),
            did: "did:plc:abc123".to_string(),
            handle: "alice.bsky.social".to_string(),
            email: Some("alice@example.com".to_string()),
            active: true,
            status: None,
        };

        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("accessJwt"));
        assert!(json.contains("refreshJwt"));
        assert!(!json.contains("status"));

        let deserialized: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(session, deserialized);
    }

    #[test]
    fn test_session_data_active_defaults_true() {
        let json = r#"{
            "accessJwt": "access",
            "refreshJwt": "refresh",
            "did": "did:plc:abc123",
            "handle": "alice.bsky.social"
        }"#;

        let session: SessionData = serde_json::from_str(json).unwrap();
        assert!(session.active);
    }
}
