//! Authentication Module
//!
//! Resolves the caller's identity from request headers. Two credential types
//! are accepted:
//! - `X-API-Key`: static keys mapped to a user id, tier and roles
//! - `Authorization: Bearer <jwt>`: HS256 tokens carrying `sub`, `tier`,
//!   `roles` and `exp`
//!
//! Absent credentials resolve to `None` (anonymous); the pipeline decides
//! whether the route allows that. Present but invalid credentials are always
//! an `UNAUTHORIZED` error.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use axum::http::HeaderMap;
use coverline_core::{Clock, ConfigError, CoverlineError, SystemClock, UserTier};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";

const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

// ============================================================================
// JWT SECRET
// ============================================================================

/// JWT signing secret. Never printed.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Create a new JWT secret with validation.
    ///
    /// # Errors
    /// Returns error if the secret is empty.
    pub fn new(secret: String) -> Result<Self, CoverlineError> {
        if secret.is_empty() {
            return Err(CoverlineError::Config(ConfigError::MissingRequired {
                field: "jwt_secret".to_string(),
            }));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    /// Expose the secret value (only for cryptographic operations).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtSecret([REDACTED])")
    }
}

fn build_jwt_secret(secret: String) -> JwtSecret {
    JwtSecret::new(secret)
        .unwrap_or_else(|_| JwtSecret(SecretString::new(INSECURE_DEFAULT_SECRET.into())))
}

// ============================================================================
// AUTH CONFIG
// ============================================================================

/// What an API key grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyGrant {
    pub user_id: Uuid,
    pub tier: UserTier,
    pub roles: Vec<String>,
}

/// Parse one `key:user_uuid:tier[:role|role]` entry.
pub fn parse_api_key_entry(entry: &str) -> Result<(String, ApiKeyGrant), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "api_keys".to_string(),
        value: "[REDACTED]".to_string(),
        reason: reason.to_string(),
    };

    let mut parts = entry.trim().splitn(4, ':');
    let key = parts.next().filter(|k| !k.is_empty()).ok_or_else(|| invalid("empty key"))?;
    let user_id = parts
        .next()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| invalid("expected a user UUID after the key"))?;
    let tier = parts
        .next()
        .ok_or_else(|| invalid("expected a tier after the user id"))?
        .parse::<UserTier>()?;
    let roles = parts
        .next()
        .map(|r| {
            r.split('|')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok((
        key.to_string(),
        ApiKeyGrant {
            user_id,
            tier,
            roles,
        },
    ))
}

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Valid API keys and what they grant
    pub api_keys: HashMap<String, ApiKeyGrant>,

    /// JWT secret key for signing and verification
    pub jwt_secret: JwtSecret,

    /// JWT algorithm (default: HS256)
    pub jwt_algorithm: Algorithm,

    /// JWT token expiration in seconds (default: 1 hour)
    pub jwt_expiration_secs: i64,

    /// JWT clock skew tolerance in seconds (default: 60)
    pub jwt_clock_skew_secs: i64,

    /// Clock for token time checks
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_keys", &format!("[{} keys]", self.api_keys.len()))
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_expiration_secs", &self.jwt_expiration_secs)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: HashMap::new(),
            jwt_secret: build_jwt_secret(INSECURE_DEFAULT_SECRET.to_string()),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: 3600,
            jwt_clock_skew_secs: 60,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `COVERLINE_API_KEYS`: Comma-separated `key:user_uuid:tier[:role|role]` entries
    /// - `COVERLINE_JWT_SECRET`: JWT signing secret
    /// - `COVERLINE_JWT_EXPIRATION_SECS`: JWT token expiration (default: 3600)
    /// - `COVERLINE_JWT_CLOCK_SKEW_SECS`: JWT clock skew tolerance (default: 60)
    pub fn from_env() -> Self {
        let mut api_keys = HashMap::new();
        if let Ok(keys_str) = std::env::var("COVERLINE_API_KEYS") {
            for entry in keys_str.split(',').filter(|e| !e.trim().is_empty()) {
                match parse_api_key_entry(entry) {
                    Ok((key, grant)) => {
                        api_keys.insert(key, grant);
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring invalid API key entry"),
                }
            }
        }

        let secret_str = std::env::var("COVERLINE_JWT_SECRET")
            .unwrap_or_else(|_| INSECURE_DEFAULT_SECRET.to_string());

        Self {
            api_keys,
            jwt_secret: build_jwt_secret(secret_str),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: std::env::var("COVERLINE_JWT_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
            jwt_clock_skew_secs: std::env::var("COVERLINE_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jwt_secret(mut self, secret: JwtSecret) -> Self {
        self.jwt_secret = secret;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>, grant: ApiKeyGrant) -> Self {
        self.api_keys.insert(key.into(), grant);
        self
    }
}

// ============================================================================
// JWT CLAIMS
// ============================================================================

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Subscription tier; missing means free
    #[serde(default)]
    pub tier: UserTier,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, tier: UserTier, expiration_secs: i64, clock: &dyn Clock) -> Self {
        let now = clock.now().timestamp();
        Self {
            sub: user_id.to_string(),
            tier,
            roles: Vec::new(),
            iat: now,
            exp: now.saturating_add(expiration_secs),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles.extend(roles);
        self
    }
}

// ============================================================================
// AUTHENTICATED USER
// ============================================================================

/// How the caller proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    Jwt,
}

/// Identity attached to a request after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub tier: UserTier,
    pub roles: Vec<String>,
    pub method: AuthMethod,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

// ============================================================================
// TOKEN HANDLING
// ============================================================================

fn validate_claim_times(now: i64, exp: i64, leeway_secs: i64) -> ApiResult<()> {
    if exp < now.saturating_sub(leeway_secs) {
        return Err(ApiError::unauthorized("Token has expired"));
    }
    Ok(())
}

/// Validate a JWT token and extract claims.
///
/// `jsonwebtoken` checks the signature only; expiry is checked here against
/// the configured clock.
pub fn validate_jwt_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

    let token_data =
        decode::<Claims>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::unauthorized("Token signature is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidToken => ApiError::unauthorized("Token is invalid"),
            _ => ApiError::unauthorized(format!("Token validation failed: {}", e)),
        })?;

    let claims = token_data.claims;
    validate_claim_times(config.clock.now().timestamp(), claims.exp, config.jwt_clock_skew_secs)?;
    Ok(claims)
}

/// Generate a signed JWT for a user.
pub fn generate_jwt_token(
    config: &AuthConfig,
    user_id: Uuid,
    tier: UserTier,
    roles: Vec<String>,
) -> ApiResult<String> {
    let claims =
        Claims::new(user_id, tier, config.jwt_expiration_secs, &*config.clock).with_roles(roles);

    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    let header = Header::new(config.jwt_algorithm);

    encode(&header, &claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

// ============================================================================
// AUTHENTICATOR
// ============================================================================

/// Resolves the caller's identity from request headers.
///
/// `Ok(None)` means no credentials were presented.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve_identity(&self, headers: &HeaderMap) -> ApiResult<Option<AuthenticatedUser>>;
}

/// API-key and JWT authenticator backed by [`AuthConfig`].
#[derive(Debug, Clone)]
pub struct CredentialAuthenticator {
    config: AuthConfig,
}

impl CredentialAuthenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Authenticate from raw header values. API key wins when both are present.
    pub fn authenticate(
        &self,
        api_key_header: Option<&str>,
        auth_header: Option<&str>,
    ) -> ApiResult<Option<AuthenticatedUser>> {
        if let Some(api_key) = api_key_header {
            let grant = self
                .config
                .api_keys
                .get(api_key.trim())
                .ok_or_else(|| ApiError::unauthorized("Invalid API key"))?;
            return Ok(Some(AuthenticatedUser {
                user_id: grant.user_id,
                tier: grant.tier,
                roles: grant.roles.clone(),
                method: AuthMethod::ApiKey,
            }));
        }

        if let Some(auth_value) = auth_header {
            let token = auth_value.strip_prefix("Bearer ").ok_or_else(|| {
                ApiError::unauthorized("Authorization header must use Bearer scheme")
            })?;
            let claims = validate_jwt_token(&self.config, token.trim())?;
            let user_id = Uuid::parse_str(&claims.sub)
                .map_err(|_| ApiError::unauthorized("Token subject is not a user id"))?;
            return Ok(Some(AuthenticatedUser {
                user_id,
                tier: claims.tier,
                roles: claims.roles,
                method: AuthMethod::Jwt,
            }));
        }

        Ok(None)
    }
}

#[async_trait]
impl Authenticator for CredentialAuthenticator {
    async fn resolve_identity(&self, headers: &HeaderMap) -> ApiResult<Option<AuthenticatedUser>> {
        let api_key = header_str(headers, API_KEY_HEADER)?;
        let authorization = header_str(headers, axum::http::header::AUTHORIZATION.as_str())?;
        self.authenticate(api_key, authorization)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::unauthorized(format!("{name} header is not valid text")))
        })
        .transpose()
}
