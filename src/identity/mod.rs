use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::HttpRequest;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::Result;

pub const FINGERPRINT_HEADER: &str = "X-Device-Fingerprint";

const MAX_FINGERPRINT_LEN: usize = 128;
const UNKNOWN_IP: &str = "unknown";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub exp: i64,    // Expiration time
    pub iat: i64,    // Issued at
}

/// The four identity facets of one request. Ephemeral: built per request,
/// discarded with the response.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user_id: Option<Uuid>,
    pub session_id: String,
    pub ip_address: String,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    /// Set when a guest session was minted for this request; the handler
    /// attaches it to the response.
    pub minted_session: bool,
}

impl ResolvedIdentity {
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

pub struct IdentityResolver {
    jwt_secret: String,
    cookie_name: String,
    session_ttl_hours: i64,
    secure_cookies: bool,
}

impl IdentityResolver {
    pub fn new(
        jwt_secret: String,
        cookie_name: String,
        session_ttl_hours: i64,
        secure_cookies: bool,
    ) -> Self {
        Self {
            jwt_secret,
            cookie_name,
            session_ttl_hours,
            secure_cookies,
        }
    }

    /// Derives the caller's identity bundle. Never fails: a bad token just
    /// downgrades the caller to guest, a missing session mints one, and an
    /// unresolvable address becomes the "unknown" sentinel.
    pub fn resolve(&self, req: &HttpRequest) -> ResolvedIdentity {
        let user_id = self.authenticated_user(req);

        let (session_id, minted_session) = match req.cookie(&self.cookie_name) {
            Some(cookie) if !cookie.value().is_empty() => (cookie.value().to_string(), false),
            _ => (Uuid::new_v4().to_string(), true),
        };

        ResolvedIdentity {
            user_id,
            session_id,
            ip_address: client_ip(req),
            device_fingerprint: device_fingerprint(req),
            user_agent: header_value(req, "User-Agent").map(|ua| ua.chars().take(255).collect()),
            minted_session,
        }
    }

    /// Cookie for a freshly minted guest session. 24h rolling window,
    /// httpOnly, Lax; Secure outside development.
    pub fn session_cookie(&self, session_id: &str) -> Cookie<'static> {
        Cookie::build(self.cookie_name.clone(), session_id.to_string())
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies)
            .max_age(CookieDuration::hours(self.session_ttl_hours))
            .finish()
    }

    fn authenticated_user(&self, req: &HttpRequest) -> Option<Uuid> {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))?;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        );

        match claims {
            Ok(data) => Uuid::parse_str(&data.claims.sub).ok(),
            Err(e) => {
                debug!("Rejected bearer token: {}", e);
                None
            }
        }
    }
}

/// Issues an HS256 access token for a user id. Account signup/login lives
/// outside this service; this is used by tests and local tooling.
pub fn issue_access_token(user_id: Uuid, jwt_secret: &str, ttl_hours: i64) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| crate::AppError::InternalError(e.to_string()))?;

    Ok(token)
}

/// Proxy-aware client address: first forwarded hop, then the direct
/// headers, then the socket peer, then the sentinel.
fn client_ip(req: &HttpRequest) -> String {
    if let Some(forwarded) = header_value(req, "X-Forwarded-For") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    for header in ["X-Real-IP", "CF-Connecting-IP"] {
        if let Some(value) = header_value(req, header) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Client-computed hash from a custom header. Accepted verbatim as a soft
/// correlation signal; never required and never trusted on its own.
fn device_fingerprint(req: &HttpRequest) -> Option<String> {
    let value = header_value(req, FINGERPRINT_HEADER)?;
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_FINGERPRINT_LEN {
        return None;
    }
    Some(trimmed.to_string())
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}
