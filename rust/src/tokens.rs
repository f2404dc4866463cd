//! HS256 JSON Web Tokens signed with the provisioned secret.
//!
//! Claims follow the layout the mobile app already expects: `iss`, `iat`,
//! `nbf`, `exp` and the user id nested under `data.user.id`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provisioner::SigningSecret;

/// Seven days.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("authorization header missing")]
    MissingHeader,
    #[error("authorization header malformed")]
    BadAuthHeader,
    #[error("token malformed: {0}")]
    Malformed(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token not valid yet")]
    NotYetValid,
    #[error("the iss does not match this server")]
    IssuerMismatch,
    #[error("user id not found in the token")]
    MissingUser,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("system clock before unix epoch")]
    Clock,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            ErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName | ErrorKind::MissingAlgorithm => {
                TokenError::UnsupportedAlgorithm(format!("{err}"))
            }
            _ => TokenError::Malformed(format!("{err}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUser {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsData {
    pub user: TokenUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: u64,
    pub nbf: u64,
    pub exp: u64,
    pub data: ClaimsData,
}

impl Claims {
    pub fn user_id(&self) -> &str {
        &self.data.user.id
    }
}

/// Issues and validates tokens for one active secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: SigningSecret, issuer: impl Into<String>, ttl: Duration) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            ttl,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn issue(&self, user_id: &str) -> Result<String, TokenError> {
        self.issue_at(user_id, unix_now()?)
    }

    /// Issues a token whose validity window starts at `now`.
    pub fn issue_at(&self, user_id: &str, now: u64) -> Result<String, TokenError> {
        if user_id.is_empty() {
            return Err(TokenError::MissingUser);
        }
        let claims = Claims {
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(self.ttl.as_secs()),
            data: ClaimsData {
                user: TokenUser {
                    id: user_id.to_string(),
                },
            },
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(format!("{e}")))
    }

    /// Checks signature, algorithm, issuer and the `nbf`/`exp` window against
    /// the system clock.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let claims = decode::<Claims>(token, &self.decoding, &self.validation)?.claims;
        if claims.data.user.id.is_empty() {
            return Err(TokenError::MissingUser);
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, TokenError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(TokenError::MissingHeader)?;
    let (scheme, token) = header.split_once(char::is_whitespace).ok_or(TokenError::BadAuthHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(char::is_whitespace) {
        return Err(TokenError::BadAuthHeader);
    }
    Ok(token)
}

fn unix_now() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::Clock)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER: &str = "https://dt.example.org";

    fn codec(secret: &str) -> TokenCodec {
        TokenCodec::new(SigningSecret::new(secret), ISSUER, Duration::from_secs(DEFAULT_TOKEN_TTL_SECS))
    }

    fn now() -> u64 {
        unix_now().expect("clock after epoch")
    }

    fn claims_for(user: &str, start: u64) -> Claims {
        Claims {
            iss: ISSUER.to_string(),
            iat: start,
            nbf: start,
            exp: start + 3600,
            data: ClaimsData {
                user: TokenUser { id: user.to_string() },
            },
        }
    }

    #[test]
    fn issued_token_validates() {
        let codec = codec("s3cret");
        let start = now();
        let token = codec.issue_at("42", start).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = codec.validate(&token).unwrap();
        assert_eq!(claims.user_id(), "42");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.exp, start + DEFAULT_TOKEN_TTL_SECS);
        assert_eq!(claims.nbf, start);
    }

    #[test]
    fn other_secret_rejects_token() {
        let token = codec("first").issue("42").unwrap();
        assert_eq!(codec("second").validate(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn time_window_is_enforced() {
        let codec = codec("s3cret");
        let future = codec.issue_at("42", now() + 3600).unwrap();
        assert_eq!(codec.validate(&future), Err(TokenError::NotYetValid));

        let stale = codec.issue_at("42", now() - DEFAULT_TOKEN_TTL_SECS - 3600).unwrap();
        assert_eq!(codec.validate(&stale), Err(TokenError::Expired));
    }

    #[test]
    fn issuer_must_match() {
        let token = codec("s3cret").issue("42").unwrap();
        let elsewhere = TokenCodec::new(SigningSecret::new("s3cret"), "https://other.example.org", Duration::from_secs(60));
        assert_eq!(elsewhere.validate(&token), Err(TokenError::IssuerMismatch));
    }

    #[test]
    fn accepts_token_without_typ_header() {
        let header = Header {
            typ: None,
            ..Header::new(Algorithm::HS256)
        };
        let token = encode(&header, &claims_for("9", now()), &EncodingKey::from_secret(b"s3cret")).unwrap();
        assert_eq!(codec("s3cret").validate(&token).unwrap().user_id(), "9");
    }

    #[test]
    fn rejects_other_hmac_algorithms() {
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims_for("9", now()),
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        assert_eq!(
            codec("s3cret").validate(&token),
            Err(TokenError::UnsupportedAlgorithm("HS512".to_string()))
        );
    }

    #[test]
    fn rejects_unsigned_tokens() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        let header = URL_SAFE_NO_PAD.encode(br#"{"typ":"JWT","alg":"none"}"#);
        let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims_for("1", now())).unwrap());
        assert!(codec("s3cret").validate(&format!("{header}.{claims}.")).is_err());
    }

    #[test]
    fn tampered_claims_fail_signature() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        let codec = codec("s3cret");
        let token = codec.issue("42").unwrap();
        let forged_claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims_for("1", now())).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);
        assert_eq!(codec.validate(&forged), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_malformed_tokens_and_empty_users() {
        let codec = codec("s3cret");
        assert!(matches!(codec.validate("abc"), Err(TokenError::Malformed(_))));
        assert!(matches!(codec.validate("!!.??.##"), Err(TokenError::Malformed(_))));
        assert_eq!(codec.issue_at("", now()), Err(TokenError::MissingUser));

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims_for("", now()),
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        assert_eq!(codec.validate(&token), Err(TokenError::MissingUser));
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token(Some("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(bearer_token(Some("bearer   abc")), Ok("abc"));
        assert_eq!(bearer_token(None), Err(TokenError::MissingHeader));
        assert_eq!(bearer_token(Some("  ")), Err(TokenError::MissingHeader));
        assert_eq!(bearer_token(Some("Basic abc")), Err(TokenError::BadAuthHeader));
        assert_eq!(bearer_token(Some("Bearer")), Err(TokenError::BadAuthHeader));
    }
}
