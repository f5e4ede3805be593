use std::sync::Arc;

use anyhow::{anyhow, Result};
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use time::{Duration, OffsetDateTime};

use crate::domain::session::Session;
use crate::infra::gateway::Authenticator;

const TOKEN_ISSUER: &str = "dayflow";

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub session: Session,
}

/// Exchanges ERP credentials for an encrypted session token. The token
/// carries everything needed to query the ERP on the user's behalf.
#[derive(Clone)]
pub struct AuthService {
    authenticator: Arc<dyn Authenticator>,
    session_key: [u8; 32],
    session_ttl_minutes: u64,
}

impl AuthService {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        session_key: [u8; 32],
        session_ttl_minutes: u64,
    ) -> Self {
        Self {
            authenticator,
            session_key,
            session_ttl_minutes,
        }
    }

    /// `Ok(None)` when the ERP rejects the credentials.
    pub async fn login(&self, login: &str, password: &str) -> Result<Option<IssuedSession>> {
        let identity = match self.authenticator.authenticate(login, password).await? {
            Some(identity) => identity,
            None => return Ok(None),
        };

        let session = Session {
            uid: identity.uid,
            login: login.to_string(),
            secret: password.to_string(),
            is_admin: identity.is_admin,
        };
        let (token, expires_at) = self.issue_token(&session)?;
        tracing::info!(uid = session.uid, is_admin = session.is_admin, "session issued");

        Ok(Some(IssuedSession {
            token,
            expires_at,
            session,
        }))
    }

    pub fn authenticate_token(&self, token: &str) -> Result<Option<Session>> {
        let claims = match self.decrypt_claims(token)? {
            Some(claims) => claims,
            None => return Ok(None),
        };

        let uid = claim_str(&claims, "sub")?
            .parse::<i64>()
            .map_err(|err| anyhow!("invalid sub claim: {}", err))?;
        let login = claim_str(&claims, "login")?.to_string();
        let secret = claim_str(&claims, "secret")?.to_string();
        let is_admin = claims
            .get_claim("adm")
            .and_then(|value| value.as_bool())
            .unwrap_or(false);

        Ok(Some(Session {
            uid,
            login,
            secret,
            is_admin,
        }))
    }

    fn issue_token(&self, session: &Session) -> Result<(String, OffsetDateTime)> {
        let ttl_seconds = self
            .session_ttl_minutes
            .checked_mul(60)
            .and_then(|seconds| i64::try_from(seconds).ok())
            .ok_or_else(|| anyhow!("session ttl out of range"))?;
        let expires_at = OffsetDateTime::now_utc()
            .checked_add(Duration::seconds(ttl_seconds))
            .ok_or_else(|| anyhow!("session ttl out of range"))?;

        let duration = std::time::Duration::from_secs(ttl_seconds.unsigned_abs());
        let mut claims = Claims::new_expires_in(&duration)?;
        claims.issuer(TOKEN_ISSUER)?;
        claims.audience(TOKEN_ISSUER)?;
        claims.subject(&session.uid.to_string())?;
        claims.add_additional("login", session.login.as_str())?;
        claims.add_additional("secret", session.secret.as_str())?;
        claims.add_additional("adm", session.is_admin)?;

        let key = SymmetricKey::<V4>::from(&self.session_key)?;
        let token = local::encrypt(&key, &claims, None, None)?;
        Ok((token, expires_at))
    }

    fn decrypt_claims(&self, token: &str) -> Result<Option<Claims>> {
        let key = SymmetricKey::<V4>::from(&self.session_key)?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(TOKEN_ISSUER);
        rules.validate_audience_with(TOKEN_ISSUER);

        let untrusted = match UntrustedToken::<Local, V4>::try_from(token) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        let trusted = match local::decrypt(&key, &untrusted, &rules, None, None) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        Ok(trusted.payload_claims().cloned())
    }
}

fn claim_str<'a>(claims: &'a Claims, name: &str) -> Result<&'a str> {
    claims
        .get_claim(name)
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("missing {} claim", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::infra::gateway::{GatewayError, Identity};

    struct StaticAuthenticator;

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        async fn authenticate(
            &self,
            login: &str,
            password: &str,
        ) -> Result<Option<Identity>, GatewayError> {
            match (login, password) {
                ("admin", "admin") => Ok(Some(Identity { uid: 2, is_admin: true })),
                ("down", _) => Err(GatewayError::Remote {
                    message: "server unavailable".to_string(),
                }),
                _ => Ok(None),
            }
        }
    }

    fn service(key: [u8; 32]) -> AuthService {
        AuthService::new(Arc::new(StaticAuthenticator), key, 60)
    }

    #[tokio::test]
    async fn login_issues_token_that_round_trips() {
        let auth = service([7u8; 32]);
        let issued = auth.login("admin", "admin").await.unwrap().unwrap();

        assert!(issued.expires_at > OffsetDateTime::now_utc());
        let session = auth.authenticate_token(&issued.token).unwrap().unwrap();
        assert_eq!(session, issued.session);
        assert_eq!(session.uid, 2);
        assert!(session.is_admin);
        assert_eq!(session.secret, "admin");
    }

    #[tokio::test]
    async fn rejected_credentials_issue_nothing() {
        let auth = service([7u8; 32]);
        assert!(auth.login("admin", "wrong").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gateway_errors_propagate() {
        let auth = service([7u8; 32]);
        assert!(auth.login("down", "x").await.is_err());
    }

    #[tokio::test]
    async fn oversized_ttl_is_an_error() {
        let auth = AuthService::new(Arc::new(StaticAuthenticator), [7u8; 32], u64::MAX);
        assert!(auth.login("admin", "admin").await.is_err());

        let auth = AuthService::new(Arc::new(StaticAuthenticator), [7u8; 32], u64::MAX / 60);
        assert!(auth.login("admin", "admin").await.is_err());
    }

    #[tokio::test]
    async fn foreign_or_garbage_tokens_are_rejected() {
        let issued = service([7u8; 32])
            .login("admin", "admin")
            .await
            .unwrap()
            .unwrap();

        let other = service([9u8; 32]);
        assert!(other.authenticate_token(&issued.token).unwrap().is_none());
        assert!(other.authenticate_token("v4.local.garbage").unwrap().is_none());
        assert!(other.authenticate_token("not-a-token").unwrap().is_none());
    }
}
