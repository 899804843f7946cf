use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{common::Role, session::Session};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PATTERN: &str = concat!(
    r"^(?P<user>[0-9a-fA-F-]{36})\.",
    r"(?P<tenant>[0-9a-fA-F-]{36}|none)\.",
    r"(?P<role>[a-z_]+)\.",
    r"(?P<exp>\d{1,12})\.",
    r"(?P<sig>[0-9a-f]{64})$",
);

/// Resolves bearer tokens of the form
/// `<user>.<tenant|none>.<role>.<expires_unix>.<hex hmac>` into a [`Session`].
/// Tokens are issued elsewhere; [`SessionVerifier::issue`] exists for that
/// service and for tests.
#[derive(Clone)]
pub struct SessionVerifier {
    secret: String,
    shape: Regex,
}

impl SessionVerifier {
    pub fn new(secret: impl Into<String>) -> BillingResult<Self> {
        let shape = Regex::new(TOKEN_PATTERN)
            .map_err(|e| BillingError::Internal(format!("token pattern: {}", e)))?;
        Ok(Self {
            secret: secret.into(),
            shape,
        })
    }

    pub fn verify(&self, token: &str) -> BillingResult<Session> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> BillingResult<Session> {
        let caps = self
            .shape
            .captures(token.trim())
            .ok_or_else(|| unauthorized("malformed session token"))?;

        let sig = hex::decode(&caps["sig"]).map_err(|_| unauthorized("malformed session token"))?;
        let signed = format!("{}.{}.{}.{}", &caps["user"], &caps["tenant"], &caps["role"], &caps["exp"]);
        let mut mac = self.mac()?;
        mac.update(signed.as_bytes());
        mac.verify_slice(&sig)
            .map_err(|_| unauthorized("invalid session signature"))?;

        let user_id = Uuid::parse_str(&caps["user"]).map_err(|_| unauthorized("malformed user id"))?;
        let tenant_id = match &caps["tenant"] {
            "none" => None,
            tenant => Some(Uuid::parse_str(tenant).map_err(|_| unauthorized("malformed tenant id"))?),
        };
        let role: Role = caps["role"].parse().map_err(|e: String| unauthorized(&e))?;
        let expires_at = caps["exp"]
            .parse::<i64>()
            .ok()
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
            .ok_or_else(|| unauthorized("malformed expiry"))?;

        if expires_at <= now {
            return Err(unauthorized("session expired"));
        }

        Ok(Session::new(user_id, tenant_id, role, expires_at))
    }

    pub fn issue(&self, session: &Session) -> BillingResult<String> {
        let tenant = session
            .tenant_id
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".to_string());
        let payload = format!(
            "{}.{}.{}.{}",
            session.user_id,
            tenant,
            session.role,
            session.expires_at.timestamp()
        );

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(format!("{}.{}", payload, hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self) -> BillingResult<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| BillingError::Internal(format!("session key: {}", e)))
    }
}

fn unauthorized(reason: &str) -> BillingError {
    BillingError::Unauthorized(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn verifier() -> SessionVerifier {
        SessionVerifier::new("test-session-secret").unwrap()
    }

    fn admin_session() -> Session {
        Session::new(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Role::SchoolAdmin,
            Utc.timestamp_opt(Utc::now().timestamp() + 3600, 0).unwrap(),
        )
    }

    #[test]
    fn test_issued_token_resolves_to_session() {
        let verifier = verifier();
        let session = admin_session();
        let token = verifier.issue(&session).unwrap();

        assert_eq!(verifier.verify(&token).unwrap(), session);
    }

    #[test]
    fn test_platform_admin_without_tenant() {
        let verifier = verifier();
        let session = Session::new(
            Uuid::new_v4(),
            None,
            Role::PlatformAdmin,
            Utc.timestamp_opt(Utc::now().timestamp() + 60, 0).unwrap(),
        );
        let token = verifier.issue(&session).unwrap();
        assert!(token.contains(".none.platform_admin."));

        let resolved = verifier.verify(&token).unwrap();
        assert_eq!(resolved.tenant_id, None);
        assert_eq!(resolved.role, Role::PlatformAdmin);
    }

    #[test]
    fn test_tampered_tokens_are_rejected() {
        let verifier = verifier();
        let session = admin_session();
        let token = verifier.issue(&session).unwrap();

        // Escalating the role invalidates the signature.
        let escalated = token.replace(".school_admin.", ".platform_admin.");
        assert!(matches!(verifier.verify(&escalated), Err(BillingError::Unauthorized(_))));

        let other_key = SessionVerifier::new("another-secret").unwrap();
        assert!(matches!(other_key.verify(&token), Err(BillingError::Unauthorized(_))));

        assert!(matches!(verifier.verify("not-a-token"), Err(BillingError::Unauthorized(_))));
        assert!(matches!(verifier.verify(""), Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn test_expired_token() {
        let verifier = verifier();
        let session = admin_session();
        let token = verifier.issue(&session).unwrap();

        let later = session.expires_at + Duration::seconds(1);
        assert!(matches!(verifier.verify_at(&token, later), Err(BillingError::Unauthorized(_))));
    }

    #[test]
    fn test_unknown_role_is_rejected_even_when_signed() {
        let verifier = verifier();
        let payload = format!("{}.none.superuser.{}", Uuid::new_v4(), Utc::now().timestamp() + 60);
        let mut mac = verifier.mac().unwrap();
        mac.update(payload.as_bytes());
        let token = format!("{}.{}", payload, hex::encode(mac.finalize().into_bytes()));

        assert!(matches!(verifier.verify(&token), Err(BillingError::Unauthorized(_))));
    }
}
