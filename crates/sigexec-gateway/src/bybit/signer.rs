//! Bybit v5 request signing.
//!
//! Signature = hex(HMAC-SHA256(secret, timestamp + api_key + recv_window + payload))
//! where payload is the query string for GET and the JSON body for POST.
//!
//! Security notes:
//! - The secret is held in `Zeroizing` memory and wiped on drop.
//! - `Debug` never prints the secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{GatewayError, GatewayResult};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "X-BAPI-API-KEY";
pub const HEADER_SIGN: &str = "X-BAPI-SIGN";
pub const HEADER_TIMESTAMP: &str = "X-BAPI-TIMESTAMP";
pub const HEADER_RECV_WINDOW: &str = "X-BAPI-RECV-WINDOW";

/// API key pair for one account.
pub struct BybitCredentials {
    api_key: String,
    secret: Zeroizing<String>,
}

impl std::fmt::Debug for BybitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl BybitCredentials {
    pub fn new(api_key: impl Into<String>, secret: Zeroizing<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret,
        }
    }

    /// Load the key pair from the named environment variables.
    pub fn from_env(key_var: &str, secret_var: &str) -> GatewayResult<Self> {
        let api_key = std::env::var(key_var)
            .map_err(|_| GatewayError::Credentials(format!("{key_var} is not set")))?;
        let secret = Zeroizing::new(
            std::env::var(secret_var)
                .map_err(|_| GatewayError::Credentials(format!("{secret_var} is not set")))?,
        );
        if api_key.trim().is_empty() || secret.trim().is_empty() {
            return Err(GatewayError::Credentials(
                "API key and secret must not be empty".to_string(),
            ));
        }
        Ok(Self::new(api_key.trim(), secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign one request payload.
    pub fn sign(&self, timestamp_ms: i64, recv_window_ms: u64, payload: &str) -> GatewayResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| GatewayError::Credentials(format!("HMAC init failed: {e}")))?;
        mac.update(timestamp_ms.to_string().as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(recv_window_ms.to_string().as_bytes());
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> BybitCredentials {
        BybitCredentials::new("test-key", Zeroizing::new("test-secret".to_string()))
    }

    #[test]
    fn test_sign_query_string() {
        let sig = creds()
            .sign(1_700_000_000_000, 5000, "category=linear&symbol=BTCUSDT")
            .unwrap();
        assert_eq!(
            sig,
            "9a7c8cfd6ba1a7c498aa4dd5a7f9cfbba01fcb6eebae734ffe0d775870a1a3fb"
        );
    }

    #[test]
    fn test_sign_json_body() {
        let body = r#"{"category":"linear","symbol":"BTCUSDT","side":"Buy","orderType":"Market","qty":"0.01","reduceOnly":false,"positionIdx":0}"#;
        let sig = creds().sign(1_700_000_000_000, 5000, body).unwrap();
        assert_eq!(
            sig,
            "588dbf23c188b9e6517f6c03d6139f0ede8c0f055aa94ac45f763e75b4fc965e"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let printed = format!("{:?}", creds());
        assert!(printed.contains("test-key"));
        assert!(!printed.contains("test-secret"));
    }

    #[test]
    fn test_from_env_missing_var() {
        let result = BybitCredentials::from_env(
            "SIGEXEC_TEST_UNSET_KEY_7F3A",
            "SIGEXEC_TEST_UNSET_SECRET_7F3A",
        );
        assert!(matches!(result, Err(GatewayError::Credentials(_))));
    }
}
