//! Secret types for bearer and refresh tokens.
//!
//! Re-exports [`secrecy`] so every token in this crate is a [`SecretString`]:
//! its `Debug` output is redacted, so structs deriving `Debug` and tracing
//! fields holding it cannot leak the value. Reading the token requires an
//! explicit [`ExposeSecret::expose_secret`] call, which keeps the few places
//! that need the raw value (the `Authorization` header, the store, the
//! refresh grant) easy to audit.
//!
//! ```rust
//! use credential_refresh::secret::{ExposeSecret, SecretString};
//!
//! let token = SecretString::from("eyJhbGciOi...");
//! assert!(!format!("{token:?}").contains("eyJ"));
//! assert_eq!(token.expose_secret(), "eyJhbGciOi...");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("access-token-value");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("access-token-value"));
    }

    #[test]
    fn test_token_payload_is_safe_to_log() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct GrantPayload {
            client_id: String,
            refresh_token: SecretString,
        }

        let json = r#"{"client_id": "mobile-app", "refresh_token": "rt-123456"}"#;
        let payload: GrantPayload = serde_json::from_str(json).expect("deserialize");

        assert_eq!(payload.refresh_token.expose_secret(), "rt-123456");

        let debug = format!("{payload:?}");
        assert!(debug.contains("mobile-app"));
        assert!(!debug.contains("rt-123456"));
    }
}
