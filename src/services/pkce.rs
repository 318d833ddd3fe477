// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authorization code + PKCE (RFC 7636) helpers for the bootstrap flow.

use crate::error::{AppError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// One in-progress authorization attempt.
///
/// Lives only in memory for the duration of the bootstrap command.
#[derive(Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("verifier", &"***")
            .field("challenge", &self.challenge)
            .field("state", &self.state)
            .finish()
    }
}

impl PkceChallenge {
    /// Fresh verifier, derived challenge and state.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let verifier = random_token(&rng)?;
        let state = random_token(&rng)?;
        Ok(Self {
            challenge: compute_code_challenge(&verifier),
            verifier,
            state,
        })
    }

    /// Constant-time comparison against the `state` echoed by the provider.
    pub fn state_matches(&self, returned: &str) -> bool {
        self.state.as_bytes().ct_eq(returned.as_bytes()).into()
    }
}

/// 32 random bytes, base64url without padding (43 characters).
fn random_token(rng: &SystemRandom) -> Result<String> {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG unavailable")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// `code_challenge = base64url_nopad(sha256(verifier))`
pub fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Build the full authorization URL with PKCE parameters.
pub fn build_auth_url(
    authorize_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    pkce: &PkceChallenge,
) -> String {
    format!(
        "{authorize_url}?response_type=code\
         &client_id={client_id}\
         &redirect_uri={redirect_uri}\
         &scope={scope}\
         &state={state}\
         &code_challenge={challenge}\
         &code_challenge_method=S256",
        client_id = urlencoding::encode(client_id),
        redirect_uri = urlencoding::encode(redirect_uri),
        scope = urlencoding::encode(scope),
        state = urlencoding::encode(&pkce.state),
        challenge = urlencoding::encode(&pkce.challenge),
    )
}

/// What the operator pasted back: the full redirect URL or just the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
}

/// Parse the pasted callback.
///
/// A URL carrying `error=...` is reported as an authentication failure.
pub fn parse_callback(input: &str) -> Result<CallbackParams> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AppError::AuthenticationRequired(
            "no authorization code provided".to_string(),
        ));
    }

    let Ok(url) = reqwest::Url::parse(input) else {
        return Ok(CallbackParams {
            code: input.to_string(),
            state: None,
        });
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(AppError::AuthenticationRequired(format!(
            "authorization denied: {}",
            error
        )));
    }

    code.filter(|c| !c.is_empty())
        .map(|code| CallbackParams { code, state })
        .ok_or_else(|| {
            AppError::AuthenticationRequired("callback URL has no code parameter".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_matches_rfc7636_vector() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            compute_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generate_is_random_and_well_formed() {
        let a = PkceChallenge::generate().unwrap();
        let b = PkceChallenge::generate().unwrap();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.state, b.state);
        assert_eq!(a.verifier.len(), 43);
        assert_eq!(a.challenge, compute_code_challenge(&a.verifier));
        assert!(a.state_matches(&a.state.clone()));
        assert!(!a.state_matches(&b.state));
    }

    #[test]
    fn test_auth_url_carries_pkce_parameters() {
        let pkce = PkceChallenge::generate().unwrap();
        let url = build_auth_url(
            "https://id.example.com/as/authorization.oauth2",
            "client",
            "http://localhost:8080/callback",
            "openid conve:doors_status",
            &pkce,
        );

        let parsed = reqwest::Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "openid conve:doors_status");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8080/callback");
        assert_eq!(pairs["code_challenge"], pkce.challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], pkce.state);
    }

    #[test]
    fn test_parse_callback_variants() {
        let params =
            parse_callback("http://localhost:8080/callback?code=abc123&state=xyz").unwrap();
        assert_eq!(params.code, "abc123");
        assert_eq!(params.state.as_deref(), Some("xyz"));

        let bare = parse_callback("  abc123\n").unwrap();
        assert_eq!(bare.code, "abc123");
        assert_eq!(bare.state, None);

        assert!(parse_callback("http://localhost:8080/callback?error=access_denied").is_err());
        assert!(parse_callback("http://localhost:8080/callback?state=xyz").is_err());
        assert!(parse_callback("").is_err());
    }
}
