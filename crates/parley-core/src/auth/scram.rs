//! SCRAM-SHA-1 client state (RFC 5802, no channel binding).

use base64::{Engine, engine::general_purpose::STANDARD};

use super::{Credentials, attributes, decode_text};
use crate::{crypto, error::AuthError};

/// GS2 header for "no channel binding, no authzid", base64 `biws`
const GS2_HEADER: &str = "n,,";
const CHANNEL_BINDING: &str = "biws";

/// One SCRAM exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scram {
    cnonce: String,
    client_first_bare: Option<String>,
    server_signature: Option<Vec<u8>>,
}

impl Scram {
    /// New exchange with a client nonce
    #[must_use]
    pub fn new(cnonce: String) -> Self {
        Self { cnonce, client_first_bare: None, server_signature: None }
    }

    /// Base64 client-first message
    pub(crate) fn initial_response(&mut self, credentials: &Credentials<'_>) -> String {
        let bare = format!("n={},r={}", credentials.username(), self.cnonce);
        let message = format!("{GS2_HEADER}{bare}");
        self.client_first_bare = Some(bare);
        STANDARD.encode(message)
    }

    /// Base64 client-final message for a server-first challenge
    pub(crate) fn respond(
        &mut self,
        challenge: &str,
        credentials: &Credentials<'_>,
    ) -> Result<String, AuthError> {
        let Some(client_first_bare) = self.client_first_bare.as_deref() else {
            return Err(AuthError::UnexpectedChallenge("SCRAM-SHA-1"));
        };
        if self.server_signature.is_some() {
            return Err(AuthError::UnexpectedChallenge("SCRAM-SHA-1"));
        }

        let server_first = decode_text(challenge)?;
        let fields = attributes(&server_first);
        let field = |name: &'static str| {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
                .ok_or(AuthError::MissingField(name))
        };

        let nonce = field("r")?;
        let salt = STANDARD.decode(field("s")?).map_err(|_| AuthError::InvalidBase64)?;
        let raw_iterations = field("i")?;
        let iterations = raw_iterations
            .parse::<u32>()
            .ok()
            .filter(|iterations| *iterations > 0)
            .ok_or_else(|| AuthError::InvalidField {
                field: "i",
                value: raw_iterations.to_string(),
            })?;

        if !nonce.starts_with(&self.cnonce) {
            return Err(AuthError::NonceMismatch);
        }

        let without_proof = format!("c={CHANNEL_BINDING},r={nonce}");
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let keys = crypto::scram_keys(
            credentials.password.as_bytes(),
            &salt,
            iterations,
            auth_message.as_bytes(),
        )?;

        self.server_signature = Some(keys.server_signature.to_vec());
        let client_final = format!("{without_proof},p={}", STANDARD.encode(keys.client_proof));
        Ok(STANDARD.encode(client_final))
    }

    /// Check the `v=` attribute of the server-final message
    pub(crate) fn verify_success(&self, payload: &str) -> Result<(), AuthError> {
        let Some(expected) = self.server_signature.as_deref() else {
            return Err(AuthError::ServerSignatureMismatch);
        };
        let server_final = decode_text(payload)?;
        let verifier = attributes(&server_final)
            .into_iter()
            .find(|(key, _)| key == "v")
            .ok_or(AuthError::ServerSignatureMismatch)?;
        let signature = STANDARD.decode(&verifier.1).map_err(|_| AuthError::InvalidBase64)?;

        if signature == expected { Ok(()) } else { Err(AuthError::ServerSignatureMismatch) }
    }
}
