//! DIGEST-MD5 client state (RFC 2831, `qop=auth` only).
//!
//! Two challenge rounds: the first carries realm and nonce and is answered
//! with the computed `response`; the second carries `rspauth` and is
//! answered with an empty response.

use base64::{Engine, engine::general_purpose::STANDARD};

use super::{Credentials, attributes, decode_text};
use crate::{
    crypto::{self, DigestInput},
    error::AuthError,
};

/// One DIGEST-MD5 exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestMd5 {
    cnonce: String,
    rounds: u8,
}

impl DigestMd5 {
    /// New exchange with a client nonce
    #[must_use]
    pub fn new(cnonce: String) -> Self {
        Self { cnonce, rounds: 0 }
    }

    /// Base64 response to the next challenge; empty for the final round
    pub(crate) fn respond(
        &mut self,
        challenge: &str,
        credentials: &Credentials<'_>,
    ) -> Result<String, AuthError> {
        self.rounds += 1;
        match self.rounds {
            1 => self.digest_response(challenge, credentials),
            2 => Ok(String::new()),
            _ => Err(AuthError::UnexpectedChallenge("DIGEST-MD5")),
        }
    }

    fn digest_response(
        &self,
        challenge: &str,
        credentials: &Credentials<'_>,
    ) -> Result<String, AuthError> {
        let text = decode_text(challenge)?;
        let fields = attributes(&text);
        let field = |name: &str| {
            fields.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
        };

        let nonce = field("nonce").ok_or(AuthError::MissingField("nonce"))?;
        let realm = field("realm").unwrap_or("");
        let mut digest_uri = format!("xmpp/{}", credentials.domain());
        if let Some(host) = field("host") {
            digest_uri.push('/');
            digest_uri.push_str(host);
        }

        let username = credentials.username();
        let response = crypto::digest_md5_response(&DigestInput {
            username,
            realm,
            password: credentials.password,
            nonce,
            cnonce: &self.cnonce,
            digest_uri: &digest_uri,
        });

        let text = format!(
            "username={},realm={},nonce={},cnonce={},nc=00000001,qop=auth,\
             digest-uri={},response={},charset=utf-8",
            quote(username),
            quote(realm),
            quote(nonce),
            quote(&self.cnonce),
            quote(&digest_uri),
            response,
        );
        Ok(STANDARD.encode(text))
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
