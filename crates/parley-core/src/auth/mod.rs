//! Authentication: mechanism selection and per-mechanism SASL state.
//!
//! A mechanism is picked once per attempt from the intersection of what the
//! client enables and what the server advertises. The preference order is
//! fixed:
//!
//! 1. ANONYMOUS, when the JID has no local part
//! 2. SCRAM-SHA-1
//! 3. DIGEST-MD5
//! 4. PLAIN
//! 5. legacy `jabber:iq:auth`
//!
//! The stanza flow around the exchange (challenge/success/failure handlers,
//! resource binding, session establishment) lives in the connection; this
//! module only computes payloads.

mod digest;
mod flags;
mod flow;
mod scram;

use base64::{Engine, engine::general_purpose::STANDARD};
pub use digest::DigestMd5;
pub use flags::MechanismFlags;
use parley_proto::jid;
pub use scram::Scram;

use crate::{error::AuthError, handler::HandlerId, status::condition};

/// Identity used by every mechanism
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    /// Full or bare JID of the account
    pub jid: &'a str,
    /// Account password (empty for anonymous logins)
    pub password: &'a str,
}

impl<'a> Credentials<'a> {
    /// Local part of the JID, empty when absent
    #[must_use]
    pub fn username(&self) -> &'a str {
        jid::node(self.jid).unwrap_or("")
    }

    /// Domain part of the JID
    #[must_use]
    pub fn domain(&self) -> &'a str {
        jid::domain(self.jid)
    }
}

/// SASL mechanism with its exchange state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    /// ANONYMOUS: no payload
    Anonymous,
    /// PLAIN: `authzid NUL authcid NUL password`
    Plain,
    /// DIGEST-MD5 challenge/response
    DigestMd5(DigestMd5),
    /// SCRAM-SHA-1 with server signature verification
    ScramSha1(Scram),
}

impl Mechanism {
    /// Name carried in the `mechanism` attribute of `<auth/>`
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anonymous => "ANONYMOUS",
            Self::Plain => "PLAIN",
            Self::DigestMd5(_) => "DIGEST-MD5",
            Self::ScramSha1(_) => "SCRAM-SHA-1",
        }
    }

    /// Base64 text of `<auth/>`, if the mechanism sends any
    pub fn initial_response(&mut self, credentials: &Credentials<'_>) -> Option<String> {
        match self {
            Self::Anonymous | Self::DigestMd5(_) => None,
            Self::Plain => {
                let message = format!(
                    "{}\0{}\0{}",
                    jid::bare(credentials.jid),
                    credentials.username(),
                    credentials.password
                );
                Some(STANDARD.encode(message))
            },
            Self::ScramSha1(scram) => Some(scram.initial_response(credentials)),
        }
    }

    /// Base64 text of the `<response/>` to a `<challenge/>`
    ///
    /// # Errors
    ///
    /// Malformed or hostile challenges, and challenges sent to mechanisms
    /// that take none.
    pub fn respond(
        &mut self,
        challenge: &str,
        credentials: &Credentials<'_>,
    ) -> Result<String, AuthError> {
        match self {
            Self::Anonymous | Self::Plain => Err(AuthError::UnexpectedChallenge(self.name())),
            Self::DigestMd5(digest) => digest.respond(challenge, credentials),
            Self::ScramSha1(scram) => scram.respond(challenge, credentials),
        }
    }

    /// Validate the payload of `<success/>`
    ///
    /// # Errors
    ///
    /// `ServerSignatureMismatch` when SCRAM cannot confirm the server.
    pub fn verify_success(&self, payload: &str) -> Result<(), AuthError> {
        match self {
            Self::ScramSha1(scram) => scram.verify_success(payload),
            Self::Anonymous | Self::Plain | Self::DigestMd5(_) => Ok(()),
        }
    }
}

/// Outcome of mechanism selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Run a SASL exchange
    Sasl(Mechanism),
    /// Fall back to `jabber:iq:auth`
    Legacy,
}

/// Why no mechanism could be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    /// The JID has no local part and ANONYMOUS is unavailable
    BadNonAnonymousJid,
    /// Nothing enabled matches what the server offers
    NoMechanism,
}

impl SelectionError {
    /// Condition reported with `ConnFail`
    #[must_use]
    pub fn condition(self) -> &'static str {
        match self {
            Self::BadNonAnonymousJid => condition::BAD_NON_ANON_JID,
            Self::NoMechanism => condition::NO_AUTH_MECHANISM,
        }
    }
}

/// Pick a mechanism.
///
/// `cnonce` is only called when a mechanism needs a client nonce.
///
/// # Errors
///
/// See [`SelectionError`].
pub fn select(
    has_node: bool,
    enabled: MechanismFlags,
    advertised: MechanismFlags,
    cnonce: impl FnOnce() -> String,
) -> Result<Selection, SelectionError> {
    let usable = enabled & advertised;

    if !has_node {
        return if usable.contains(MechanismFlags::ANONYMOUS) {
            Ok(Selection::Sasl(Mechanism::Anonymous))
        } else {
            Err(SelectionError::BadNonAnonymousJid)
        };
    }

    if usable.contains(MechanismFlags::SCRAM_SHA_1) {
        Ok(Selection::Sasl(Mechanism::ScramSha1(Scram::new(cnonce()))))
    } else if usable.contains(MechanismFlags::DIGEST_MD5) {
        Ok(Selection::Sasl(Mechanism::DigestMd5(DigestMd5::new(cnonce()))))
    } else if usable.contains(MechanismFlags::PLAIN) {
        Ok(Selection::Sasl(Mechanism::Plain))
    } else if usable.contains(MechanismFlags::LEGACY) {
        Ok(Selection::Legacy)
    } else {
        Err(SelectionError::NoMechanism)
    }
}

/// In-progress SASL attempt: the mechanism and the handlers it installed
#[derive(Debug)]
pub(crate) struct AuthContext {
    pub(crate) mechanism: Mechanism,
    pub(crate) handlers: Vec<HandlerId>,
}

/// Decode a base64 SASL payload into UTF-8 text; whitespace is ignored
pub(crate) fn decode_text(payload: &str) -> Result<String, AuthError> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|_| AuthError::InvalidBase64)?;
    String::from_utf8(bytes).map_err(|err| AuthError::InvalidField {
        field: "payload",
        value: String::from_utf8_lossy(err.as_bytes()).into_owned(),
    })
}

/// Split `key=value,key="quoted, value"` lists.
///
/// Keys run up to the first `=`; quoted values may contain commas and
/// backslash escapes.
#[must_use]
pub fn attributes(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().to_string();

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let mut value = String::new();
            let mut chars = quoted.char_indices();
            let mut end = quoted.len();
            while let Some((index, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    },
                    '"' => {
                        end = index + 1;
                        break;
                    },
                    _ => value.push(c),
                }
            }
            let tail = &quoted[end..];
            (value, tail.split_once(',').map_or("", |(_, next)| next))
        } else {
            match after.split_once(',') {
                Some((value, next)) => (value.to_string(), next),
                None => (after.to_string(), ""),
            }
        };

        pairs.push((key, value));
        rest = remainder;
    }
    pairs
}
