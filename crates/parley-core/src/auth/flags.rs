//! Authentication mechanism flags.
//!
//! One bit per mechanism the client is willing to use. The same type
//! describes what a server advertised, so selection is a set intersection
//! followed by a fixed preference order.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Authentication mechanisms (8 bits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MechanismFlags: u8 {
        /// SASL ANONYMOUS (JIDs without a local part)
        const ANONYMOUS = 0b0000_0001;

        /// SASL PLAIN
        const PLAIN = 0b0000_0010;

        /// SASL DIGEST-MD5
        const DIGEST_MD5 = 0b0000_0100;

        /// SASL SCRAM-SHA-1
        const SCRAM_SHA_1 = 0b0000_1000;

        /// Legacy `jabber:iq:auth`
        const LEGACY = 0b0001_0000;
    }
}

impl MechanismFlags {
    /// Every SASL mechanism (excludes legacy auth)
    pub const SASL: Self = Self::ANONYMOUS
        .union(Self::PLAIN)
        .union(Self::DIGEST_MD5)
        .union(Self::SCRAM_SHA_1);

    /// Flag for a SASL mechanism name as advertised in `<mechanism/>`
    #[must_use]
    pub fn from_sasl_name(name: &str) -> Option<Self> {
        match name.trim() {
            "ANONYMOUS" => Some(Self::ANONYMOUS),
            "PLAIN" => Some(Self::PLAIN),
            "DIGEST-MD5" => Some(Self::DIGEST_MD5),
            "SCRAM-SHA-1" => Some(Self::SCRAM_SHA_1),
            _ => None,
        }
    }

    /// Collect every recognized mechanism name; unknown names are ignored
    pub fn from_sasl_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names.into_iter().filter_map(Self::from_sasl_name).fold(Self::empty(), Self::union)
    }
}

impl Default for MechanismFlags {
    fn default() -> Self {
        Self::all()
    }
}
