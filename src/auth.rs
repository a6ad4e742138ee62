//! WS-Security UsernameToken generation.
//!
//! Tokens carry an optional clock skew so devices whose clock drifts from the
//! host still accept PasswordDigest authentication. Applying a token never
//! mutates it: the skew is added to the creation time of each header and
//! nothing accumulates between calls.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use quick_xml::escape::escape;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::fmt;
use tracing::warn;

pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const PASSWORD_DIGEST: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
pub const PASSWORD_TEXT: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";
pub const NONCE_ENCODING: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

const NONCE_LEN: usize = 16;
const CREATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Device credentials shared by every service client of one device.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub use_digest: bool,
    /// Device clock minus host clock
    pub clock_skew: Option<Duration>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>, use_digest: bool) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            use_digest,
            clock_skew: None,
        }
    }

    /// Same credential with a different clock skew.
    pub fn with_clock_skew(&self, clock_skew: Option<Duration>) -> Self {
        Self {
            clock_skew,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_digest", &self.use_digest)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

/// UsernameToken provider.
#[derive(Clone)]
pub struct UsernameToken {
    credential: Credential,
    /// Fixed creation time; `None` means "now" on every header
    created: Option<DateTime<Utc>>,
    /// Fixed nonce; `None` means a fresh random nonce on every header
    nonce: Option<Vec<u8>>,
}

impl UsernameToken {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            created: None,
            nonce: None,
        }
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<Vec<u8>>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Build the security header for one outgoing message.
    pub fn header(&self) -> SecurityHeader {
        let now = self.created.unwrap_or_else(Utc::now);
        let created = match self.credential.clock_skew {
            Some(skew) => now.checked_add_signed(skew).unwrap_or_else(|| {
                warn!(skew_secs = skew.num_seconds(), "Clock skew out of range, ignoring it");
                now
            }),
            None => now,
        };

        if !self.credential.use_digest {
            return SecurityHeader {
                username: self.credential.username.clone(),
                password: self.credential.password.clone(),
                password_type: PASSWORD_TEXT,
                nonce: None,
                created: None,
            };
        }

        let nonce = match &self.nonce {
            Some(n) => n.clone(),
            None => {
                let mut bytes = vec![0u8; NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };
        let created = created.format(CREATED_FORMAT).to_string();

        SecurityHeader {
            username: self.credential.username.clone(),
            password: password_digest(&nonce, &created, &self.credential.password),
            password_type: PASSWORD_DIGEST,
            nonce: Some(BASE64.encode(&nonce)),
            created: Some(created),
        }
    }
}

impl fmt::Debug for UsernameToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsernameToken")
            .field("credential", &self.credential)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

/// Base64(SHA-1(nonce + created + password)).
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(nonce);
    sha.update(created.as_bytes());
    sha.update(password.as_bytes());
    BASE64.encode(sha.finalize())
}

/// A rendered UsernameToken, ready to be placed in a SOAP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityHeader {
    pub username: String,
    /// Digest or clear text, depending on `password_type`
    pub password: String,
    pub password_type: &'static str,
    /// Base64 nonce
    pub nonce: Option<String>,
    pub created: Option<String>,
}

impl SecurityHeader {
    pub fn is_digest(&self) -> bool {
        self.password_type == PASSWORD_DIGEST
    }

    /// Render the `wsse:Security` header element.
    pub fn to_xml(&self) -> String {
        let mut token = format!(
            "<wsse:Username>{}</wsse:Username><wsse:Password Type=\"{}\">{}</wsse:Password>",
            escape(self.username.as_str()),
            self.password_type,
            escape(self.password.as_str()),
        );
        if let Some(ref nonce) = self.nonce {
            token.push_str(&format!(
                "<wsse:Nonce EncodingType=\"{}\">{}</wsse:Nonce>",
                NONCE_ENCODING, nonce
            ));
        }
        if let Some(ref created) = self.created {
            token.push_str(&format!("<wsu:Created>{}</wsu:Created>", created));
        }

        format!(
            "<wsse:Security xmlns:wsse=\"{}\" xmlns:wsu=\"{}\"><wsse:UsernameToken>{}</wsse:UsernameToken></wsse:Security>",
            WSSE_NS, WSU_NS, token
        )
    }
}
