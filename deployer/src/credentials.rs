//! Device credential handling

use secrecy::SecretString;

/// Suffix marking a Vault username as a fallback entry.
///
/// A secret stored under `admin_default` is tried as user `admin`; the
/// suffix only encodes that the password is a factory default rather than
/// a rotated one.
pub const DEFAULT_SUFFIX: &str = "_default";

/// A single username/password pair to try against a device
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub secret: SecretString,
    pub fallback: bool,
}

impl Credential {
    /// Build a credential from a raw Vault entry name, stripping the
    /// fallback suffix from the username.
    pub fn from_entry(entry: &str, secret: SecretString) -> Self {
        match entry.strip_suffix(DEFAULT_SUFFIX) {
            Some(username) => Self {
                username: username.to_string(),
                secret,
                fallback: true,
            },
            None => Self {
                username: entry.to_string(),
                secret,
                fallback: false,
            },
        }
    }
}

/// Ordered set of credentials, tried first to last
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    entries: Vec<Credential>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a single-entry set from a static username/password pair
    pub fn from_static(username: &str, password: &str) -> Self {
        let mut set = Self::new();
        set.push(Credential {
            username: username.to_string(),
            secret: SecretString::from(password),
            fallback: false,
        });
        set
    }

    pub fn push(&mut self, credential: Credential) {
        self.entries.push(credential);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
