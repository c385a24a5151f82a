use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Secret handed to the caller on commit; presenting it authorizes undo.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoToken(String);

impl UndoToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut hex = String::with_capacity(32);
        for byte in bytes {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digest(&self) -> TokenDigest {
        TokenDigest(*blake3::hash(self.0.as_bytes()).as_bytes())
    }
}

impl fmt::Debug for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UndoToken(..)")
    }
}

/// What the engine keeps instead of the token itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenDigest([u8; 32]);

impl TokenDigest {
    pub fn matches(&self, token: &UndoToken) -> bool {
        blake3::Hash::from(self.0) == blake3::hash(token.as_str().as_bytes())
    }
}

impl fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenDigest({:02x}{:02x}...)", self.0[0], self.0[1])
    }
}
