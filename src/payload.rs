//! Raw TBBOX command frames.
//!
//! Commands are captured out-of-band and configured as hex strings. TBBOX
//! finds frame boundaries from the content itself, so no framing is added
//! here.

use std::fmt;

use serde::Deserialize;

/// Hex encoded command, whitespace removed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct CommandPayload {
    hex: String,
}

impl CommandPayload {
    /// Normalize and validate a hex string. Whitespace anywhere is ignored.
    pub fn parse(raw: &str) -> Result<Self, hex::FromHexError> {
        let hex: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if hex.is_empty() {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        hex::decode(&hex)?;
        Ok(Self { hex })
    }

    /// Bytes to put on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.hex)
    }

    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Number of bytes once decoded.
    pub fn len(&self) -> usize {
        self.hex.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.hex.is_empty()
    }
}

impl TryFrom<String> for CommandPayload {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

// Payloads can be long; keep logs readable.
impl fmt::Debug for CommandPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 50;
        if self.hex.len() > PREVIEW {
            write!(f, "CommandPayload({}... {} bytes)", &self.hex[..PREVIEW], self.len())
        } else {
            write!(f, "CommandPayload({})", self.hex)
        }
    }
}
