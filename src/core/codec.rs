use anyhow::{anyhow, bail, Result};

/// 32-byte payment hash tying the outer hold invoice to the inner
/// payment. Parsed from the node's hex representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentHash([u8; 32]);

impl PaymentHash {
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| anyhow!("invalid payment hash hex: {e}"))?;
        Self::from_slice(&bytes)
            .ok_or_else(|| anyhow!("payment hash must be 32 bytes, got {}", bytes.len()))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(PaymentHash(arr))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 32-byte payment preimage, revealed by a successful payment and used
/// to settle the matching hold invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preimage([u8; 32]);

impl Preimage {
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| anyhow!("invalid preimage hex: {e}"))?;
        if bytes.len() != 32 {
            bail!("preimage must be 32 bytes, got {}", bytes.len());
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Preimage(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Display for Preimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Decodes a hex string into raw bytes. An empty string yields an empty
/// vector, matching how optional hashes travel through the node API.
pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(s).map_err(|e| anyhow!("invalid hex string: {e}"))
}
