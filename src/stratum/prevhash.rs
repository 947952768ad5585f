use super::*;

/// Swaps the byte order within each 32-bit word of a 32-byte hash, leaving
/// word order untouched. This is the Stratum "swab" convention applied to
/// `previousblockhash`: distinct from the big-endian display convention used
/// for `MerkleNode`/`Txid`, and self-inverse.
fn swab256(bytes: [u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..8 {
        out[i * 4] = bytes[i * 4 + 3];
        out[i * 4 + 1] = bytes[i * 4 + 2];
        out[i * 4 + 2] = bytes[i * 4 + 1];
        out[i * 4 + 3] = bytes[i * 4];
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct PrevHash(BlockHash);

impl From<BlockHash> for PrevHash {
    fn from(hash: BlockHash) -> Self {
        Self(hash)
    }
}

impl From<PrevHash> for BlockHash {
    fn from(prevhash: PrevHash) -> Self {
        prevhash.0
    }
}

impl fmt::Display for PrevHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(swab256(self.0.to_byte_array())))
    }
}

impl FromStr for PrevHash {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(InternalError::Parse {
                message: format!("prevhash hex must be 64 chars, got {}", s.len()),
            });
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| InternalError::Parse {
            message: format!("invalid prevhash hex: {e}"),
        })?;

        Ok(Self(BlockHash::from_byte_array(swab256(bytes))))
    }
}
