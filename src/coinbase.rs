use super::*;

/// Builds the solo-pool coinbase transaction and splits its serialized form
/// at the extranonce insertion point, producing `coinbase1`/`coinbase2` for
/// `mining.notify`.
#[derive(Clone)]
pub struct CoinbaseBuilder {
    address: Address,
    extranonce1: Extranonce,
    extranonce2_size: usize,
    height: u64,
    pool_sig: Option<String>,
    value: Amount,
    witness_commitment: Option<ScriptBuf>,
}

impl CoinbaseBuilder {
    const MAX_COINBASE_SCRIPT_SIG_SIZE: usize = 100;

    pub fn new(
        address: Address,
        extranonce1: Extranonce,
        extranonce2_size: usize,
        height: u64,
        value: Amount,
    ) -> Self {
        Self {
            address,
            extranonce1,
            extranonce2_size,
            height,
            value,
            witness_commitment: None,
            pool_sig: None,
        }
    }

    pub fn with_pool_sig(mut self, pool_sig: String) -> Self {
        self.pool_sig = Some(pool_sig);
        self
    }

    /// Carries the node's `default_witness_commitment` through unchanged; the
    /// node has already computed the witness merkle root, so this builder
    /// never recomputes it.
    pub fn with_witness_commitment(mut self, script: ScriptBuf) -> Self {
        self.witness_commitment = Some(script);
        self
    }

    pub fn build(self) -> Result<(Transaction, String, String)> {
        let mut buf: Vec<u8> = Vec::with_capacity(Self::MAX_COINBASE_SCRIPT_SIG_SIZE);

        let mut minimally_encoded_height = [0u8; 8];
        let len = write_scriptint(
            &mut minimally_encoded_height,
            self.height.try_into().expect("height should always fit"),
        );
        buf.push(len as u8);
        buf.extend_from_slice(&minimally_encoded_height[..len]);

        let mut message = self.pool_sig.unwrap_or_default().into_bytes();
        message.truncate(Self::MAX_COINBASE_SCRIPT_SIG_SIZE);
        buf.push(message.len() as u8);
        buf.extend_from_slice(&message);

        let script_prefix_size = buf.len();

        buf.extend_from_slice(self.extranonce1.as_bytes());
        buf.extend_from_slice(vec![0u8; self.extranonce2_size].as_slice());

        let script_sig = ScriptBuf::from_bytes(buf);
        let script_sig_size = script_sig.len();

        ensure!(
            script_sig_size <= Self::MAX_COINBASE_SCRIPT_SIG_SIZE,
            "script sig too large: {script_sig_size} bytes (max {})",
            Self::MAX_COINBASE_SCRIPT_SIG_SIZE
        );

        let mut output = vec![TxOut {
            value: self.value,
            script_pubkey: self.address.script_pubkey(),
        }];

        if let Some(witness_commitment) = self.witness_commitment {
            output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: witness_commitment,
            });
        }

        let coinbase = Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig,
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output,
        };

        let total_extranonce_size = self.extranonce1.len() + self.extranonce2_size;

        // offset = tx version + input count + null outpoint + script-sig
        // length prefix + everything in the script sig before the extranonce
        // placeholder.
        let offset = 4
            + consensus::encode::VarInt(coinbase.input.len().try_into().unwrap()).size()
            + 36
            + consensus::encode::VarInt(script_sig_size.try_into().unwrap()).size()
            + script_prefix_size;

        let bin = consensus::serialize(&coinbase);
        let coinb1 = hex::encode(&bin[..offset]);
        let coinb2 = hex::encode(&bin[offset + total_extranonce_size..]);

        Ok((coinbase, coinb1, coinb2))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, bitcoin::address::NetworkUnchecked, pretty_assertions::assert_eq};

    fn address() -> Address {
        "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
            .parse::<Address<NetworkUnchecked>>()
            .unwrap()
            .assume_checked()
    }

    #[test]
    fn exceed_script_size_limit() {
        let result = CoinbaseBuilder::new(
            address(),
            "abcd1234".parse().unwrap(),
            8,
            0,
            Amount::from_sat(50 * COIN_VALUE),
        )
        .with_pool_sig("aa".repeat(100))
        .build();

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("script sig too large")
        );
    }

    #[test]
    fn split_reassembles_with_zero_extranonce2() {
        let (tx, coinb1, coinb2) = CoinbaseBuilder::new(
            address(),
            "abcd1234".parse().unwrap(),
            8,
            500_000,
            Amount::from_sat(50 * COIN_VALUE),
        )
        .build()
        .unwrap();

        let extranonce1 = hex::decode("abcd1234").unwrap();
        let extranonce2 = vec![0u8; 8];

        let full = {
            let mut v = hex::decode(&coinb1).unwrap();
            v.extend_from_slice(&extranonce1);
            v.extend_from_slice(&extranonce2);
            v.extend_from_slice(&hex::decode(&coinb2).unwrap());
            v
        };

        assert_eq!(full, bitcoin::consensus::serialize(&tx));
    }

    #[test]
    fn witness_commitment_output_follows_payout() {
        let witness_commitment = ScriptBuf::from_bytes(
            hex::decode(format!("6a24aa21a9ed{}", "11".repeat(32))).unwrap(),
        );

        let (tx, _, _) = CoinbaseBuilder::new(
            address(),
            "abcd1234".parse().unwrap(),
            8,
            0,
            Amount::from_sat(50 * COIN_VALUE),
        )
        .with_witness_commitment(witness_commitment.clone())
        .build()
        .unwrap();

        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[1].value, Amount::ZERO);
        assert_eq!(tx.output[1].script_pubkey, witness_commitment);
    }

    #[test]
    fn no_witness_commitment_output_when_absent() {
        let (tx, _, _) = CoinbaseBuilder::new(
            address(),
            "abcd1234".parse().unwrap(),
            8,
            0,
            Amount::from_sat(50 * COIN_VALUE),
        )
        .build()
        .unwrap();

        assert_eq!(tx.output.len(), 1);
    }

    #[test]
    fn message_push_precedes_extranonce_placeholder() {
        let (_, coinb1, _) = CoinbaseBuilder::new(
            address(),
            "abcd1234".parse().unwrap(),
            8,
            500_000,
            Amount::from_sat(50 * COIN_VALUE),
        )
        .with_pool_sig("soloctl".to_string())
        .build()
        .unwrap();

        let coinb1 = hex::decode(&coinb1).unwrap();
        assert!(coinb1.ends_with(b"soloctl"));
    }

    #[test]
    fn pool_sig_message_is_clipped_before_the_overall_limit_is_checked() {
        // height(2) + message-len-prefix(1) + message(clipped to 100, not 200)
        // + extranonce1(1) + extranonce2(2) = 106, not 1 + 1 + 200 + 1 + 2 = 205.
        let result = CoinbaseBuilder::new(
            address(),
            "ab".parse().unwrap(),
            2,
            1,
            Amount::from_sat(50 * COIN_VALUE),
        )
        .with_pool_sig("a".repeat(200))
        .build();

        assert!(result.unwrap_err().to_string().contains("106 bytes"));
    }

    #[test]
    fn height_boundary_shifts_offset() {
        let (_, coinb1_low, _) = CoinbaseBuilder::new(
            address(),
            "abcd1234".parse().unwrap(),
            8,
            16,
            Amount::from_sat(50 * COIN_VALUE),
        )
        .build()
        .unwrap();

        let (_, coinb1_high, _) = CoinbaseBuilder::new(
            address(),
            "abcd1234".parse().unwrap(),
            8,
            17,
            Amount::from_sat(50 * COIN_VALUE),
        )
        .build()
        .unwrap();

        // both heights encode to a single length-prefixed byte, so the
        // offsets line up even though the pushed value differs.
        assert_eq!(
            hex::decode(&coinb1_low).unwrap().len(),
            hex::decode(&coinb1_high).unwrap().len()
        );
    }
}
