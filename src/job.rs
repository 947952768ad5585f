use super::*;

/// A signed-off unit of work distributed to miners. Job ids are allocated by
/// the factory ([`jobs::Jobs`]); jobs are retained for a bounded window so
/// late submissions against an older `previousblockhash` can still be
/// validated.
#[derive(Debug)]
pub struct Job {
    pub job_id: JobId,
    pub prev_hash: PrevHash,
    pub coinbase1: String,
    pub coinbase2: String,
    pub merkle_branch: Vec<MerkleNode>,
    pub version: Version,
    pub nbits: Nbits,
    pub ntime: Ntime,
    pub height: u64,
    pub network_target: Target,
    pub clean_jobs: bool,
    /// Non-coinbase transactions included in the template, in template order,
    /// kept so a found block can be reassembled without holding onto the
    /// original template.
    pub transactions: Vec<Transaction>,
    submissions: Mutex<HashSet<(Extranonce, Extranonce, Ntime, Nonce)>>,
}

impl Job {
    pub fn build(
        template: &BlockTemplate,
        pool_address: &Address,
        pool_sig: &str,
        extranonce1: Extranonce,
        extranonce2_size: usize,
        job_id: JobId,
        clean_jobs: bool,
    ) -> Result<Self> {
        let mut builder = CoinbaseBuilder::new(
            pool_address.clone(),
            extranonce1,
            extranonce2_size,
            template.height,
            template.coinbase_value,
        )
        .with_pool_sig(pool_sig.to_string());

        if !template.default_witness_commitment.is_empty() {
            builder =
                builder.with_witness_commitment(template.default_witness_commitment.clone());
        }

        let (_coinbase_tx, coinbase1, coinbase2) = builder.build()?;

        let txids: Vec<Txid> = template
            .transactions
            .iter()
            .map(|tx| tx.txid)
            .collect();

        let merkle_branch = merkle_branches(txids);

        let network_target = Target::from_compact(template.bits.to_compact());

        Ok(Self {
            job_id,
            prev_hash: PrevHash::from(template.previous_block_hash),
            coinbase1,
            coinbase2,
            merkle_branch,
            version: template.version,
            nbits: template.bits,
            ntime: template.current_time,
            height: template.height,
            network_target,
            clean_jobs,
            transactions: template
                .transactions
                .iter()
                .map(|tx| tx.transaction.clone())
                .collect(),
            submissions: Mutex::new(HashSet::new()),
        })
    }

    pub fn notify(&self) -> Notify {
        Notify {
            job_id: self.job_id.to_string(),
            prevhash: self.prev_hash,
            coinb1: self.coinbase1.clone(),
            coinb2: self.coinbase2.clone(),
            merkle_branches: self
                .merkle_branch
                .iter()
                .map(|node| TxMerkleNode::from(*node))
                .collect(),
            version: self.version,
            nbits: self.nbits,
            ntime: self.ntime,
            clean_jobs: self.clean_jobs,
        }
    }

    /// Records a submission tuple, returning `true` if this is the first time
    /// it has been seen for this job (i.e. the share should proceed).
    pub fn record_submission(
        &self,
        extranonce1: Extranonce,
        extranonce2: Extranonce,
        ntime: Ntime,
        nonce: Nonce,
    ) -> bool {
        self.submissions
            .lock()
            .insert((extranonce1, extranonce2, ntime, nonce))
    }
}
