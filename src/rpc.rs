use super::*;

/// Thin seam over the node RPC calls the coordinator needs, so the template
/// refresh loop and block submission can be exercised against an in-memory
/// fake instead of a running `bitcoind`.
pub trait NodeClient: Send + Sync + 'static {
    fn get_block_template(&self, chain: Chain) -> Result<BlockTemplate>;
    fn submit_block(&self, block: &block::Block) -> Result<()>;
}

pub struct BitcoinRpcClient {
    inner: bitcoincore_rpc::Client,
}

impl BitcoinRpcClient {
    pub fn connect(url: &str, auth: Auth) -> Result<Self> {
        let inner = bitcoincore_rpc::Client::new(url, auth)
            .with_context(|| format!("failed to connect to Bitcoin Core RPC at `{url}`"))?;
        Ok(Self { inner })
    }

    /// Blocks until the node reports a matching chain, retrying while it is
    /// still in initial block download (`-28`).
    pub fn wait_for_chain(&self, expected: Chain) -> Result<()> {
        let mut checks = 0;
        loop {
            match self.inner.get_blockchain_info() {
                Ok(info) => {
                    let rpc_chain = match info.chain.to_string().as_str() {
                        "bitcoin" => Chain::Mainnet,
                        "regtest" => Chain::Regtest,
                        "signet" => Chain::Signet,
                        "testnet" => Chain::Testnet,
                        "testnet4" => Chain::Testnet4,
                        other => bail!("Bitcoin RPC server on unknown chain: {other}"),
                    };
                    ensure!(
                        rpc_chain == expected,
                        "Bitcoin RPC server is on {rpc_chain} but soloctl is on {expected}"
                    );
                    return Ok(());
                }
                Err(bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Rpc(err)))
                    if err.code == -28 => {}
                Err(err) => bail!("failed to query Bitcoin Core RPC: {err}"),
            }

            ensure!(checks < 100, "timed out waiting for Bitcoin Core RPC");
            checks += 1;
            thread::sleep(Duration::from_millis(100));
        }
    }
}

impl NodeClient for BitcoinRpcClient {
    fn get_block_template(&self, chain: Chain) -> Result<BlockTemplate> {
        let mut rules = vec!["segwit"];
        if chain == Chain::Signet {
            rules.push("signet");
        }

        let params = json!({
            "capabilities": ["coinbasetxn", "workid", "coinbase/append"],
            "rules": rules,
        });

        Ok(self
            .inner
            .call::<BlockTemplate>("getblocktemplate", &[params])?)
    }

    fn submit_block(&self, block: &block::Block) -> Result<()> {
        self.inner.submit_block(block)?;
        Ok(())
    }
}

/// Calls a blocking [`NodeClient`] method on the blocking thread pool with a
/// timeout, so an unresponsive node can't stall the async runtime.
pub async fn call_with_timeout<T, F>(client: Arc<dyn NodeClient>, timeout_duration: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn NodeClient) -> Result<T> + Send + 'static,
{
    timeout(timeout_duration, task::spawn_blocking(move || f(client.as_ref())))
        .await
        .context("node RPC call timed out")?
        .context("node RPC task panicked")?
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    pub(crate) struct FakeNodeClient {
        pub template: Mutex<BlockTemplate>,
        pub submitted: Mutex<Vec<block::Block>>,
        pub fail_next: std::sync::atomic::AtomicBool,
    }

    impl FakeNodeClient {
        pub(crate) fn new(template: BlockTemplate) -> Self {
            Self {
                template: Mutex::new(template),
                submitted: Mutex::new(Vec::new()),
                fail_next: std::sync::atomic::AtomicBool::new(false),
            }
        }

        pub(crate) fn set_template(&self, template: BlockTemplate) {
            *self.template.lock() = template;
        }
    }

    impl NodeClient for FakeNodeClient {
        fn get_block_template(&self, _chain: Chain) -> Result<BlockTemplate> {
            if self.fail_next.swap(false, Ordering::Relaxed) {
                bail!("simulated RPC failure");
            }
            Ok(self.template.lock().clone())
        }

        fn submit_block(&self, block: &block::Block) -> Result<()> {
            self.submitted.lock().push(block.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fake::FakeNodeClient, *};

    fn template() -> BlockTemplate {
        BlockTemplate {
            bits: Nbits::from_str("1d00ffff").unwrap(),
            previous_block_hash: BlockHash::from_byte_array([0; 32]),
            current_time: Ntime::from(1_700_000_000),
            height: 1,
            version: Version::from(1i32),
            transactions: Vec::new(),
            default_witness_commitment: ScriptBuf::new(),
            coinbaseaux: BTreeMap::new(),
            coinbase_value: Amount::from_sat(COIN_VALUE),
        }
    }

    #[tokio::test]
    async fn call_with_timeout_returns_client_result() {
        let client: Arc<dyn NodeClient> = Arc::new(FakeNodeClient::new(template()));
        let result = call_with_timeout(client, Duration::from_secs(5), |c| {
            c.get_block_template(Chain::Regtest)
        })
        .await
        .unwrap();
        assert_eq!(result.height, 1);
    }

    #[tokio::test]
    async fn call_with_timeout_propagates_failure() {
        let fake = Arc::new(FakeNodeClient::new(template()));
        fake.fail_next.store(true, Ordering::Relaxed);
        let client: Arc<dyn NodeClient> = fake;
        let result = call_with_timeout(client, Duration::from_secs(5), |c| {
            c.get_block_template(Chain::Regtest)
        })
        .await;
        assert!(result.is_err());
    }
}
