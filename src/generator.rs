use {
    super::*,
    rpc::{NodeClient, call_with_timeout},
};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// The coinbase split discards whatever bytes sit in the extranonce1/2
/// placeholder region (see `coinbase.rs`), so the job's own coinbase1/2 only
/// need the placeholder to be the right length, not any particular value;
/// the real extranonce1 is substituted back in per-connection at share time.
fn placeholder_extranonce1() -> Extranonce {
    Extranonce::from_bytes(&[0u8; EXTRANONCE1_SIZE])
}

/// Decides whether a fetched template is worth turning into a new job: a
/// changed tip always is, an unchanged one only once `force_interval` has
/// passed, and the very first fetch always is regardless of `forced`.
fn should_refresh(previous_hash: Option<BlockHash>, clean_jobs: bool, forced: bool) -> bool {
    previous_hash.is_none() || clean_jobs || forced
}

/// Polls the node for a fresh block template, builds a new job from it, and
/// broadcasts it to every subscribed connection. Runs at `poll_interval`,
/// but never waits longer than `force_interval` without pushing a job even
/// if the template looks unchanged, so long-idle connections still see
/// their ntime/height stay fresh.
async fn refresh_loop(
    settings: Arc<Settings>,
    pool_address: Address,
    chain: Chain,
    node_client: Arc<dyn NodeClient>,
    jobs: Arc<Jobs>,
    sender: watch::Sender<Option<Arc<Job>>>,
    cancel_token: CancellationToken,
) {
    let mut previous_hash: Option<BlockHash> = None;
    let mut last_forced = Instant::now();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("shutting down template refresh loop");
                break;
            }
            _ = sleep(settings.poll_interval()) => {}
        }

        let template = match call_with_timeout(node_client.clone(), RPC_TIMEOUT, move |client| {
            client.get_block_template(chain)
        })
        .await
        {
            Ok(template) => template,
            Err(err) => {
                warn!("failed to fetch block template: {err}");
                continue;
            }
        };

        let clean_jobs = Some(template.previous_block_hash) != previous_hash;
        let forced = last_forced.elapsed() >= settings.force_interval();

        if !should_refresh(previous_hash, clean_jobs, forced) {
            continue;
        }

        let job_id = jobs.next_job_id();
        let job = match Job::build(
            &template,
            &pool_address,
            &settings.pool_sig,
            placeholder_extranonce1(),
            settings.extranonce2_size(),
            job_id,
            clean_jobs,
        ) {
            Ok(job) => job,
            Err(err) => {
                error!("failed to build job from template: {err}");
                continue;
            }
        };

        previous_hash = Some(template.previous_block_hash);
        last_forced = Instant::now();

        let job = jobs.insert(job);
        sender.send_replace(Some(job));
    }
}

/// Hands the template refresh loop off to a background task. The returned
/// receiver starts out empty (`None`) until the first poll completes; callers
/// that send a job to a connection before then just don't, yet.
pub async fn spawn(
    settings: Arc<Settings>,
    pool_address: Address,
    chain: Chain,
    node_client: Arc<dyn NodeClient>,
    jobs: Arc<Jobs>,
    cancel_token: CancellationToken,
    tasks: &mut JoinSet<()>,
) -> watch::Receiver<Option<Arc<Job>>> {
    let (sender, receiver) = watch::channel(None);

    tasks.spawn(refresh_loop(
        settings,
        pool_address,
        chain,
        node_client,
        jobs,
        sender,
        cancel_token,
    ));

    receiver
}

#[cfg(test)]
mod tests {
    use {super::*, rpc::fake::FakeNodeClient};

    fn template(prev_hash_byte: u8) -> BlockTemplate {
        BlockTemplate {
            bits: Nbits::from_str("1d00ffff").unwrap(),
            previous_block_hash: BlockHash::from_byte_array([prev_hash_byte; 32]),
            current_time: Ntime::from(1_700_000_000),
            height: 800_000,
            version: Version::from(0x2000_0000i32),
            transactions: Vec::new(),
            default_witness_commitment: ScriptBuf::new(),
            coinbaseaux: BTreeMap::new(),
            coinbase_value: Amount::from_sat(312_500_000),
        }
    }

    fn address() -> Address {
        "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
            .parse::<Address<NetworkUnchecked>>()
            .unwrap()
            .assume_checked()
    }

    fn settings() -> Arc<Settings> {
        Arc::new(
            Settings::try_parse_from([
                "soloctl",
                "--payout-address",
                "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
                "--poll-interval",
                "0",
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn first_template_produces_a_clean_job() {
        let jobs = Arc::new(Jobs::new());
        let node_client: Arc<dyn NodeClient> = Arc::new(FakeNodeClient::new(template(1)));
        let cancel_token = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let mut job_rx = spawn(
            settings(),
            address(),
            Chain::Regtest,
            node_client,
            jobs,
            cancel_token.clone(),
            &mut tasks,
        )
        .await;

        job_rx.changed().await.unwrap();
        let job = job_rx.borrow().clone().unwrap();
        assert!(job.clean_jobs);

        cancel_token.cancel();
        while tasks.join_next().await.is_some() {}
    }

    #[test]
    fn first_fetch_always_refreshes() {
        assert!(should_refresh(None, false, false));
    }

    #[test]
    fn changed_tip_always_refreshes() {
        assert!(should_refresh(Some(BlockHash::from_byte_array([1; 32])), true, false));
    }

    #[test]
    fn unchanged_tip_waits_for_force() {
        let previous = Some(BlockHash::from_byte_array([1; 32]));
        assert!(!should_refresh(previous, false, false));
        assert!(should_refresh(previous, false, true));
    }
}
