use {
    super::*,
    job::Job,
    jobs::Jobs,
    rpc::NodeClient,
    vardiff::Vardiff,
};

/// Subscription id returned to every client; the coordinator does not track
/// per-subscription interest, so this is a constant stub rather than a real
/// correlation id.
const SUBSCRIPTION_ID: &str = "0";

/// Stratum lines longer than this are a framing violation and close the
/// connection outright.
const MAX_LINE_LENGTH: usize = 8 * 1024;

/// A connection that sends this many malformed lines in a row, with no
/// well-formed message in between, is disconnected.
const MAX_MALFORMED_MESSAGES: u32 = 16;

const NTIME_PAST_TOLERANCE: u64 = 600;
const NTIME_FUTURE_TOLERANCE: u64 = 7200;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// `Connected -> Subscribed -> Authorized -> Working`, with no way back to
/// an earlier state: a client that wants a clean slate has to reconnect.
/// `Working` is reached once the first job notify has gone out after
/// authorization; it gates nothing on its own, it's bookkeeping for what a
/// connection has actually seen.
#[derive(Debug, Clone)]
enum State {
    Connected,
    Subscribed {
        enonce1: Extranonce,
        user_agent: Option<String>,
    },
    Authorized {
        enonce1: Extranonce,
        user_agent: Option<String>,
        address: Address,
        workername: String,
    },
    Working {
        enonce1: Extranonce,
        user_agent: Option<String>,
        address: Address,
        workername: String,
    },
}

impl State {
    fn enonce1(&self) -> Option<&Extranonce> {
        match self {
            State::Connected => None,
            State::Subscribed { enonce1, .. } => Some(enonce1),
            State::Authorized { enonce1, .. } | State::Working { enonce1, .. } => Some(enonce1),
        }
    }

    fn authorized(&self) -> Option<(&Address, &str)> {
        match self {
            State::Authorized {
                address, workername, ..
            }
            | State::Working {
                address, workername, ..
            } => Some((address, workername)),
            _ => None,
        }
    }

    fn is_subscribed(&self) -> bool {
        !matches!(self, State::Connected)
    }

    /// Moves `Authorized` to `Working` once a job has been sent; any other
    /// state is left alone.
    fn mark_working(&mut self) {
        if let State::Authorized {
            enonce1,
            user_agent,
            address,
            workername,
        } = self
        {
            *self = State::Working {
                enonce1: enonce1.clone(),
                user_agent: user_agent.clone(),
                address: address.clone(),
                workername: workername.clone(),
            };
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            State::Connected => write!(f, "Connected"),
            State::Subscribed { .. } => write!(f, "Subscribed"),
            State::Authorized { .. } => write!(f, "Authorized"),
            State::Working { .. } => write!(f, "Working"),
        }
    }
}

/// Allocates extranonce1 values that are pairwise distinct across every
/// concurrently-subscribed client: a sequential counter rather than random
/// bytes, so the uniqueness invariant holds deterministically instead of
/// merely with high probability.
pub struct ExtranonceAllocator {
    next: AtomicU32,
}

impl ExtranonceAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    pub fn allocate(&self) -> Extranonce {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Extranonce::from_bytes(&n.to_be_bytes())
    }
}

impl Default for ExtranonceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

enum Line {
    Message(Message),
    Malformed,
    Closed,
}

/// One connected Stratum client, driven by its own task. Shared state
/// (`jobs`, `stats`, the extranonce1 allocator) is reached through `Arc`s so
/// many connections run concurrently without contending on anything but
/// those seams.
pub struct Connection {
    socket_addr: SocketAddr,
    settings: Arc<Settings>,
    stats: Arc<Stats>,
    jobs: Arc<Jobs>,
    extranonces: Arc<ExtranonceAllocator>,
    node_client: Arc<dyn NodeClient>,
    chain: Chain,
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    job_rx: watch::Receiver<Option<Arc<Job>>>,
    cancel_token: CancellationToken,
    state: State,
    version_mask: Version,
    vardiff: Vardiff,
    malformed: u32,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: TcpStream,
        socket_addr: SocketAddr,
        settings: Arc<Settings>,
        stats: Arc<Stats>,
        jobs: Arc<Jobs>,
        extranonces: Arc<ExtranonceAllocator>,
        node_client: Arc<dyn NodeClient>,
        chain: Chain,
        job_rx: watch::Receiver<Option<Arc<Job>>>,
        cancel_token: CancellationToken,
    ) -> Self {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let vardiff = Vardiff::new(settings.vardiff_config(), settings.start_diff);
        let version_mask = settings.version_mask;

        stats.add_connection();

        Self {
            socket_addr,
            settings,
            stats,
            jobs,
            extranonces,
            node_client,
            chain,
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            job_rx,
            cancel_token,
            state: State::Connected,
            version_mask,
            vardiff,
            malformed: 0,
        }
    }

    pub async fn serve(mut self) -> Result {
        let mut job_rx = self.job_rx.clone();
        let cancel_token = self.cancel_token.clone();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("disconnecting {}", self.socket_addr);
                    break;
                }

                changed = job_rx.changed() => {
                    if changed.is_err() {
                        warn!("job channel closed, disconnecting {}", self.socket_addr);
                        break;
                    }

                    if !self.state.is_subscribed() {
                        continue;
                    }

                    let Some(job) = job_rx.borrow_and_update().clone() else {
                        continue;
                    };

                    self.send(Message::Notification {
                        method: "mining.notify".into(),
                        params: json!(job.notify()),
                    })
                    .await?;
                    self.state.mark_working();
                }

                line = self.read_line() => {
                    match line? {
                        Line::Closed => {
                            info!("{} disconnected", self.socket_addr);
                            break;
                        }
                        Line::Malformed => {
                            self.malformed += 1;

                            self.send(Message::Response {
                                id: Id::Null,
                                result: None,
                                error: Some(
                                    StratumError::InvalidParams {
                                        reason: "malformed json-rpc line".into(),
                                    }
                                    .into_response(None),
                                ),
                                reject_reason: None,
                            })
                            .await?;

                            if self.malformed > MAX_MALFORMED_MESSAGES {
                                warn!(
                                    "{} sent {} consecutive malformed lines, disconnecting",
                                    self.socket_addr, self.malformed
                                );
                                break;
                            }
                        }
                        Line::Message(message) => {
                            self.malformed = 0;

                            let Message::Request { id, method, params } = message else {
                                continue;
                            };

                            if let Err(err) = self.dispatch(id, &method, params).await {
                                warn!("error handling {method} from {}: {err}", self.socket_addr);
                            }
                        }
                    }
                }
            }
        }

        if let Some((_, workername)) = self.state.authorized() {
            if let Some(worker) = self.stats.get_worker(workername) {
                worker.mark_inactive();
            }
        }

        self.stats.sub_connection();

        Ok(())
    }

    async fn read_line(&mut self) -> Result<Line> {
        match self.reader.next().await {
            Some(Ok(line)) => match serde_json::from_str::<Message>(&line) {
                Ok(message) => Ok(Line::Message(message)),
                Err(err) => {
                    debug!(
                        "malformed line from {}: {err}; line={line:?}",
                        self.socket_addr
                    );
                    Ok(Line::Malformed)
                }
            },
            Some(Err(err)) => bail!("read error from {}: {err}", self.socket_addr),
            None => Ok(Line::Closed),
        }
    }

    async fn send(&mut self, message: Message) -> Result {
        let frame = serde_json::to_string(&message)?;
        self.writer.send(frame).await?;
        Ok(())
    }

    async fn send_error(&mut self, id: Id, error: StratumError) -> Result {
        self.send(Message::Response {
            id,
            result: None,
            error: Some(error.into_response(None)),
            reject_reason: None,
        })
        .await
    }

    async fn dispatch(&mut self, id: Id, method: &str, params: Value) -> Result {
        match method {
            "mining.subscribe" => {
                let subscribe = serde_json::from_value::<Subscribe>(params)?;
                self.subscribe(id, subscribe).await
            }
            "mining.authorize" => {
                let authorize = serde_json::from_value::<Authorize>(params)?;
                self.authorize(id, authorize).await
            }
            "mining.configure" => {
                self.send(Message::Response {
                    id,
                    result: Some(json!({})),
                    error: None,
                    reject_reason: None,
                })
                .await
            }
            "mining.suggest_difficulty" => {
                self.send(Message::Response {
                    id,
                    result: Some(json!(true)),
                    error: None,
                    reject_reason: None,
                })
                .await
            }
            "mining.submit" => {
                let submit = serde_json::from_value::<Submit>(params)?;
                self.submit(id, submit).await
            }
            other => {
                debug!("unknown method {other} from {}", self.socket_addr);
                Ok(())
            }
        }
    }

    async fn subscribe(&mut self, id: Id, subscribe: Subscribe) -> Result {
        let enonce1 = self.extranonces.allocate();
        let enonce2_size = self.settings.extranonce2_size();

        let subscriptions = vec![
            (
                "mining.set_difficulty".to_string(),
                SUBSCRIPTION_ID.to_string(),
            ),
            ("mining.notify".to_string(), SUBSCRIPTION_ID.to_string()),
        ];

        self.send(Message::Response {
            id,
            result: Some(json!(SubscribeResult {
                subscriptions,
                enonce1: enonce1.clone(),
                enonce2_size,
            })),
            error: None,
            reject_reason: None,
        })
        .await?;

        let user_agent = Some(subscribe.user_agent).filter(|agent| !agent.is_empty());
        self.state = State::Subscribed {
            enonce1,
            user_agent,
        };

        self.send(Message::Notification {
            method: "mining.set_difficulty".into(),
            params: json!(SetDifficulty(self.vardiff.current_diff())),
        })
        .await?;

        if let Some(job) = self.jobs.current() {
            self.send(Message::Notification {
                method: "mining.notify".into(),
                params: json!(job.notify()),
            })
            .await?;
        }

        Ok(())
    }

    async fn authorize(&mut self, id: Id, authorize: Authorize) -> Result {
        let Some(enonce1) = self.state.enonce1().cloned() else {
            self.send_error(id, StratumError::NotSubscribed).await?;
            return Ok(());
        };

        let username = Username::new(authorize.username.clone());

        let parsed = match username.parse_with_network(self.chain.network()) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.send_error(
                    id,
                    StratumError::InvalidParams {
                        reason: err.to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        let user_agent = match &self.state {
            State::Subscribed { user_agent, .. } => user_agent.clone(),
            _ => None,
        };

        self.stats
            .get_or_create_worker(&parsed.workername)
            .mark_active();

        self.send(Message::Response {
            id,
            result: Some(json!(true)),
            error: None,
            reject_reason: None,
        })
        .await?;

        self.state = State::Authorized {
            enonce1,
            user_agent,
            address: parsed.address,
            workername: parsed.workername,
        };

        if let Some(job) = self.jobs.current() {
            self.send(Message::Notification {
                method: "mining.notify".into(),
                params: json!(job.notify()),
            })
            .await?;
            self.state.mark_working();
        }

        Ok(())
    }

    async fn submit(&mut self, id: Id, submit: Submit) -> Result {
        let Some((_address, workername)) = self.state.authorized() else {
            self.send_error(id, StratumError::Unauthorized).await?;
            return Ok(());
        };
        let workername = workername.to_string();
        let enonce1 = self
            .state
            .enonce1()
            .cloned()
            .expect("authorized state carries an enonce1");

        let job_id: JobId = match submit.job_id.parse() {
            Ok(job_id) => job_id,
            Err(_) => {
                self.send_error(id, StratumError::JobNotFound).await?;
                self.stats.record_stale_share(&workername);
                return Ok(());
            }
        };

        let Some(job) = self.jobs.get(job_id) else {
            self.send_error(id, StratumError::Stale).await?;
            self.stats.record_stale_share(&workername);
            return Ok(());
        };

        let expected_len = 2 * self.settings.extranonce2_size();
        if submit.extranonce2.len() != expected_len {
            self.send_error(
                id,
                StratumError::InvalidParams {
                    reason: format!(
                        "extranonce2 must be {expected_len} hex chars, got {}",
                        submit.extranonce2.len()
                    ),
                },
            )
            .await?;
            self.stats.record_invalid_share(&workername);
            return Ok(());
        }

        let extranonce2 = match Extranonce::from_hex(&submit.extranonce2) {
            Ok(extranonce2) => extranonce2,
            Err(err) => {
                self.send_error(
                    id,
                    StratumError::InvalidParams {
                        reason: err.to_string(),
                    },
                )
                .await?;
                self.stats.record_invalid_share(&workername);
                return Ok(());
            }
        };

        if !job.record_submission(enonce1.clone(), extranonce2.clone(), submit.ntime, submit.nonce)
        {
            self.send_error(id, StratumError::Duplicate).await?;
            self.stats.record_invalid_share(&workername);
            return Ok(());
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let job_ntime = job.ntime.0 as u64;
        let submit_ntime = submit.ntime.0 as u64;
        if submit_ntime < job_ntime.saturating_sub(NTIME_PAST_TOLERANCE)
            || submit_ntime > now + NTIME_FUTURE_TOLERANCE
        {
            self.send_error(
                id,
                StratumError::InvalidParams {
                    reason: "ntime out of range".into(),
                },
            )
            .await?;
            self.stats.record_invalid_share(&workername);
            return Ok(());
        }

        let version = match submit.version_bits {
            Some(bits) => (job.version & !self.version_mask) | (bits & self.version_mask),
            None => job.version,
        };

        let merkle_root = merkle_root(
            &job.coinbase1,
            &job.coinbase2,
            &enonce1,
            &extranonce2,
            &job.merkle_branch,
        )?;

        let header = Header {
            version: version.into(),
            prev_blockhash: job.prev_hash.into(),
            merkle_root: merkle_root.into(),
            time: submit.ntime.into(),
            bits: job.nbits.to_compact(),
            nonce: submit.nonce.into(),
        };

        let hash = header.block_hash();

        let share_target = self.vardiff.current_diff().to_target();
        if !share_target.is_met_by(hash) {
            self.send_error(id, StratumError::LowDifficultyShare).await?;
            self.stats.record_invalid_share(&workername);
            return Ok(());
        }

        if let Ok(block_hash) = header.validate_pow(job.network_target) {
            info!("{block_hash} meets network difficulty, submitting block");
            self.submit_block(&job, &enonce1, &extranonce2, version, submit.ntime, submit.nonce)
                .await;
        }

        self.send(Message::Response {
            id,
            result: Some(json!(true)),
            error: None,
            reject_reason: None,
        })
        .await?;

        self.stats
            .record_valid_share(&workername, self.vardiff.current_diff().as_f64());

        if let Some(new_diff) = self.vardiff.record_share(Instant::now()) {
            self.send(Message::Notification {
                method: "mining.set_difficulty".into(),
                params: json!(SetDifficulty(new_diff)),
            })
            .await?;
        }

        Ok(())
    }

    async fn submit_block(
        &self,
        job: &Job,
        enonce1: &Extranonce,
        extranonce2: &Extranonce,
        version: Version,
        ntime: Ntime,
        nonce: Nonce,
    ) {
        let coinbase_hex = format!("{}{enonce1}{extranonce2}{}", job.coinbase1, job.coinbase2);

        let coinbase = match encode::deserialize_hex::<Transaction>(&coinbase_hex) {
            Ok(tx) => tx,
            Err(err) => {
                error!("failed to reassemble coinbase for block submission: {err}");
                return;
            }
        };

        let mut txdata = Vec::with_capacity(job.transactions.len() + 1);
        txdata.push(coinbase);
        txdata.extend(job.transactions.iter().cloned());

        let merkle_root = match merkle_root(&job.coinbase1, &job.coinbase2, enonce1, extranonce2, &job.merkle_branch) {
            Ok(root) => root,
            Err(err) => {
                error!("failed to recompute merkle root for block submission: {err}");
                return;
            }
        };

        let header = Header {
            version: version.into(),
            prev_blockhash: job.prev_hash.into(),
            merkle_root: merkle_root.into(),
            time: ntime.into(),
            bits: job.nbits.to_compact(),
            nonce: nonce.into(),
        };

        let block = block::Block { header, txdata };
        let block_hash = block.block_hash();
        let node_client = self.node_client.clone();

        match rpc::call_with_timeout(node_client, RPC_TIMEOUT, move |client| {
            client.submit_block(&block)
        })
        .await
        {
            Ok(()) => {
                self.stats.add_block();
                info!("block {block_hash} accepted");
            }
            Err(err) => error!("block {block_hash} rejected: {err}"),
        }
    }
}
