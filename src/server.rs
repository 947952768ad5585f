use {
    super::*,
    connection::{Connection, ExtranonceAllocator},
    extranonces::PoolExtranonces,
    rpc::NodeClient,
};

/// Binds the listen socket, wires up the shared job registry/statistics/
/// extranonce allocator, starts the template-refresh loop, and accepts
/// connections until cancelled.
pub async fn serve(
    settings: Settings,
    chain: Chain,
    node_client: Arc<dyn NodeClient>,
    cancel_token: CancellationToken,
) -> Result {
    let settings = Arc::new(settings);

    PoolExtranonces::new(EXTRANONCE1_SIZE, settings.extranonce2_size())
        .context("invalid extranonce configuration")?;

    let pool_address = settings
        .payout_address(chain)
        .context("invalid payout address")?;

    let mut tasks = JoinSet::new();
    let stats = Arc::new(Stats::new());
    let jobs = Arc::new(Jobs::new());
    let extranonces = Arc::new(ExtranonceAllocator::new());

    let job_rx = generator::spawn(
        settings.clone(),
        pool_address,
        chain,
        node_client.clone(),
        jobs.clone(),
        cancel_token.clone(),
        &mut tasks,
    )
    .await;

    let socket_addr = settings.socket_addr()?;
    let listener = TcpListener::bind(socket_addr)
        .await
        .with_context(|| format!("failed to bind to {socket_addr}"))?;

    info!("stratum server listening on {socket_addr}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted.context("failed to accept connection")?;
                info!("accepted connection from {addr}");

                let settings = settings.clone();
                let stats = stats.clone();
                let jobs = jobs.clone();
                let extranonces = extranonces.clone();
                let node_client = node_client.clone();
                let job_rx = job_rx.clone();
                let conn_cancel_token = cancel_token.child_token();

                tasks.spawn(async move {
                    let connection = Connection::new(
                        stream,
                        addr,
                        settings,
                        stats,
                        jobs,
                        extranonces,
                        node_client,
                        chain,
                        job_rx,
                        conn_cancel_token,
                    );

                    if let Err(err) = connection.serve().await {
                        error!("connection error for {addr}: {err}");
                    }
                });
            }
            _ = cancel_token.cancelled() => {
                info!("shutting down stratum server");
                break;
            }
        }
    }

    while tasks.join_next().await.is_some() {}

    Ok(())
}
