use {
    bitcoin::{Address, BlockHash, address::NetworkUnchecked, hashes::Hash},
    clap::Parser,
    serde_json::{Value, json},
    soloctl::{
        block_template::{BlockTemplate, TemplateTransaction},
        chain::Chain,
        rpc::NodeClient,
        server,
        settings::Settings,
        stratum::{Ntime, Version},
    },
    std::{
        collections::BTreeMap,
        sync::{
            Arc,
            atomic::{AtomicU32, AtomicU64, Ordering},
        },
        time::Duration,
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpStream,
        time::timeout,
    },
    tokio_util::sync::CancellationToken,
};

struct StubNodeClient {
    template: BlockTemplate,
    blocks_submitted: AtomicU32,
}

impl StubNodeClient {
    fn new(template: BlockTemplate) -> Self {
        Self {
            template,
            blocks_submitted: AtomicU32::new(0),
        }
    }
}

impl NodeClient for StubNodeClient {
    fn get_block_template(&self, _chain: Chain) -> soloctl::Result<BlockTemplate> {
        Ok(self.template.clone())
    }

    fn submit_block(&self, _block: &bitcoin::block::Block) -> soloctl::Result<()> {
        self.blocks_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn template() -> BlockTemplate {
    BlockTemplate {
        bits: "1d00ffff".parse().unwrap(),
        previous_block_hash: BlockHash::from_byte_array([7; 32]),
        current_time: Ntime::from(1_700_000_000),
        height: 100,
        version: Version::from(0x2000_0000i32),
        transactions: Vec::<TemplateTransaction>::new(),
        default_witness_commitment: bitcoin::ScriptBuf::new(),
        coinbaseaux: BTreeMap::new(),
        coinbase_value: bitcoin::Amount::from_sat(5_000_000_000),
    }
}

fn payout_address() -> Address<NetworkUnchecked> {
    "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        .parse()
        .unwrap()
}

static NEXT_PORT: AtomicU64 = AtomicU64::new(42_300);

fn test_settings() -> Settings {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    Settings::try_parse_from([
        "soloctl",
        "--address",
        "127.0.0.1",
        "--port",
        &port.to_string(),
        "--payout-address",
        &payout_address().assume_checked().to_string(),
        "--poll-interval",
        "1",
    ])
    .unwrap()
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Value {
    let mut line = String::new();
    timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .expect("read error");
    serde_json::from_str(line.trim()).expect("response was not valid json")
}

async fn write_line(writer: &mut tokio::net::tcp::OwnedWriteHalf, value: Value) {
    let mut line = serde_json::to_string(&value).unwrap();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn subscribe_authorize_and_receive_a_job() {
    let settings = test_settings();
    let socket_addr = settings.socket_addr().unwrap();

    let node_client: Arc<dyn NodeClient> = Arc::new(StubNodeClient::new(template()));
    let cancel_token = CancellationToken::new();

    let server_cancel_token = cancel_token.clone();
    let server_task = tokio::spawn(async move {
        server::serve(settings, Chain::Regtest, node_client, server_cancel_token)
            .await
            .unwrap();
    });

    // Give the accept loop a moment to bind before connecting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = timeout(Duration::from_secs(5), TcpStream::connect(socket_addr))
        .await
        .expect("timed out connecting")
        .expect("failed to connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_line(
        &mut write_half,
        json!({"id": 1, "method": "mining.subscribe", "params": ["integration-test/0.1"]}),
    )
    .await;
    let subscribe_response = read_line(&mut reader).await;
    assert_eq!(subscribe_response["id"], json!(1));
    assert!(subscribe_response["error"].is_null());

    let set_difficulty = read_line(&mut reader).await;
    assert_eq!(set_difficulty["method"], json!("mining.set_difficulty"));

    write_line(
        &mut write_half,
        json!({"id": 2, "method": "mining.authorize", "params": [payout_address().assume_checked().to_string() + ".worker1", "x"]}),
    )
    .await;
    let authorize_response = read_line(&mut reader).await;
    assert_eq!(authorize_response["id"], json!(2));
    assert_eq!(authorize_response["result"], json!(true));

    let notify = read_line(&mut reader).await;
    assert_eq!(notify["method"], json!("mining.notify"));
    let job_id = notify["params"][0].as_str().unwrap().to_string();
    assert!(!job_id.is_empty());

    cancel_token.cancel();
    let _ = timeout(Duration::from_secs(5), server_task).await;
}

#[tokio::test]
async fn malformed_lines_get_a_json_rpc_error_without_disconnecting() {
    let settings = test_settings();
    let socket_addr = settings.socket_addr().unwrap();

    let node_client: Arc<dyn NodeClient> = Arc::new(StubNodeClient::new(template()));
    let cancel_token = CancellationToken::new();

    let server_cancel_token = cancel_token.clone();
    let server_task = tokio::spawn(async move {
        server::serve(settings, Chain::Regtest, node_client, server_cancel_token)
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = timeout(Duration::from_secs(5), TcpStream::connect(socket_addr))
        .await
        .expect("timed out connecting")
        .expect("failed to connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"not even json\n").await.unwrap();
    let response = read_line(&mut reader).await;
    assert!(response["error"].is_array() || !response["error"].is_null());

    write_line(
        &mut write_half,
        json!({"id": 1, "method": "mining.subscribe", "params": ["integration-test/0.1"]}),
    )
    .await;
    let subscribe_response = read_line(&mut reader).await;
    assert_eq!(subscribe_response["id"], json!(1));

    cancel_token.cancel();
    let _ = timeout(Duration::from_secs(5), server_task).await;
}

#[tokio::test]
async fn share_below_share_target_is_rejected_without_submitting_a_block() {
    let settings = test_settings();
    let socket_addr = settings.socket_addr().unwrap();

    let stub = Arc::new(StubNodeClient::new(template()));
    let node_client: Arc<dyn NodeClient> = stub.clone();
    let cancel_token = CancellationToken::new();

    let server_cancel_token = cancel_token.clone();
    let server_task = tokio::spawn(async move {
        server::serve(settings, Chain::Regtest, node_client, server_cancel_token)
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = timeout(Duration::from_secs(5), TcpStream::connect(socket_addr))
        .await
        .expect("timed out connecting")
        .expect("failed to connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_line(
        &mut write_half,
        json!({"id": 1, "method": "mining.subscribe", "params": ["integration-test/0.1"]}),
    )
    .await;
    let subscribe_response = read_line(&mut reader).await;
    assert!(subscribe_response["error"].is_null());

    let set_difficulty = read_line(&mut reader).await;
    assert_eq!(set_difficulty["method"], json!("mining.set_difficulty"));

    write_line(
        &mut write_half,
        json!({"id": 2, "method": "mining.authorize", "params": [payout_address().assume_checked().to_string() + ".worker1", "x"]}),
    )
    .await;
    let authorize_response = read_line(&mut reader).await;
    assert_eq!(authorize_response["result"], json!(true));

    let notify = read_line(&mut reader).await;
    assert_eq!(notify["method"], json!("mining.notify"));
    let job_id = notify["params"][0].as_str().unwrap().to_string();
    let ntime = notify["params"][7].as_str().unwrap().to_string();

    write_line(
        &mut write_half,
        json!({
            "id": 3,
            "method": "mining.submit",
            "params": [
                payout_address().assume_checked().to_string() + ".worker1",
                job_id,
                "00000000",
                ntime,
                "00000000",
            ],
        }),
    )
    .await;
    let submit_response = read_line(&mut reader).await;
    assert_eq!(submit_response["id"], json!(3));
    assert_eq!(submit_response["error"][0], json!(23));

    cancel_token.cancel();
    let _ = timeout(Duration::from_secs(5), server_task).await;

    assert_eq!(stub.blocks_submitted.load(Ordering::Relaxed), 0);
}
