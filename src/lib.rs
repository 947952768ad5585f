#![allow(clippy::too_many_arguments)]
use {
    anyhow::{Context, Error, anyhow, bail, ensure},
    arguments::Arguments,
    bitcoin::{
        Address, Amount, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence, Target,
        Transaction, TxIn, TxMerkleNode, TxOut, Txid, Witness,
        address::NetworkUnchecked,
        block::{self, Header},
        consensus::{self, Decodable, Encodable, encode},
        hashes::{Hash, sha256d},
        locktime::absolute::LockTime,
        script::write_scriptint,
    },
    bitcoincore_rpc::{Auth, RpcApi},
    block_template::BlockTemplate,
    byteorder::{BigEndian, ByteOrder, LittleEndian},
    chain::Chain,
    clap::Parser,
    coinbase::CoinbaseBuilder,
    dashmap::DashMap,
    derive_more::Display,
    dirs,
    futures::{SinkExt, StreamExt},
    hex::FromHex,
    job::Job,
    jobs::Jobs,
    parking_lot::Mutex,
    primitive_types::U256,
    rand::{Rng, RngCore},
    serde::{
        Deserialize, Serialize, Serializer,
        de::{self, Deserializer},
        ser::SerializeSeq,
    },
    serde_json::{Value, json},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    settings::Settings,
    stats::{HashRate, Stats, WorkerStats},
    std::{
        collections::{BTreeMap, HashMap, HashSet, VecDeque},
        env, fmt,
        fmt::{Display, Formatter},
        net::SocketAddr,
        ops::{BitAnd, BitOr, BitXor, Not},
        path::{Path, PathBuf},
        process,
        thread,
        str::FromStr,
        sync::{
            Arc, LazyLock,
            atomic::{AtomicU32, AtomicU64, Ordering},
        },
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    stratum::{
        Authorize, Configure, Difficulty, Extranonce, Id, JobId, JsonRpcError, MerkleNode,
        Message, Nbits, Nonce, Notify, Ntime, PrevHash, SetDifficulty, StratumError,
        StratumErrorCode, Submit, Subscribe, SubscribeResult, SuggestDifficulty, Version,
        merkle_branches, merkle_root,
    },
    tokio::{
        net::{
            TcpListener, TcpStream,
            tcp::{OwnedReadHalf, OwnedWriteHalf},
        },
        signal::ctrl_c,
        sync::{mpsc, watch},
        task::{self, JoinHandle, JoinSet},
        time::{interval, sleep, timeout},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LinesCodec},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
    tracing_subscriber::EnvFilter,
    username::Username,
};

mod arguments;
pub mod block_template;
pub mod chain;
pub mod coinbase;
pub mod connection;
pub mod extranonces;
pub mod generator;
pub mod job;
pub mod jobs;
mod options;
pub mod rpc;
pub mod server;
pub mod settings;
pub mod stats;
pub mod stratum;
pub mod username;
pub mod vardiff;

/// Satoshis per bitcoin.
pub const COIN_VALUE: u64 = 100_000_000;
pub const USER_AGENT: &str = "soloctl/0.1.0";
pub const EXTRANONCE1_SIZE: usize = 4;
pub const EXTRANONCE2_SIZE: usize = 4;

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Arguments::parse();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");

    let result = runtime.block_on(async {
        let cancel_token = CancellationToken::new();

        let signal_cancel_token = cancel_token.clone();
        task::spawn(async move {
            if ctrl_c().await.is_ok() {
                info!("received ctrl-c, shutting down");
                signal_cancel_token.cancel();
            }
        });

        args.run(cancel_token).await
    });

    match result {
        Err(err) => {
            error!("error: {err}");

            if env::var_os("RUST_BACKTRACE")
                .map(|val| val == "1")
                .unwrap_or_default()
            {
                error!("{}", err.backtrace());
            }
            process::exit(1);
        }
        Ok(_) => {
            process::exit(0);
        }
    }
}
