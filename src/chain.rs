use super::*;

/// Which Bitcoin network to coordinate mining for. Wraps [`bitcoin::Network`]
/// with the RPC/default-datadir conventions `bitcoind` uses per chain.
#[derive(
    Debug, Default, PartialEq, Eq, Clone, Copy, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[default]
    #[clap(alias = "bitcoin")]
    Mainnet,
    Regtest,
    Signet,
    Testnet,
    Testnet4,
}

impl Chain {
    pub fn network(self) -> Network {
        match self {
            Self::Mainnet => Network::Bitcoin,
            Self::Regtest => Network::Regtest,
            Self::Signet => Network::Signet,
            Self::Testnet => Network::Testnet,
            Self::Testnet4 => Network::Testnet4,
        }
    }

    pub fn default_rpc_port(self) -> u16 {
        match self {
            Self::Mainnet => 8332,
            Self::Regtest => 18443,
            Self::Signet => 38332,
            Self::Testnet => 18332,
            Self::Testnet4 => 48332,
        }
    }

    /// `bitcoind` nests non-mainnet chains under a subdirectory of the data
    /// dir (`regtest/`, `signet/`, `testnet3/`); mainnet uses the dir as-is.
    pub fn join_with_data_dir(self, data_dir: impl Into<PathBuf>) -> PathBuf {
        let data_dir = data_dir.into();
        match self {
            Self::Mainnet => data_dir,
            Self::Regtest => data_dir.join("regtest"),
            Self::Signet => data_dir.join("signet"),
            Self::Testnet => data_dir.join("testnet3"),
            Self::Testnet4 => data_dir.join("testnet4"),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mainnet => "mainnet",
            Self::Regtest => "regtest",
            Self::Signet => "signet",
            Self::Testnet => "testnet",
            Self::Testnet4 => "testnet4",
        })
    }
}
