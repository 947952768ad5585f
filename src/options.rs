use super::*;

#[derive(Clone, Default, Debug, Parser)]
#[command(group(
    clap::ArgGroup::new("chains")
        .required(false)
        .args(&["chain", "signet", "regtest", "testnet", "testnet4"]),
))]
pub struct Options {
    #[arg(long, alias = "datadir", help = "Store data in <DATA_DIR>.")]
    pub data_dir: Option<PathBuf>,

    #[arg(long = "chain", value_enum, help = "Use <CHAIN>. [default: mainnet]")]
    pub chain: Option<Chain>,

    #[arg(
        long,
        short = 's',
        help = "Use signet. Equivalent to `--chain signet`."
    )]
    pub signet: bool,

    #[arg(
        long,
        short = 'r',
        help = "Use regtest. Equivalent to `--chain regtest`."
    )]
    pub regtest: bool,

    #[arg(
        long,
        short = 't',
        help = "Use testnet. Equivalent to `--chain testnet`."
    )]
    pub testnet: bool,

    #[arg(long, help = "Use testnet4. Equivalent to `--chain testnet4`.")]
    pub testnet4: bool,

    #[arg(long, help = "Load Bitcoin Core data dir from <BITCOIN_DATA_DIR>.")]
    pub bitcoin_data_dir: Option<PathBuf>,

    #[arg(long, help = "Connect to Bitcoin Core RPC at <BITCOIN_RPC_PORT>.")]
    pub bitcoin_rpc_port: Option<u16>,

    #[arg(
        long,
        help = "Authenticate to Bitcoin Core RPC as <BITCOIN_RPC_USERNAME>."
    )]
    pub bitcoin_rpc_username: Option<String>,

    #[arg(
        long,
        help = "Authenticate to Bitcoin Core RPC with <BITCOIN_RPC_PASSWORD>."
    )]
    pub bitcoin_rpc_password: Option<String>,

    #[arg(
        long,
        help = "Load Bitcoin Core RPC cookie file from <BITCOIN_RPC_COOKIE_FILE>."
    )]
    pub bitcoin_rpc_cookie_file: Option<PathBuf>,
}

impl Options {
    pub fn chain(&self) -> Chain {
        if self.signet {
            Chain::Signet
        } else if self.regtest {
            Chain::Regtest
        } else if self.testnet {
            Chain::Testnet
        } else if self.testnet4 {
            Chain::Testnet4
        } else {
            self.chain.unwrap_or_default()
        }
    }

    pub fn bitcoin_rpc_port(&self) -> u16 {
        self.bitcoin_rpc_port
            .unwrap_or_else(|| self.chain().default_rpc_port())
    }

    pub fn bitcoin_rpc_url(&self) -> String {
        format!("127.0.0.1:{}/", self.bitcoin_rpc_port())
    }

    pub fn cookie_file(&self) -> Result<PathBuf> {
        if let Some(cookie_file) = &self.bitcoin_rpc_cookie_file {
            return Ok(cookie_file.clone());
        }

        let path = if let Some(bitcoin_data_dir) = &self.bitcoin_data_dir {
            bitcoin_data_dir.clone()
        } else if cfg!(target_os = "linux") {
            dirs::home_dir()
                .ok_or_else(|| anyhow!("failed to get cookie file path: could not get home dir"))?
                .join(".bitcoin")
        } else {
            dirs::data_dir()
                .ok_or_else(|| anyhow!("failed to get cookie file path: could not get data dir"))?
                .join("Bitcoin")
        };

        Ok(self.chain().join_with_data_dir(path).join(".cookie"))
    }

    pub fn bitcoin_credentials(&self) -> Result<Auth> {
        match (&self.bitcoin_rpc_username, &self.bitcoin_rpc_password) {
            (Some(user), Some(pass)) => Ok(Auth::UserPass(user.clone(), pass.clone())),
            _ => Ok(Auth::CookieFile(self.cookie_file()?)),
        }
    }
}
