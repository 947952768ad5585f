use super::*;

/// Pool-specific settings layered on top of the shared [`Options`].
#[derive(Clone, Debug, Parser)]
pub struct Settings {
    #[arg(long, default_value = "0.0.0.0", help = "Listen at <ADDRESS>.")]
    pub address: String,

    #[arg(long, default_value = "42069", help = "Listen on <PORT>.")]
    pub port: u16,

    #[arg(long, help = "Pay solved blocks to <PAYOUT_ADDRESS>.")]
    pub payout_address: Address<NetworkUnchecked>,

    #[arg(
        long,
        default_value = "soloctl",
        help = "Coinbase signature string embedded in solved blocks."
    )]
    pub pool_sig: String,

    #[arg(
        long,
        default_value = "5",
        help = "Poll the node for a fresh template every <POLL_INTERVAL> seconds."
    )]
    pub poll_interval: u64,

    #[arg(
        long,
        default_value = "30",
        help = "Force a fresh template at least every <FORCE_INTERVAL> seconds, even if the node reports no change."
    )]
    pub force_interval: u64,

    #[arg(
        long,
        default_value = "1fffe000",
        help = "Allow version rolling within <VERSION_MASK>."
    )]
    pub version_mask: Version,

    #[arg(
        long,
        default_value = "1",
        help = "Give <START_DIFF> to newly-authorized workers."
    )]
    pub start_diff: Difficulty,

    #[arg(long, default_value = "1", help = "Never vardiff below <MIN_DIFF>.")]
    pub min_diff: Difficulty,

    #[arg(
        long,
        default_value = "1000000000",
        help = "Never vardiff above <MAX_DIFF>."
    )]
    pub max_diff: Difficulty,

    #[arg(
        long,
        default_value = "10",
        help = "Target <VARDIFF_TARGET_SHARE_TIME> seconds between a worker's shares."
    )]
    pub vardiff_target_share_time: f64,

    #[arg(
        long,
        default_value = "120",
        help = "Wait <VARDIFF_RETARGET_INTERVAL> seconds between vardiff evaluations."
    )]
    pub vardiff_retarget_interval: f64,

    #[arg(
        long,
        default_value = "4",
        value_parser = clap::value_parser!(u8).range(2..=8),
        help = "Use <EXTRANONCE2_SIZE> bytes of extranonce2."
    )]
    pub extranonce2_size: u8,
}

impl Settings {
    pub fn payout_address(&self, chain: Chain) -> Result<Address> {
        self.payout_address
            .clone()
            .require_network(chain.network())
            .with_context(|| format!("payout address is not valid for {chain}"))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .with_context(|| format!("invalid listen address `{}:{}`", self.address, self.port))
    }

    pub fn extranonce2_size(&self) -> usize {
        self.extranonce2_size as usize
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn force_interval(&self) -> Duration {
        Duration::from_secs(self.force_interval)
    }

    pub fn vardiff_config(&self) -> vardiff::VardiffConfig {
        let mut config = vardiff::VardiffConfig::new(
            Duration::from_secs_f64(self.vardiff_target_share_time),
            self.min_diff,
            self.max_diff,
        );
        config.retarget_interval = Duration::from_secs_f64(self.vardiff_retarget_interval);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::try_parse_from([
            "soloctl",
            "--payout-address",
            "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
        ])
        .unwrap()
    }

    #[test]
    fn defaults_are_reasonable() {
        let settings = settings();
        assert_eq!(settings.port, 42069);
        assert_eq!(settings.extranonce2_size(), 4);
        assert_eq!(settings.poll_interval(), Duration::from_secs(5));
        assert_eq!(settings.force_interval(), Duration::from_secs(30));
    }

    #[test]
    fn payout_address_requires_matching_network() {
        let settings = settings();
        assert!(settings.payout_address(Chain::Regtest).is_ok());
        assert!(settings.payout_address(Chain::Mainnet).is_err());
    }

    #[test]
    fn socket_addr_combines_address_and_port() {
        let settings = settings();
        assert_eq!(
            settings.socket_addr().unwrap(),
            "0.0.0.0:42069".parse().unwrap()
        );
    }

    #[test]
    fn extranonce2_size_rejects_out_of_range() {
        let result = Settings::try_parse_from([
            "soloctl",
            "--payout-address",
            "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
            "--extranonce2-size",
            "9",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn vardiff_config_carries_bounds() {
        let settings = settings();
        let config = settings.vardiff_config();
        assert_eq!(config.min_difficulty, settings.min_diff);
        assert_eq!(config.max_difficulty, settings.max_diff);
        assert_eq!(
            config.retarget_interval,
            Duration::from_secs_f64(settings.vardiff_retarget_interval)
        );
    }
}
