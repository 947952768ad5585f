use {
    super::*,
    clap::builder::styling::{AnsiColor, Effects, Styles},
    options::Options,
    rpc::BitcoinRpcClient,
    settings::Settings,
};

#[derive(Debug, Parser)]
#[command(
  version,
  styles = Styles::styled()
    .error(AnsiColor::Red.on_default() | Effects::BOLD)
    .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
    .invalid(AnsiColor::Red.on_default())
    .literal(AnsiColor::Blue.on_default())
    .placeholder(AnsiColor::Cyan.on_default())
    .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
    .valid(AnsiColor::Green.on_default()),
)]
pub(crate) struct Arguments {
    #[command(flatten)]
    pub(crate) options: Options,
    #[command(flatten)]
    pub(crate) settings: Settings,
}

impl Arguments {
    pub(crate) async fn run(self, cancel_token: CancellationToken) -> Result {
        let chain = self.options.chain();

        let node_client: Arc<dyn rpc::NodeClient> = Arc::new(
            BitcoinRpcClient::connect(&self.options.bitcoin_rpc_url(), self.options.bitcoin_credentials()?)
                .context("failed to connect to Bitcoin Core")?,
        );

        server::serve(self.settings, chain, node_client, cancel_token).await
    }
}
