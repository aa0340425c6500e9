//! Validator process configuration: everything needed to stand the daemon
//! up is read once, at startup, from the CLI/environment (spec.md §6's
//! "domain configuration loaders" are out of scope; what survives is the
//! handful of knobs the core actually needs). Runtime-tunable policy lives
//! in [`compute_validator_common::config::DynamicConfig`] instead, polled
//! from the `dynamic_config` table.

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "validator", about = "Compute marketplace validator daemon")]
pub struct ValidatorConfig {
    /// Postgres connection string for the persisted miner/receipt/event tables.
    #[arg(long, env = "VALIDATOR_DATABASE_URL")]
    pub database_url: String,

    /// Directory for the embedded `sled` prefetch-cache database.
    #[arg(long, env = "VALIDATOR_CACHE_DIR", default_value = "./validator-cache")]
    pub cache_dir: String,

    /// Lite (pruned, low-latency) chain RPC websocket endpoint.
    #[arg(long, env = "VALIDATOR_CHAIN_LITE_URL")]
    pub chain_lite_url: String,

    /// Archive chain RPC websocket endpoint, used as a fallback when the
    /// lite node has already pruned a requested block.
    #[arg(long, env = "VALIDATOR_CHAIN_ARCHIVE_URL")]
    pub chain_archive_url: Option<String>,

    /// This validator's own ss58 hotkey, used to tag emitted receipts.
    #[arg(long, env = "VALIDATOR_HOTKEY")]
    pub hotkey: String,

    /// Hex-encoded Ed25519 secret key (32 bytes) used to sign receipts.
    #[arg(long, env = "VALIDATOR_SIGNING_KEY_HEX")]
    pub signing_key_hex: String,

    /// Number of concurrent prefetch workers (spec.md §4.2).
    #[arg(long, env = "VALIDATOR_PREFETCH_WORKERS", default_value_t = compute_validator_common::config::DEFAULT_PREFETCH_WORKERS)]
    pub prefetch_workers: usize,

    /// Address the Prometheus exporter listens on.
    #[arg(long, env = "VALIDATOR_METRICS_ADDR", default_value = "0.0.0.0:9100")]
    pub metrics_addr: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum Command {
    /// Run the full daemon: facilitator link, receipt keep-up loop, prefetch cache.
    Run,
    /// Sweep every configured miner's receipts once (cold + hot pages) and exit.
    TransferReceiptsOnce,
}

impl ValidatorConfig {
    pub fn parse_signing_key(&self) -> anyhow::Result<[u8; 32]> {
        let bytes = hex::decode(&self.signing_key_hex)?;
        bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("VALIDATOR_SIGNING_KEY_HEX must decode to exactly 32 bytes"))
    }
}
