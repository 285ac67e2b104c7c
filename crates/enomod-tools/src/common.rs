use clap::Args;
use enomod_client::registers::{EMS_LIMIT_MAX, EMS_LIMIT_MIN, EMS_LIMIT_NONE};
use enomod_client::{Charger, ChargerConfig, ClientConfig, EnoOneClient};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Args)]
pub struct TcpConnectionArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 502)]
    pub port: u16,
    /// Per-attempt response timeout in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub timeout: u64,
    #[arg(long, default_value_t = 3)]
    pub retries: u8,
}

impl TcpConnectionArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::polling()
            .with_response_timeout(Duration::from_millis(self.timeout))
            .with_retry_count(self.retries)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ChargerArgs {
    #[command(flatten)]
    pub conn: TcpConnectionArgs,
    /// Charger has a second port on unit id 2.
    #[arg(long)]
    pub dual_port: bool,
    /// EMS control is enabled in the charger's web interface.
    #[arg(long)]
    pub ems_control: bool,
}

impl ChargerArgs {
    pub fn charger_config(&self) -> ChargerConfig {
        ChargerConfig::new(self.conn.host.clone())
            .with_port(self.conn.port)
            .with_dual_port(self.dual_port)
            .with_ems_control(self.ems_control)
    }
}

pub fn build_client(args: &TcpConnectionArgs, unit_id: u8) -> EnoOneClient {
    EnoOneClient::new(args.host.clone(), args.port, unit_id, args.client_config())
}

pub fn build_charger(args: &ChargerArgs) -> Charger {
    Charger::new(args.charger_config(), args.conn.client_config())
}

/// Abort the poll tasks, wait until each has settled, then close the
/// charger's connections.
pub async fn stop_polling(tasks: Vec<JoinHandle<()>>, charger: &Charger) {
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }
    charger.close().await;
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Parse an EMS limit in milliamps; `none` removes the limit.
pub fn parse_ems_limit(input: &str) -> Result<i16, String> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("none") || input.eq_ignore_ascii_case("off") {
        return Ok(EMS_LIMIT_NONE);
    }
    let value: i16 = input
        .parse()
        .map_err(|_| format!("invalid EMS limit: {input}"))?;
    if !(EMS_LIMIT_MIN..=EMS_LIMIT_MAX).contains(&value) {
        return Err(format!(
            "EMS limit {value} outside {EMS_LIMIT_MIN}..={EMS_LIMIT_MAX}"
        ));
    }
    Ok(value)
}
