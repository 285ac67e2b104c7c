use clap::Parser;
use enomod_client::entities::EmsLimitNumber;
use enomod_tools::common::{build_client, init_tracing, parse_ems_limit, TcpConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "enoone-set-limit", about = "Apply or remove the EMS current limit")]
struct Args {
    #[command(flatten)]
    conn: TcpConnectionArgs,
    #[arg(long, default_value_t = 1)]
    unit_id: u8,
    /// Limit in milliamps, or `none` to remove it.
    #[arg(long, value_parser = parse_ems_limit, allow_hyphen_values = true)]
    limit: i16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let client = build_client(&args.conn, args.unit_id);

    let mut number = EmsLimitNumber::new();
    let applied = number.set(&client, args.limit).await?;
    if applied < 0 {
        println!("unit {}: EMS limit removed", args.unit_id);
    } else {
        println!("unit {}: EMS limit {applied} mA", args.unit_id);
    }

    client.close().await;
    Ok(())
}
