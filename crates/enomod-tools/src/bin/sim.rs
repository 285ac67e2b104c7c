use clap::Parser;
use enomod_datalink::{ModbusTcpServer, SimulatedCharger};
use enomod_tools::common::init_tracing;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "enoone-sim", about = "Serve a simulated ENO one charger over Modbus TCP")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:1502")]
    bind: String,
    #[arg(long)]
    dual_port: bool,
    #[arg(long)]
    ems_control: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let charger = Arc::new(SimulatedCharger::new(args.dual_port, args.ems_control));
    let server = ModbusTcpServer::bind(&args.bind, Arc::clone(&charger)).await?;
    info!(
        addr = %server.local_addr()?,
        units = ?charger.unit_ids(),
        ems_control = args.ems_control,
        "simulator listening"
    );

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!(requests = charger.request_count(), "simulator stopped");
        }
    }
    Ok(())
}
