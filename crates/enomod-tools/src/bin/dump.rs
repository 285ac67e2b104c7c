use clap::Parser;
use enomod_client::entities::{entities_for, DeviceFeatures, Snapshot};
use enomod_client::registers::{RegisterMapKind, RegisterMapValue};
use enomod_client::probe_client;
use enomod_tools::common::{build_charger, init_tracing, ChargerArgs};

#[derive(Debug, Parser)]
#[command(name = "enoone-dump", about = "Identify a charger and print every register map")]
struct Args {
    #[command(flatten)]
    charger: ChargerArgs,
    /// Print entity values instead of raw maps.
    #[arg(long)]
    entities: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let charger = build_charger(&args.charger);
    let ems_control = args.charger.ems_control;

    for client in charger.ports() {
        let unit_id = client.unit_id();
        let report = probe_client(client, ems_control).await?;
        println!(
            "unit {unit_id}: {} {} serial={} firmware={} api={}.{}",
            report.diagnostics.manufacturer,
            report.diagnostics.model_id,
            report.unique_id(),
            report.diagnostics.firmware_version,
            report.api_version.major,
            report.api_version.minor,
        );

        let mut snapshot = Snapshot::new();
        for kind in charger.polled_maps() {
            match client.fetch_kind(kind).await {
                Ok(value) => {
                    if !args.entities {
                        println!("  {kind}: {value:?}");
                    }
                    snapshot.update(value);
                }
                Err(err) => println!("  {kind}: error: {err}"),
            }
        }

        if args.entities {
            let features = match snapshot.get(RegisterMapKind::State) {
                Some(RegisterMapValue::State(state)) => DeviceFeatures::from_state(state, ems_control),
                _ => DeviceFeatures {
                    ems_control,
                    ..DeviceFeatures::default()
                },
            };
            for description in entities_for(features) {
                let value = description
                    .value(&snapshot)
                    .map_or_else(|| "unavailable".to_owned(), |value| value.to_string());
                let unit = description.unit.map(|unit| format!(" {unit}")).unwrap_or_default();
                println!(
                    "  {} = {value}{unit}",
                    description.unique_id(report.unique_id(), unit_id)
                );
            }
        }
    }

    charger.close().await;
    Ok(())
}
