use clap::Parser;
use enomod_client::entities::{entities_for, DeviceFeatures, EntityValue, Snapshot};
use enomod_client::registers::{RegisterMapKind, RegisterMapValue};
use enomod_client::{probe_client, EnoOneClient};
use enomod_tools::common::{build_charger, init_tracing, stop_polling, ChargerArgs};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "enoone-watch",
    about = "Poll a charger at each map's refresh interval and print entity changes"
)]
struct Args {
    #[command(flatten)]
    charger: ChargerArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let charger = Arc::new(build_charger(&args.charger));
    let ems_control = args.charger.ems_control;

    let mut tasks = Vec::new();
    for unit_id in args.charger.charger_config().unit_ids() {
        let charger = Arc::clone(&charger);
        let unit_id = *unit_id;
        tasks.push(tokio::spawn(async move {
            if let Some(client) = charger.port(unit_id) {
                watch_port(client, ems_control).await;
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    stop_polling(tasks, &charger).await;
    Ok(())
}

async fn watch_port(client: &EnoOneClient, ems_control: bool) {
    let unit_id = client.unit_id();
    let serial = match probe_client(client, ems_control).await {
        Ok(report) => report.unique_id().to_owned(),
        Err(err) => {
            warn!(unit_id, error = %err, "charger not usable");
            return;
        }
    };

    let now = Instant::now();
    let mut due: HashMap<RegisterMapKind, Instant> = RegisterMapKind::polled(ems_control)
        .map(|kind| (kind, now))
        .collect();
    let mut snapshot = Snapshot::new();
    let mut shown: HashMap<&'static str, Option<EntityValue>> = HashMap::new();

    loop {
        let Some((&kind, &at)) = due.iter().min_by_key(|(_, at)| **at) else {
            return;
        };
        sleep_until(at).await;
        due.insert(kind, Instant::now() + kind.refresh_interval());

        match client.fetch_kind(kind).await {
            Ok(value) => snapshot.update(value),
            Err(err) => {
                warn!(unit_id, map = %kind, error = %err, "refresh failed");
                continue;
            }
        }

        let features = match snapshot.get(RegisterMapKind::State) {
            Some(RegisterMapValue::State(state)) => DeviceFeatures::from_state(state, ems_control),
            _ => continue,
        };
        for description in entities_for(features) {
            let value = description.value(&snapshot);
            if shown.get(description.key) != Some(&value) {
                let text = value
                    .as_ref()
                    .map_or_else(|| "unavailable".to_owned(), ToString::to_string);
                info!(
                    entity = %description.unique_id(&serial, unit_id),
                    value = %text,
                    "entity changed"
                );
                shown.insert(description.key, value);
            }
        }
    }
}
