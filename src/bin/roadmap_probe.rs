//! One-shot reachability check of both upstreams. Prints the probe reports as JSON
//! and exits non-zero when either provider is down.

use anyhow::Context;
use roadmap_aggregator::{build_services, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = AppConfig::load()?;
    let services = build_services(&cfg)?;

    let (hive, cubecraft) = tokio::join!(services.hive.probe(), services.cubecraft.probe());
    let ok = hive.ok && cubecraft.ok;
    let out = serde_json::json!({ "ok": ok, "hive": hive, "cubecraft": cubecraft });
    println!(
        "{}",
        serde_json::to_string_pretty(&out).context("encoding probe report")?
    );

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
