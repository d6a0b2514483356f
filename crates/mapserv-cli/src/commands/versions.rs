//! `mapserv versions`

use mapserv_runtime::RuntimeConfig;

pub fn execute(config: &RuntimeConfig, json: bool) -> anyhow::Result<()> {
    let dispatcher = super::start(config)?;
    let versions = dispatcher.versions();

    if json {
        println!("{}", serde_json::to_string_pretty(versions)?);
        return Ok(());
    }

    println!("mapserv:        {}", versions.mapserv);
    println!("engine:         {}", versions.engine);
    if let Some(numeric) = versions.engine_numeric {
        println!("engine numeric: {}", numeric);
    }
    println!("engine details: {}", versions.engine_details);
    println!("workers:        {}", dispatcher.worker_count());
    Ok(())
}
