//! `mapserv check`: load a mapfile and report what it defines

use anyhow::bail;
use mapserv_runtime::RuntimeConfig;
use std::path::Path;

pub fn execute(mapfile: &Path, config: &RuntimeConfig) -> anyhow::Result<()> {
    let dispatcher = super::start(config)?;

    let handle = match super::load_map(&dispatcher, mapfile) {
        Ok(handle) => handle,
        Err(err) => bail!("{}: {}", mapfile.display(), super::describe(&err)),
    };

    let map = handle.map();
    println!("{}: ok", mapfile.display());
    println!("  map:    {} ({}x{})", map.name, map.size.0, map.size.1);
    println!("  layers: {}", map.layers.len());
    for layer in &map.layers {
        println!("    {} {} {}", layer.name, layer.status.as_str(), layer.data);
    }
    Ok(())
}
