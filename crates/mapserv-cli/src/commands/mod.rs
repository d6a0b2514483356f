//! Subcommand implementations and the helpers they share

pub mod check;
pub mod run;
pub mod versions;

use anyhow::Context;
use mapserv_lite::LiteEngine;
use mapserv_runtime::{Dispatcher, ErrorKind, MapHandle, MapserverError, RuntimeConfig, TaskResult};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

type Completion<T> = Box<dyn FnOnce(TaskResult<T>)>;

/// Read the config file if one was given, then apply environment overrides
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    Ok(config.apply_env()?)
}

/// Start a dispatcher over the lite engine
pub fn start(config: &RuntimeConfig) -> anyhow::Result<Dispatcher<LiteEngine>> {
    Ok(Dispatcher::start(LiteEngine::new(), config)?)
}

/// Submit one task and drive the dispatcher until its completion has run
pub fn wait_for<T: 'static>(dispatcher: &Dispatcher<LiteEngine>, submit: impl FnOnce(Completion<T>)) -> TaskResult<T> {
    let slot = Rc::new(RefCell::new(None));
    let out = Rc::clone(&slot);
    submit(Box::new(move |result| *out.borrow_mut() = Some(result)));
    dispatcher.run_until_idle();

    let result = slot.borrow_mut().take();
    result.unwrap_or_else(|| Err(MapserverError::new(ErrorKind::WorkerPanic, "Task finished without a result")))
}

/// Load a mapfile and wait for the result
pub fn load_map(dispatcher: &Dispatcher<LiteEngine>, path: &Path) -> TaskResult<MapHandle<LiteEngine>> {
    wait_for(dispatcher, |done| {
        MapHandle::from_file(dispatcher, path, done);
    })
}

/// One-line description of an engine error for terminal output
pub fn describe(err: &MapserverError) -> String {
    if err.routine.is_empty() {
        format!("{} ({})", err.message, err.category)
    } else {
        format!("{}: {} ({})", err.routine, err.message, err.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatcher]\nqueue_capacity = 8").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.dispatcher.queue_capacity, 8);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/mapserv.toml"))).unwrap_err();
        assert!(err.to_string().contains("cannot load config"));
    }

    #[test]
    fn test_describe_includes_routine() {
        let err = MapserverError::new(ErrorKind::Dispatch, "Invalid mode.").with_routine("LiteEngine::dispatch");
        assert_eq!(describe(&err), "LiteEngine::dispatch: Invalid mode. (General error message.)");
        let bare = MapserverError::new(ErrorKind::Load, "Could not load mapfile");
        assert_eq!(describe(&bare), "Could not load mapfile (General error message.)");
    }
}
