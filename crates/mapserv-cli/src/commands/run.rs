//! `mapserv run`: load a mapfile and answer one request

use anyhow::{bail, Context};
use mapserv_runtime::{EnvironmentView, Response, RuntimeConfig};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::debug;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

pub struct RunArgs {
    pub mapfile: PathBuf,
    pub query: Option<String>,
    pub method: Option<String>,
    pub env: Vec<String>,
    pub body: Option<PathBuf>,
    pub json_errors: bool,
}

pub fn execute(args: RunArgs, config: &RuntimeConfig) -> anyhow::Result<()> {
    let env = environment(&args)?;
    let dispatcher = super::start(config)?;

    let result = super::load_map(&dispatcher, &args.mapfile).and_then(|handle| {
        super::wait_for(&dispatcher, |done| {
            handle.execute(&dispatcher, env, done);
        })
    });

    match result {
        Ok(response) => {
            let mut stdout = io::stdout().lock();
            write_response(&mut stdout, response)?;
            stdout.flush()?;
            Ok(())
        }
        Err(err) if args.json_errors => {
            println!("{}", serde_json::to_string_pretty(&err.to_json())?);
            drop(dispatcher);
            std::process::exit(1);
        }
        Err(err) => bail!("{}", super::describe(&err)),
    }
}

/// Build the CGI variables for the request described by `args`
fn environment(args: &RunArgs) -> anyhow::Result<EnvironmentView> {
    let body = match &args.body {
        Some(path) => Some(std::fs::read(path).with_context(|| format!("cannot read body {}", path.display()))?),
        None => None,
    };

    let method = match (&args.method, &body) {
        (Some(method), _) => method.to_ascii_uppercase(),
        (None, Some(_)) => "POST".to_string(),
        (None, None) => "GET".to_string(),
    };

    let mut env = EnvironmentView::new()
        .with_var("REQUEST_METHOD", method)
        .with_var("QUERY_STRING", args.query.clone().unwrap_or_default());

    if let Some(body) = body {
        env = env
            .with_var("CONTENT_TYPE", FORM_CONTENT_TYPE)
            .with_var("CONTENT_LENGTH", body.len().to_string())
            .with_body(body);
    }

    for pair in &args.env {
        let (key, value) = parse_env_pair(pair)?;
        env = env.with_var(key, value);
    }

    debug!(vars = env.vars().len(), body = env.body_len(), "request environment ready");
    Ok(env)
}

fn parse_env_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("invalid --env value '{}', expected KEY=VALUE", pair),
    }
}

/// Write the response the way a CGI program would: headers, blank line, body
fn write_response<W: Write>(out: &mut W, response: Response) -> io::Result<()> {
    let (headers, data) = response.into_parts();

    if let Some(values) = headers.get("Content-Type") {
        for value in values {
            write!(out, "Content-Type: {}\r\n", value)?;
        }
    }
    for (name, values) in headers.iter().filter(|(name, _)| name.as_str() != "Content-Type") {
        for value in values {
            write!(out, "{}: {}\r\n", name, value)?;
        }
    }
    out.write_all(b"\r\n")?;

    if let Some(bytes) = data.and_then(|mut data| data.take()) {
        out.write_all(&bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            mapfile: PathBuf::from("unused.map"),
            query: None,
            method: None,
            env: Vec::new(),
            body: None,
            json_errors: false,
        }
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(parse_env_pair("HTTP_COOKIE=a=b").unwrap(), ("HTTP_COOKIE", "a=b"));
        assert_eq!(parse_env_pair("EMPTY=").unwrap(), ("EMPTY", ""));
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }

    #[test]
    fn test_get_is_the_default() {
        let mut a = args();
        a.query = Some("mode=map".to_string());
        let env = environment(&a).unwrap();
        assert_eq!(env.var("REQUEST_METHOD"), Some("GET"));
        assert_eq!(env.var("QUERY_STRING"), Some("mode=map"));
        assert!(env.body().is_none());
    }

    #[test]
    fn test_body_implies_post() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "mode=mapfile").unwrap();
        let mut a = args();
        a.body = Some(file.path().to_path_buf());
        a.env = vec!["CONTENT_TYPE=text/xml".to_string()];

        let env = environment(&a).unwrap();
        assert_eq!(env.var("REQUEST_METHOD"), Some("POST"));
        assert_eq!(env.var("CONTENT_LENGTH"), Some("12"));
        // --env wins over the defaults
        assert_eq!(env.var("CONTENT_TYPE"), Some("text/xml"));
        assert_eq!(env.body(), Some(&b"mode=mapfile"[..]));
    }

    #[test]
    fn test_missing_body_file() {
        let mut a = args();
        a.body = Some(PathBuf::from("/nonexistent/body"));
        assert!(environment(&a).is_err());
    }
}
