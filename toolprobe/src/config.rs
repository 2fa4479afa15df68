use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use toolprobe_core::{EngineConfig, JsonObject, RunOptions, ServerDescriptor, SessionConfig};

use crate::cli::Cli;

pub fn parse_env_vars(entries: Vec<String>) -> Result<BTreeMap<String, String>, String> {
    let mut env = BTreeMap::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("invalid env entry: '{entry}'"))?;
        if key.is_empty() {
            return Err(format!("invalid env entry: '{entry}'"));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

/// Reads tool arguments given inline or as `@path`. Absent input means `{}`.
pub fn parse_tool_input(raw: Option<&str>) -> Result<JsonObject, String> {
    let Some(raw) = raw else {
        return Ok(JsonObject::new());
    };
    let payload = if let Some(path) = raw.strip_prefix('@') {
        fs::read_to_string(path).map_err(|error| format!("failed to read input: {error}"))?
    } else {
        raw.to_string()
    };
    match serde_json::from_str(&payload) {
        Ok(serde_json::Value::Object(arguments)) => Ok(arguments),
        Ok(_) => Err("invalid input: expected a JSON object".to_string()),
        Err(error) => Err(format!("invalid input: {error}")),
    }
}

pub(crate) fn build_descriptor(
    cli: &Cli,
    command: &str,
    args: &[String],
    env: &[String],
    cwd: Option<&str>,
) -> Result<ServerDescriptor, String> {
    let mut descriptor = ServerDescriptor::new(command);
    if let Some(name) = &cli.name {
        descriptor.name = name.clone();
    }
    descriptor.args = args.to_vec();
    descriptor.env = parse_env_vars(env.to_vec())?;
    descriptor.cwd = cwd.map(str::to_string);
    Ok(descriptor)
}

pub(crate) fn build_engine_config(cli: &Cli) -> EngineConfig {
    EngineConfig::new()
        .with_run_options(RunOptions {
            num_tests_per_tool: cli.tests_per_tool,
            timeout_ms: cli.timeout_ms,
        })
        .with_session(SessionConfig {
            handshake_timeout: Duration::from_millis(cli.handshake_timeout_ms),
            settle_delay: Duration::from_millis(cli.settle_ms),
            ..SessionConfig::default()
        })
}
