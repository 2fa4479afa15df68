use std::process::ExitCode;
use std::sync::Arc;

use toolprobe_core::{CancellationToken, CaseBackend, Engine, SchemaBackend};

pub mod anthropic;
mod cli;
mod config;
mod output;

pub use anthropic::AnthropicBackend;
pub use cli::{Action, Cli, Command, Generator};
pub use config::{parse_env_vars, parse_tool_input};

use output::{
    error_exit, exit_code_for_report, format_catalog_human, format_report_human,
    format_response_human, print_json, run_error_exit,
};

pub async fn run(cli: Cli) -> ExitCode {
    let Command::Stdio {
        command,
        args,
        env,
        cwd,
        action,
    } = &cli.command;
    let descriptor = match config::build_descriptor(&cli, command, args, env, cwd.as_deref()) {
        Ok(descriptor) => descriptor,
        Err(message) => return error_exit(Some("precondition".to_string()), &message, cli.json),
    };
    let engine = Engine::new(config::build_engine_config(&cli));

    match action {
        Action::Tools => match engine.discover(&descriptor).await {
            Ok(catalog) if cli.json => print_json(&catalog),
            Ok(catalog) => {
                print!("{}", format_catalog_human(&catalog));
                ExitCode::SUCCESS
            }
            Err(error) => run_error_exit(&error, cli.json),
        },
        Action::Test {
            generator,
            model,
            seed,
        } => {
            let backend = select_backend(*generator, model.clone(), *seed);
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("interrupted, cancelling run");
                    interrupt.cancel();
                }
            });
            let result = engine.run(&descriptor, backend, cancel).await;
            match result {
                Ok(report) => {
                    if cli.json {
                        let printed = print_json(&report);
                        if printed != ExitCode::SUCCESS {
                            return printed;
                        }
                    } else {
                        print!("{}", format_report_human(&report));
                    }
                    exit_code_for_report(&report)
                }
                Err(error) => run_error_exit(&error, cli.json),
            }
        }
        Action::Call { tool, input } => {
            let arguments = match parse_tool_input(input.as_deref()) {
                Ok(arguments) => arguments,
                Err(message) => {
                    return error_exit(Some("precondition".to_string()), &message, cli.json)
                }
            };
            match engine.execute_tool(&descriptor, tool, arguments).await {
                Ok(response) if cli.json => print_json(&response),
                Ok(response) => {
                    print!("{}", format_response_human(&response));
                    ExitCode::SUCCESS
                }
                Err(error) => run_error_exit(&error, cli.json),
            }
        }
    }
}

/// `None` for the anthropic generator without an API key; the engine
/// rejects that before spawning anything.
fn select_backend(
    generator: Generator,
    model: Option<String>,
    seed: u64,
) -> Option<Arc<dyn CaseBackend>> {
    match generator {
        Generator::Schema => Some(Arc::new(SchemaBackend::with_seed(seed))),
        Generator::Anthropic => match AnthropicBackend::from_env(model) {
            Some(backend) => Some(Arc::new(backend)),
            None => {
                log::error!("{} is not set", anthropic::API_KEY_ENV);
                None
            }
        },
    }
}

#[cfg(test)]
#[path = "../tests/internal/cli_unit_tests.rs"]
mod tests;
