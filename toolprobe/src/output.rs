use std::fmt::Write as _;
use std::process::ExitCode;

use serde::Serialize;
use toolprobe_core::{Catalog, RunError, RunReport, ToolResponse};

#[derive(Serialize)]
struct CliError<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<String>,
    message: &'a str,
}

/// Prints an error and returns exit code 2.
pub(crate) fn error_exit(phase: Option<String>, message: &str, json: bool) -> ExitCode {
    if json {
        let payload = CliError {
            status: "error",
            phase,
            message,
        };
        let output = serde_json::to_string_pretty(&payload).unwrap_or(message.to_string());
        println!("{output}");
    } else {
        match phase {
            Some(phase) => eprintln!("error ({phase}): {message}"),
            None => eprintln!("error: {message}"),
        }
    }
    ExitCode::from(2)
}

pub(crate) fn run_error_exit(error: &RunError, json: bool) -> ExitCode {
    error_exit(Some(error.phase().to_string()), &error.to_string(), json)
}

pub(crate) fn exit_code_for_report(report: &RunReport) -> ExitCode {
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(payload) => {
            println!("{payload}");
            ExitCode::SUCCESS
        }
        Err(error) => error_exit(None, &format!("failed to serialize output: {error}"), true),
    }
}

pub(crate) fn format_report_human(report: &RunReport) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Server: {}", report.server_name);
    if let Some(message) = &report.message {
        let _ = writeln!(output, "{message}");
    }
    for result in &report.results {
        let mark = if result.passed { "PASS" } else { "FAIL" };
        let _ = writeln!(
            output,
            "[{mark}] {}: {} ({}ms, {})",
            result.test_case.tool_name,
            result.test_case.description,
            result.execution_time,
            result.status
        );
        for error in &result.validation_errors {
            let _ = writeln!(output, "  - {error}");
        }
    }
    if !report.synthesis_failures.is_empty() {
        output.push_str("Synthesis failures:\n");
        for failure in &report.synthesis_failures {
            let _ = writeln!(output, "- {}: {}", failure.tool, failure.error);
        }
    }
    let _ = writeln!(
        output,
        "Summary: {} passed, {} failed, {} total",
        report.pass_count, report.fail_count, report.test_count
    );
    output
}

pub(crate) fn format_catalog_human(catalog: &Catalog) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Tools: {}", catalog.tool_count);
    for tool in &catalog.tools {
        match &tool.description {
            Some(description) => {
                let _ = writeln!(output, "- {}: {description}", tool.name);
            }
            None => {
                let _ = writeln!(output, "- {}", tool.name);
            }
        }
    }
    output
}

pub(crate) fn format_response_human(response: &ToolResponse) -> String {
    match response {
        ToolResponse::Error { error } => format!("Error: {error}\n"),
        ToolResponse::Success { data } => {
            let payload = serde_json::to_string_pretty(data)
                .unwrap_or("<failed to serialize tool result>".to_string());
            let label = if data.is_error.unwrap_or(false) {
                "Tool error"
            } else {
                "Result"
            };
            format!("{label}:\n{payload}\n")
        }
    }
}
