use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "toolprobe",
    version,
    about = "Launches an MCP server and tests every tool it exposes"
)]
pub struct Cli {
    /// Emit JSON output instead of human-readable output.
    #[arg(long, global = true)]
    pub json: bool,
    /// Per-call deadline in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,
    /// Number of test cases to synthesize per tool.
    #[arg(long, default_value_t = 3)]
    pub tests_per_tool: usize,
    /// Deadline for the initialize handshake in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub handshake_timeout_ms: u64,
    /// Pause after the handshake before the first request, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub settle_ms: u64,
    /// Display name for the server; defaults to the command.
    #[arg(long)]
    pub name: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Eq, PartialEq, Subcommand)]
pub enum Command {
    /// Target a server spoken to over stdio.
    Stdio {
        /// Command to execute.
        #[arg(long)]
        command: String,
        /// Command arguments (repeatable).
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variables (KEY=VALUE).
        #[arg(long = "env")]
        env: Vec<String>,
        /// Working directory.
        #[arg(long)]
        cwd: Option<String>,
        #[command(subcommand)]
        action: Action,
    },
}

#[derive(Debug, Eq, PartialEq, Subcommand)]
pub enum Action {
    /// List the server's tools.
    Tools,
    /// Synthesize cases for every tool, run them and report.
    Test {
        /// Where test cases come from.
        #[arg(long, value_enum, default_value_t = Generator::Schema)]
        generator: Generator,
        /// Model used by the anthropic generator.
        #[arg(long)]
        model: Option<String>,
        /// Seed for the schema generator.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Call one tool once and print its response.
    Call {
        /// Tool name.
        #[arg(long)]
        tool: String,
        /// Arguments as inline JSON or @path to a JSON file.
        #[arg(long, value_name = "JSON|@PATH")]
        input: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Generator {
    /// Draw arguments from each tool's input schema.
    Schema,
    /// Ask the Anthropic Messages API for cases.
    Anthropic,
}
