use clap::{Parser, Subcommand};

// Display order for log level option (placed at end of help text)
const LOG_LEVEL_DISPLAY_ORDER: usize = 100;

/// CLI arguments
#[derive(Parser)]
#[command(name = "misramend", version, about = "Detects MISRA C/C++ violations and drafts model-generated fixes", long_about = None)]
pub struct Cli {
    /// Log level (see https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html)
    /// [env: MISRAMEND_LOG=] [default: info]
    #[arg(
        long,
        env = "MISRAMEND_LOG",
        default_value = "info",
        global = true,
        hide_default_value = true,
        hide_env = true,
        display_order = LOG_LEVEL_DISPLAY_ORDER,
        verbatim_doc_comment
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a default misramend.toml config file
    Init(InitArgs),
    /// Analyze one file and generate fixes headlessly
    Fix(FixArgs),
    /// Run the web review interface
    Serve(ServeArgs),
}

/// Arguments for the init command
#[derive(Parser)]
pub struct InitArgs {
    /// Path to config file
    #[arg(long, default_value = "misramend.toml")]
    pub config: String,

    /// Override existing config file
    #[arg(long)]
    pub r#override: bool,
}

/// Arguments for the fix command
#[derive(Parser, Debug)]
pub struct FixArgs {
    /// C/C++ source file to remediate
    pub file: String,

    /// Path to config file (initialize with `misramend init`)
    #[arg(long, default_value = "misramend.toml")]
    pub config: String,

    /// Write validated patches to the file (atomic, ascending line order)
    #[arg(long)]
    pub apply: bool,

    /// Output file path (.md or .json)
    #[arg(long)]
    pub output: Option<String>,
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Path to config file (initialize with `misramend init`)
    #[arg(long, default_value = "misramend.toml")]
    pub config: String,

    /// Port to bind, overrides the config value
    #[arg(long)]
    pub port: Option<u16>,
}
