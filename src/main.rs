//! Weaver CLI - content-addressed toolchain builds
//!
//! Entry point for the weaver command-line application.

use clap::Parser;

use weaver::cli::output::{display_error, OutputConfig};
use weaver::cli::{exit_code_for, Cli};
use weaver::error::exit_code;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { exit_code::GENERAL } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Apply output configuration globally
    let output_config = OutputConfig::new(cli.quiet, cli.json, cli.verbose);
    output_config.apply_global();

    // Initialize tracing subscriber; RUST_LOG directives win over -v
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(output_config.log_level().into())
                .from_env_lossy(),
        )
        .init();

    // Run the command and handle errors
    if let Err(e) = cli.run().await {
        display_error(&e);
        std::process::exit(exit_code_for(&e));
    }
}
