//! Binary entry point for local-llm.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use clap::Parser;
use local_llm::cli::output::{OutputFormat, format_error};
use local_llm::cli::{Cli, execute};
use local_llm::logging::init_logging;
use std::io;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = OutputFormat::parse(&cli.format);
    init_logging(cli.verbose);

    let mut stdout = io::stdout();
    match execute(&cli, &mut stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error_output = format_error(&e, format);
            match format {
                OutputFormat::Json => {
                    // JSON errors go to stdout for programmatic parsing
                    println!("{error_output}");
                }
                OutputFormat::Text => {
                    eprintln!("Error: {error_output}");
                }
            }
            ExitCode::FAILURE
        }
    }
}
