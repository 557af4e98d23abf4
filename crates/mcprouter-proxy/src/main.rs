//! mcprouter binary entry point

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = mcprouter_proxy::cli::Cli::parse();

    if let Err(e) = cli.execute().await {
        let exit_code = mcprouter_proxy::cli::error::display_error(&e);
        std::process::exit(exit_code);
    }
}
