//! bgkey CLI binary
//!
//! Command-line entry point for color-keyed background removal.

#[cfg(feature = "cli")]
use bgkey::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Build with --features cli");
    std::process::exit(1);
}
