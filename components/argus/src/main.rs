use anyhow::Result;
use argus::{cli, instrumentation};

#[tokio::main]
async fn main() -> Result<()> {
    instrumentation::tracing::init_tracing();
    instrumentation::tracing::init_panic_handler();

    // Main entrypoint simply delegates control to CLI layer.
    // The CLI parses user commands and then calls into the appropriate logic
    cli::cli::run().await
}
