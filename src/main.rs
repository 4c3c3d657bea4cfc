//! pcc-server: accumulates printable character counts from clients and
//! prints the histogram after every connection and at shutdown.

use pcc::config::{Config, ConfigError};
use pcc::server::{Server, ServerError};
use pcc::{logging, shutdown};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Args(e)) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
        Err(e) => {
            eprintln!("pcc-server: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    logging::init(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        buffer_size = config.buffer_size.get(),
        "Starting pcc server"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), ServerError> {
    let server = Server::bind(&config)?;
    let _interrupts = shutdown::listen_for_interrupt(server.shutdown_handle());

    let histogram = server.run().await?;
    info!(connections = histogram.connections(), "Server stopped cleanly");
    Ok(())
}
