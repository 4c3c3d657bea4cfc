//! pcc-client: sends one file to a pcc server and prints how many of its
//! bytes are printable characters.

use clap::Parser;
use pcc::client;
use pcc::config::ClientArgs;
use pcc::logging;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match ClientArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    logging::init(&args.log_level);

    match client::count_file(args.server_addr(), &args.file, args.buffer_size).await {
        Ok(count) => {
            println!("# of printable characters: {count}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("pcc-client: {e}");
            ExitCode::FAILURE
        }
    }
}
