use avscan::cli::{self, Cli};
use std::process;

#[tokio::main]
async fn main() {
    let command = Cli::build();

    let code = match cli::run(command).await {
        Ok(status) => {
            log::info!("run finished: {} (exit {})", status.label(), status.exit_code());
            status.exit_code()
        }
        Err(e) => {
            log::error!("run failed: {} (exit {})", e, e.exit_code());
            eprintln!("avscan: {}", e);
            e.exit_code()
        }
    };

    log::logger().flush();
    process::exit(code);
}
