use adcast_server::core::{CoreApp, StartupError};

#[tokio::main]
async fn main() {
    match CoreApp::run().await {
        Ok(()) => {}
        Err(StartupError::Config(e)) => {
            eprintln!("\nConfiguration error: {}\n", e);
            std::process::exit(2);
        }
        Err(StartupError::Bootstrap(e)) => {
            eprintln!("\nError: {:#}\n", e);
            std::process::exit(1);
        }
    }
}
