#[tokio::main]
async fn main() {
    if let Err(e) = chain_forensics::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
