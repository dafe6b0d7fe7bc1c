#[tokio::main]
async fn main() {
    if let Err(e) = health_etl::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
