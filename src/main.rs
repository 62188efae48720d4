use rcsfast_rs::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::main().await {
        eprintln!("rfi: {}", e);
        std::process::exit(1);
    }
}
