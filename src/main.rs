#[tokio::main]
async fn main() {
    if let Err(e) = storyvoice::app::run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
