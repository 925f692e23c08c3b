#[tokio::main]
async fn main() {
    if let Err(e) = servermanager::run().await {
        eprintln!("servermanager: {e}");
        std::process::exit(1);
    }
}
