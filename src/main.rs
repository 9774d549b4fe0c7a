#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cascade_server::run().await
}
