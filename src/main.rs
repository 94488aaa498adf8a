#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ordervoice::run().await
}
