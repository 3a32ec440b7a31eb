mod host;
mod publisher;
mod sim;
mod store;
mod tasks;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
