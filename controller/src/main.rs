mod device;
mod error;
mod framer;
mod host;
mod scheduler;
mod status;
mod store;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
