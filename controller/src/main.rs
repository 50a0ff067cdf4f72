mod host;
mod routes;
mod state;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
