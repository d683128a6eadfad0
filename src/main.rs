use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    autosign::cli::run().await
}
