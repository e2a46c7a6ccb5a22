//! Screenshot Worker Service - Entry Point
//!
//! Background worker that processes screenshot jobs from the Redis stream.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    zerg_screenshot_worker::run().await
}
