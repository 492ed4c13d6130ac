//! Notification Worker - Entry Point
//!
//! Background worker that consumes notification requests from RabbitMQ.

#[tokio::main]
async fn main() {
    core_config::tracing::install_color_eyre();

    if let Err(e) = zerg_notification_worker::run().await {
        eprintln!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}
