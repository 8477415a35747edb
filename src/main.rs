use clap::Parser;
use tracing_subscriber::EnvFilter;

use glm_relay::app::App;
use glm_relay::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("glm_relay=info")),
        )
        .init();

    let config = Config::parse();
    let app = App::bind(&config).await?;
    println!("glm-relay listening on http://{}", app.local_addr());
    app.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(())
}
