//! Service entry point

use arcp::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    let state = AppState::build(config.clone()).await?;
    state.spawn_background();

    let app = arcp::http::router(state.clone());
    Server::new(config).serve(app, state).await?;
    Ok(())
}
