use std::sync::Arc;

use anyhow::Result;
use clap::Parser as _;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use emberchain::{
    ChatAgent, Config,
    agent::shop_agent,
    model::{build_model, check_backend},
    rag::{RagQa, SearchOptions, prepare_index},
};
use emberchain_web::{AppState, config::WebConfig, router};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let web = WebConfig::load()?;
    // Core settings from the shared config file and environment, without CLI arguments
    let config = Config::figment(Config::parse_from(["emberchain"]))?;

    if web.dump_config.unwrap_or_default() {
        let web = WebConfig {
            dump_config: None,
            ..web
        };
        println!("{}", toml::to_string(&web)?);
        println!("{}", toml::to_string(&config)?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let model = build_model(&config)?;
    if let Err(err) = check_backend(config.base_url()?).await {
        warn!("{}", err.display_marker());
    }

    let qa = match prepare_index(&config).await {
        Ok((index, status)) => {
            info!("Vector index {} ready: {status:?}", index.collection());
            Some(Arc::new(RagQa::new(
                index,
                model.clone(),
                SearchOptions::from_config(&config),
            )?))
        }
        Err(err) => {
            warn!("Question answering disabled: {err:#}");
            None
        }
    };

    let agent = match shop_agent(&config) {
        Ok(agent) => Some(Arc::new(agent) as Arc<dyn ChatAgent>),
        Err(err) => {
            warn!("Agent disabled: {err:#}");
            None
        }
    };

    let state = AppState::builder().model(model).qa(qa).agent(agent).build();

    let listener = tokio::net::TcpListener::bind(web.bind_addr()).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;

    Ok(())
}
