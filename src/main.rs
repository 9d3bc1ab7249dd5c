use anyhow::Result;
use log::warn;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use novelist::core::config::Config;
use novelist::core::io::NativeStorage;
use novelist::services::llm::create_llm;
use novelist::services::setup::run_setup;
use novelist::services::workflow::WorkflowManager;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    if run_setup(&mut config)? {
        config.save()?;
    }
    config.ensure_directories()?;

    let llm = create_llm(&config)?;

    // Ctrl-C stops the current model call; finished passes stay on disk.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running pass");
            on_interrupt.cancel();
        }
    });

    let mut manager = WorkflowManager::new(config, Arc::from(llm), Arc::new(NativeStorage::new()), cancel);
    manager.run().await?;

    Ok(())
}
