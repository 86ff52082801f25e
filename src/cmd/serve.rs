//! Board server command — `taskboard serve`.

use anyhow::Result;

use taskboard::board::server;
use taskboard::config::BoardConfig;

pub async fn cmd_serve(config: &BoardConfig) -> Result<()> {
    server::start_server(config.server_config()).await
}
