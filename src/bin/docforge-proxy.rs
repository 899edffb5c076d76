use std::sync::Arc;

use docforge::config::Config;
use docforge::transport::Proxy;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_env());
    docforge::logging::init(config.log_root.clone(), "docforge-proxy")?;

    let proxy = Proxy::new(config.clone());
    proxy.serve(config.proxy_addr).await?;
    Ok(())
}
