use std::process;
use std::sync::Arc;

use graphrelay::{
    health, logging, ClientCertificateCredential, Config, GraphDispatcher, RelayBackend,
    SmtpServer,
};
use secrecy::ExposeSecret;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    logging::init(config.as_ref().map_or("info", |c| c.log_level.as_str()));
    info!(version = env!("CARGO_PKG_VERSION"), "Starting GraphRelay");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            process::exit(1);
        }
    };

    info!(
        tenant_id = %config.tenant_hint(),
        email_from = %config.email_from,
        smtp_port = config.smtp_port,
        "Configuration loaded"
    );

    let credential = match ClientCertificateCredential::from_file(
        &config.tenant_id,
        config.client_id.clone(),
        &config.cert_path,
        config.cert_password.as_ref().map(|p| p.expose_secret()),
    ) {
        Ok(credential) => credential,
        Err(e) => {
            error!(error = %e, path = %config.cert_path.display(), "Failed to initialize Graph client");
            process::exit(1);
        }
    };

    let http_client = reqwest::Client::new();
    let dispatcher = GraphDispatcher::new(
        config.email_from.clone(),
        Arc::new(credential.with_http_client(http_client.clone())),
    )
    .with_http_client(http_client);

    tokio::spawn(health::start(config.health_port));

    if config.auth.is_required() {
        info!("SMTP authentication enabled");
    } else {
        info!("SMTP authentication disabled");
    }

    let backend = Arc::new(RelayBackend::new(config.auth.clone(), Arc::new(dispatcher)));
    let server = SmtpServer::new(config.smtp_domain.clone(), backend);

    let addr = config.smtp_addr();
    if let Err(e) = server.start(&addr).await {
        error!(error = %e, address = %addr, "SMTP server failed");
        process::exit(1);
    }
}
