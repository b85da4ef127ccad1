use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use openssl::ssl::{SslAcceptor, SslAcceptorBuilder, SslFiletype, SslMethod};

use slog::{info, o, warn, Drain, Logger};

use super::config::{self, StorageBackend};
use super::{new_datasource, SimpleResult};
use crate::application::ApplicationState;
use crate::model::PlanLimits;
use crate::security::{IdentityGate, KeySet};
use crate::store::{
    FsImageStore,
    MemoryTransactionStore,
    MemoryUserDirectory,
    OracleTransactionStore,
    OracleUserDirectory,
    SharedDirectory,
    SharedImages,
    SharedTransactions,
};

/// setup logging
pub fn setup_logging() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// load ssl keys, if both are configured
// to create a self-signed temporary cert for testing:
// `openssl req -x509 -newkey rsa:4096 -nodes -keyout key.pem -out cert.pem -days 365 -subj '/CN=localhost'`
pub fn setup_tls(settings: &config::HttpListener) -> SimpleResult<Option<SslAcceptorBuilder>> {
    let (key, cert) = match (&settings.tls_key, &settings.tls_cert) {
        (Some(key), Some(cert)) => (Path::new(key), Path::new(cert)),
        (None, None) => return Ok(None),
        _ => return Err("http.tls-key and http.tls-cert must be set together".to_string()),
    };

    let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())
        .map_err(|err| format!("Can not create TLS acceptor: {}", err))?;
    builder
        .set_private_key_file(key, SslFiletype::PEM)
        .map_err(|err| format!("Can not load TLS key {:?}: {}", key, err))?;
    builder
        .set_certificate_chain_file(cert)
        .map_err(|err| format!("Can not load TLS certificate {:?}: {}", cert, err))?;
    Ok(Some(builder))
}

/// Build the stores named by `storage.*` and the shared handler state.
pub fn setup_state(config: &config::ServerConfig, log: &Logger) -> SimpleResult<ApplicationState> {
    let (users, transactions): (SharedDirectory, SharedTransactions) = match config.storage.backend {
        StorageBackend::Memory => {
            warn!(log, "using in-memory storage, records are lost on restart");
            (Arc::new(MemoryUserDirectory::new()), Arc::new(MemoryTransactionStore::new()))
        }
        StorageBackend::Oracle => {
            let connection = config
                .connection
                .as_ref()
                .ok_or("storage.backend = \"oracle\" requires a [connection] section")?;
            let datasource = new_datasource(connection)?;
            info!(log, "oracle datasource ready"; "url" => &connection.url, "pool" => connection.pool);
            (
                Arc::new(OracleUserDirectory::new(datasource.clone())),
                Arc::new(OracleTransactionStore::new(datasource)),
            )
        }
    };

    let images: Option<SharedImages> = match &config.storage.images {
        Some(root) => {
            info!(log, "image store ready"; "root" => root);
            Some(Arc::new(FsImageStore::new(root)))
        }
        None => {
            info!(log, "storage.images is not set, image upload is disabled");
            None
        }
    };

    Ok(ApplicationState {
        users,
        transactions,
        images,
        plans: PlanLimits::new(config.plans.clone()),
        upload_limit: config.storage.upload_limit,
        log: log.new(o!("component" => "api")),
    })
}

pub fn setup_gate(settings: &config::AuthConfig, directory: SharedDirectory, log: &Logger) -> SimpleResult<IdentityGate> {
    let project_id = settings.project_id();
    if project_id.is_none() {
        warn!(log, "auth.project is not set, authenticated requests will fail with a configuration error");
    }

    let keys = match &settings.keys {
        Some(path) => {
            let keys = KeySet::load(Path::new(path))?;
            info!(log, "token signatures are verified"; "keys" => keys.len());
            Some(keys)
        }
        None => {
            info!(log, "token signatures are not verified here, the network edge must validate them");
            None
        }
    };

    Ok(IdentityGate::new(
        project_id,
        keys,
        Duration::from_millis(settings.timeout),
        directory,
        log,
    ))
}
