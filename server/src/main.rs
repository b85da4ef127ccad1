mod application;
mod error;
mod model;
mod security;
mod server;
mod store;

use std::io::{Error, ErrorKind};

use actix_web::{middleware, App, HttpServer};
use actix_web::http::ContentEncoding;
use actix_slog::StructuredLogger;

use slog::info;

// rest api structure:
//   /                   service banner
//   /api/health         health checking
//   /api/auth           registration and token check (token only, no user record needed)
//   /api/users          profile and usage statistics
//   /api/transactions   buy / sell records
//   /api/upload         transaction photos
//   /api/stats          monthly rollups

fn startup_error<E: std::fmt::Display>(err: E) -> Error {
    Error::new(ErrorKind::Other, err.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let log = server::setup_logging();
    info!(log, "Starting kobutsu-log server");

    // configure server
    let config = server::load_config()
        .map_err(|err| startup_error(format!("Can not load config: {}", err)))?;

    let state = server::setup_state(&config, &log).map_err(startup_error)?;
    let gate = server::setup_gate(&config.auth, state.users.clone(), &log).map_err(startup_error)?;
    let tls = server::setup_tls(&config.http).map_err(startup_error)?;

    let listen = &config.http.listen;
    let listen = format!("{}:{}", &listen.domain, &listen.port);

    let request_log = log.clone();
    let server = HttpServer::new(move || {
        App::new()
            .data(state.clone())
            .wrap(StructuredLogger::new(request_log.clone()))
            .wrap(middleware::Compress::new(ContentEncoding::Br))
            .configure(application::configure(gate.clone()))
    })
        .keep_alive(75);

    let server = match tls {
        Some(builder) => {
            info!(log, "Server Started on https://{}", &listen);
            server.bind_openssl(&listen, builder)?
        }
        None => {
            info!(log, "Server Started on http://{}", &listen);
            server.bind(&listen)?
        }
    };
    server.run().await
}
