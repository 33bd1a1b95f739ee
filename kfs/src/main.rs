use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use kfs::auth::gssapi::SpnegoServer;
use kfs::auth::Authenticator;
use kfs::backend::Supervisor;
use kfs::cli::Cli;
use kfs::config::Config;
use kfs::frontend::{Gateway, Listener};
use kfs::net::tls;

#[tokio::main]
async fn main() -> ExitCode {
    kfs::logger();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("{}: {}", cli.config.display(), err);
            return ExitCode::from(1);
        }
    };

    let (cert, key) = match config.tls() {
        Ok(pair) => pair,
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(1);
        }
    };

    let acceptor = match tls::load_acceptor(cert, key) {
        Ok(acceptor) => acceptor,
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(1);
        }
    };

    let service_name = match config.service_name() {
        Ok(name) => name,
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(1);
        }
    };

    let server = match SpnegoServer::new(&config.keytab, &service_name) {
        Ok(server) => server,
        Err(err) => {
            error!("acquiring credentials for {}: {}", service_name, err);
            return ExitCode::from(1);
        }
    };

    let gateway = Gateway {
        auth: Authenticator::new(server, config.realms.clone()),
        supervisor: Supervisor::new(
            config.user_file_server.clone(),
            config.max_lifetime(),
            config.routes.clone(),
        ),
    };

    let listener = Listener::new(config.listen_addr(), acceptor, gateway);

    match listener.listen().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::from(1)
        }
    }
}
