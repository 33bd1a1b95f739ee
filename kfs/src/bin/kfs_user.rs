use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use kfs::cli::UserCli;
use kfs::fileserver::{parse_route, Error, FileServer};
use kfs::util::normalize_listen;

#[tokio::main]
async fn main() -> ExitCode {
    kfs::logger();

    let cli = UserCli::parse();

    let mut routes = Vec::new();
    for arg in &cli.routes {
        match parse_route(arg) {
            Ok(route) => routes.push(route),
            Err(err) => {
                error!("{}", err);
                return ExitCode::from(2);
            }
        }
    }

    let server = match FileServer::new(&routes) {
        Ok(server) => server,
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(2);
        }
    };

    match server.serve(&normalize_listen(&cli.listen)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Io(err)) => {
            error!("listening on TCP: {}", err);
            ExitCode::from(2)
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::from(1)
        }
    }
}
