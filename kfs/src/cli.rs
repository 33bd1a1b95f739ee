use std::path::PathBuf;

use clap::Parser;

/// kfs is a Kerberos-authenticating HTTP gateway serving users their
/// own files.
#[derive(Parser, Debug)]
#[command(name = "kfs", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

/// kfs-user serves exported directories over HTTP on loopback, under
/// the rights of the user it runs as.
#[derive(Parser, Debug)]
#[command(name = "kfs-user", version)]
pub struct UserCli {
    /// Listening address. A trailing bare colon means a kernel-chosen
    /// port.
    #[arg(short, long, default_value = "127.0.0.1:")]
    pub listen: String,

    /// Exported mounts, one `pattern:/path/to/exported/fs` each.
    #[arg(value_name = "PATTERN:PATH", required = true)]
    pub routes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_cli() {
        let cli = Cli::try_parse_from(["kfs", "/etc/kfs/kfs.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/kfs/kfs.toml"));

        assert!(Cli::try_parse_from(["kfs"]).is_err());
    }

    #[test]
    fn test_user_cli() {
        let cli = UserCli::try_parse_from(["kfs-user", "/:/home/alice"]).unwrap();
        assert_eq!(cli.listen, "127.0.0.1:");
        assert_eq!(cli.routes, vec!["/:/home/alice"]);

        let cli = UserCli::try_parse_from([
            "kfs-user",
            "--listen",
            "127.0.0.1:9000",
            "/:/home/alice",
            "/scratch/:/scratch/alice",
        ])
        .unwrap();
        assert_eq!(cli.listen, "127.0.0.1:9000");
        assert_eq!(cli.routes.len(), 2);

        assert!(UserCli::try_parse_from(["kfs-user"]).is_err());
    }
}
