use super::*;

#[test]
fn test_defaults() {
    let config: Config = toml::from_str(
        r#"
        tls_cert_file = "/etc/kfs/cert.pem"
        tls_key_file = "/etc/kfs/key.pem"
        "#,
    )
    .unwrap();

    assert_eq!(config.listen, ":8080");
    assert_eq!(config.keytab, PathBuf::from("/etc/krb5.keytab"));
    assert_eq!(config.user_file_server, PathBuf::from("kfs-user"));
    assert!(config.realms.is_empty());
    assert_eq!(config.max_lifetime, 0);
    assert_eq!(config.max_lifetime(), Duration::ZERO);
    assert_eq!(config.routes.get("/").map(String::as_str), Some("{{HOME}}"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_full_config() {
    let config: Config = toml::from_str(
        r#"
        listen = "10.1.2.3:8443"
        keytab = "/etc/kfs/http.keytab"
        user_file_server = "/usr/libexec/kfs-user"
        service_name = "HTTP/www.example.org"
        realms = ["EXAMPLE.ORG", "USERS.EXAMPLE.ORG"]
        tls_cert_file = "/etc/kfs/cert.pem"
        tls_key_file = "/etc/kfs/key.pem"
        max_lifetime = 1800

        [routes]
        "/" = "{{HOME}}/public_html"
        "/scratch/" = "/scratch/{{USER}}"
        "#,
    )
    .unwrap();

    assert_eq!(config.listen_addr(), "10.1.2.3:8443");
    assert_eq!(config.service_name().unwrap(), "HTTP/www.example.org");
    assert_eq!(config.realms, vec!["EXAMPLE.ORG", "USERS.EXAMPLE.ORG"]);
    assert_eq!(config.max_lifetime(), Duration::from_secs(1800));
    assert_eq!(config.routes.len(), 2);

    let (cert, key) = config.tls().unwrap();
    assert_eq!(cert, Path::new("/etc/kfs/cert.pem"));
    assert_eq!(key, Path::new("/etc/kfs/key.pem"));
}

#[test]
fn test_tls_required() {
    let config: Config = toml::from_str(r#"tls_key_file = "/etc/kfs/key.pem""#).unwrap();
    assert!(matches!(config.validate(), Err(Error::MissingTlsCert)));

    let config: Config = toml::from_str(r#"tls_cert_file = "/etc/kfs/cert.pem""#).unwrap();
    assert!(matches!(config.validate(), Err(Error::MissingTlsKey)));
}

#[test]
fn test_unknown_keys_rejected() {
    let result: Result<Config, _> = toml::from_str(r#"gssapi_lib = "/usr/lib/libgssapi.so""#);
    assert!(result.is_err());
}

#[test]
fn test_empty_route_rejected() {
    let config: Config = toml::from_str(
        r#"
        tls_cert_file = "/etc/kfs/cert.pem"
        tls_key_file = "/etc/kfs/key.pem"

        [routes]
        "/data/" = ""
        "#,
    )
    .unwrap();

    assert!(matches!(config.validate(), Err(Error::EmptyRoute(_, _))));
}

#[test]
fn test_listen_all_interfaces() {
    let config = Config::default();
    assert_eq!(config.listen_addr(), "0.0.0.0:8080");
}

#[test]
fn test_default_service_name() {
    let config = Config::default();
    let name = config.service_name().unwrap();
    assert!(name.starts_with("HTTP/"));
    assert!(name.len() > "HTTP/".len());
}
