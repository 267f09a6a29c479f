use mintage_domain::config::{Config, ConfigSeverity};

#[test]
fn default_registrar_is_disabled() {
    let config = Config::default();
    assert!(!config.registrar.enabled);
    assert_eq!(config.registrar.real_server, "doi.crossref.org");
    assert_eq!(config.registrar.idle_sleep, 15);
}

#[test]
fn explicit_registrar_block_parses() {
    let toml_str = r#"
base_url = "https://ids.example.edu"

[registrar]
enabled = true
depositor_name = "Example Library"
depositor_email = "ids@example.edu"
username = "exl"
password = "hunter2"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config.registrar.enabled);
    assert_eq!(config.registrar.test_server, "test.crossref.org");
    assert_eq!(config.base_url, "https://ids.example.edu");
}

#[test]
fn shoulder_tables_parse() {
    let toml_str = r#"
[prefixes.fk4]
prefix = "ark:/13030/fk4"
minter = "https://noid.example.org/a/fk4"

[prefixes.uu]
prefix = "urn:uuid:"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.prefixes.len(), 2);
    assert!(config.shoulder_for("ark:/13030/fk4").is_some());
    assert!(config.shoulder_for("ark:/13030/fk5").is_none());
}

#[test]
fn enabled_registrar_without_credentials_is_an_error() {
    let toml_str = r#"
[registrar]
enabled = true
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config
        .validate()
        .iter()
        .any(|e| e.severity == ConfigSeverity::Error && e.field == "registrar.username"));
}
