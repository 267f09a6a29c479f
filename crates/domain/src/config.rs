use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the binder and registration-queue state files.
    #[serde(default = "d_bind_noid")]
    pub bind_noid: PathBuf,
    /// Base URL under which default resolver targets are built.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_erc")]
    pub default_ark_profile: String,
    #[serde(default = "d_datacite_profile")]
    pub default_doi_profile: String,
    #[serde(default = "d_erc")]
    pub default_urn_uuid_profile: String,
    /// Seconds between status-reporter lines. `0` disables the reporter.
    #[serde(default = "d_status_interval")]
    pub status_reporting_interval: u64,
    /// Registered shoulders (key = shoulder label).
    #[serde(default)]
    pub prefixes: HashMap<String, PrefixConfig>,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub registrar: RegistrarConfig,
    #[serde(default)]
    pub datacite: DataciteConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_noid: d_bind_noid(),
            base_url: d_base_url(),
            default_ark_profile: d_erc(),
            default_doi_profile: d_datacite_profile(),
            default_urn_uuid_profile: d_erc(),
            status_reporting_interval: d_status_interval(),
            prefixes: HashMap::new(),
            directory: DirectoryConfig::default(),
            registrar: RegistrarConfig::default(),
            datacite: DataciteConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shoulders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrefixConfig {
    /// Qualified prefix minting happens under, e.g. `ark:/13030/fk4` or
    /// `doi:10.5060/`.
    pub prefix: String,
    /// Minter server URL for this shoulder. Empty = no minter.
    #[serde(default)]
    pub minter: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "d_admin")]
    pub admin_username: String,
    /// Known agents (users and groups) with their agent PIDs.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            admin_username: d_admin(),
            agents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// Agent PID, itself an ARK.
    pub pid: String,
    /// `user` or `group`.
    #[serde(default = "d_user_kind")]
    pub kind: String,
    /// Address for registrar warning/failure notifications. Empty = none.
    #[serde(default)]
    pub registrar_email: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Crossref-style registrar
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub depositor_name: String,
    #[serde(default)]
    pub depositor_email: String,
    #[serde(default = "d_real_server")]
    pub real_server: String,
    #[serde(default = "d_test_server")]
    pub test_server: String,
    /// Deposit URL pattern; `%s` is replaced with the chosen server.
    #[serde(default = "d_deposit_url")]
    pub deposit_url: String,
    /// Results URL pattern; `%s` is replaced with the chosen server.
    #[serde(default = "d_results_url")]
    pub results_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "d_true")]
    pub daemon_enabled: bool,
    /// Seconds the registration daemon sleeps between passes.
    #[serde(default = "d_idle_sleep")]
    pub idle_sleep: u64,
    /// DOIs under these scheme-less prefixes route to the test server.
    #[serde(default = "d_test_prefixes")]
    pub test_prefixes: Vec<String>,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            depositor_name: String::new(),
            depositor_email: String::new(),
            real_server: d_real_server(),
            test_server: d_test_server(),
            deposit_url: d_deposit_url(),
            results_url: d_results_url(),
            username: String::new(),
            password: String::new(),
            daemon_enabled: true,
            idle_sleep: d_idle_sleep(),
            test_prefixes: d_test_prefixes(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DataCite
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataciteConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mail
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_localhost")]
    pub smtp_host: String,
    #[serde(default = "d_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: d_localhost(),
            smtp_port: d_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.base_url
                ),
            });
        }

        if self.prefixes.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "prefixes".into(),
                message: "no shoulders configured; minting will be refused".into(),
            });
        }
        for (key, shoulder) in &self.prefixes {
            let p = &shoulder.prefix;
            let recognized = p.starts_with("ark:/") || p.starts_with("doi:10.") || p == "urn:uuid:";
            if !recognized {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("prefixes.{key}.prefix"),
                    message: format!("unrecognized scheme in prefix \"{p}\""),
                });
            }
            if shoulder.minter.is_empty() && p != "urn:uuid:" {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("prefixes.{key}.minter"),
                    message: "no minter configured; minting under this shoulder will fail".into(),
                });
            }
        }

        if self.directory.admin_username.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "directory.admin_username".into(),
                message: "admin_username must not be empty".into(),
            });
        }

        if self.registrar.enabled {
            for (field, value) in [
                ("registrar.username", &self.registrar.username),
                ("registrar.depositor_name", &self.registrar.depositor_name),
                ("registrar.depositor_email", &self.registrar.depositor_email),
            ] {
                if value.is_empty() {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: field.into(),
                        message: "required when the registrar is enabled".into(),
                    });
                }
            }
            if !self.registrar.deposit_url.contains("%s")
                || !self.registrar.results_url.contains("%s")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "registrar.deposit_url".into(),
                    message: "URL pattern has no %s server placeholder".into(),
                });
            }
        }

        if self.mail.enabled && self.mail.from_address.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "mail.from_address".into(),
                message: "required when mail is enabled".into(),
            });
        }

        errors
    }

    /// Shoulder whose qualified prefix matches exactly.
    pub fn shoulder_for(&self, prefix: &str) -> Option<&PrefixConfig> {
        self.prefixes.values().find(|s| s.prefix == prefix)
    }
}

// ── serde default helpers ─────────────────────────────────────────────

fn d_bind_noid() -> PathBuf {
    PathBuf::from("./data/bind")
}
fn d_base_url() -> String {
    "https://id.example.org".into()
}
fn d_erc() -> String {
    "erc".into()
}
fn d_datacite_profile() -> String {
    "datacite".into()
}
fn d_status_interval() -> u64 {
    300
}
fn d_admin() -> String {
    "admin".into()
}
fn d_user_kind() -> String {
    "user".into()
}
fn d_real_server() -> String {
    "doi.crossref.org".into()
}
fn d_test_server() -> String {
    "test.crossref.org".into()
}
fn d_deposit_url() -> String {
    "https://%s/servlet/deposit".into()
}
fn d_results_url() -> String {
    "https://%s/servlet/submissionDownload".into()
}
fn d_idle_sleep() -> u64 {
    15
}
fn d_test_prefixes() -> Vec<String> {
    vec!["10.5072/".into()]
}
fn d_true() -> bool {
    true
}
fn d_localhost() -> String {
    "localhost".into()
}
fn d_smtp_port() -> u16 {
    25
}
