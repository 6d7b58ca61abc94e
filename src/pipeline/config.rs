//! Transfer configuration.
//!
//! Per observatory and mode, a YAML file `transfer.<obs>_<mode>.yaml` (or
//! `transfer.<obs>.yaml`) in `TRANSFER_INI_DIR` describes the data sections
//! to move and a few global options:
//!
//! ```yaml
//! general:
//!   report_url: https://data.example.org/apo/reports/
//!   streams: 4
//!   permission: false
//!   backend: tarball
//!   retention_days: 30
//! sections:
//!   - name: apogee
//!     path: /data/apogee
//!     ssh: sdss@observer.apo.nmsu.edu
//!     multiple: true
//!     compress: true
//!     verify: md5sum -c
//!     copy_destination: $APOGEE_DATA_N
//!     links: [/data/apogee/latest]
//! ```
//!
//! Paths outside the YAML come from the environment: `<OBS>_STAGING_DATA`
//! for the staging root and the `TRANSFER_BACKUP_*` family for backups.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::Mjd;
use crate::remote::parse_host_list;

/// Default log directory name under the staging root.
pub const DEFAULT_LOG_DIR: &str = "atlogs";

/// Default activation probe for the archive endpoint.
pub const DEFAULT_STATUS_URL: &str = "https://newt.nersc.gov/newt/status/archive";

/// Transfer mechanism used by the mirror and backup stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Tar archives staged to a backup area.
    #[default]
    Tarball,
    /// Direct rsync of each section to its mirror path.
    Rsync,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Tarball => write!(f, "tarball"),
            BackendKind::Rsync => write!(f, "rsync"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tarball" | "tar" => Ok(BackendKind::Tarball),
            "rsync" => Ok(BackendKind::Rsync),
            other => Err(ConfigError::InvalidValue {
                key: "backend".to_string(),
                message: format!("unknown backend '{}'", other),
            }),
        }
    }
}

/// How a section's transferred files are checked.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VerifyMethod {
    #[default]
    Skip,
    /// Compare against the frame list in the night's `irsc.log.gz`.
    Ircam,
    /// Run a checksum tool against `<mjd>.<tool>`, e.g. `md5sum -c`.
    Checksum(Vec<String>),
}

impl VerifyMethod {
    /// Name of the checksum tool, which is also the sum file extension.
    pub fn tool(&self) -> Option<&str> {
        match self {
            VerifyMethod::Checksum(argv) => argv.first().map(|program| {
                Path::new(program)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(program.as_str())
            }),
            _ => None,
        }
    }
}

impl From<String> for VerifyMethod {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("skip") {
            VerifyMethod::Skip
        } else if trimmed.eq_ignore_ascii_case("ircam") {
            VerifyMethod::Ircam
        } else {
            VerifyMethod::Checksum(trimmed.split_whitespace().map(String::from).collect())
        }
    }
}

impl From<VerifyMethod> for String {
    fn from(value: VerifyMethod) -> Self {
        match value {
            VerifyMethod::Skip => "SKIP".to_string(),
            VerifyMethod::Ircam => "ircam".to_string(),
            VerifyMethod::Checksum(argv) => argv.join(" "),
        }
    }
}

/// The `general` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Night report listing; `SKIP` disables the report stage.
    #[serde(default)]
    pub report_url: Option<String>,
    /// Parallel rsync streams for sections with `multiple: true`.
    #[serde(default = "default_streams")]
    pub streams: usize,
    /// Preserve permissions in rsync instead of forcing `ugo=rwX`.
    #[serde(default)]
    pub permission: bool,
    #[serde(default)]
    pub backend: BackendKind,
    /// Staged nights older than this are removed after a successful copy.
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// Remote directory receiving a done marker after an rsync mirror.
    #[serde(default)]
    pub remote_status_dir: Option<String>,
}

fn default_streams() -> usize {
    1
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            report_url: None,
            streams: default_streams(),
            permission: false,
            backend: BackendKind::default(),
            retention_days: None,
            remote_status_dir: None,
        }
    }
}

impl GeneralConfig {
    /// The report listing URL, unless absent or `SKIP`.
    pub fn report_url(&self) -> Option<&str> {
        self.report_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty() && !url.eq_ignore_ascii_case("skip"))
    }
}

/// One data section: a remote directory tree keyed by night.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub name: String,
    /// Subfolder of the staging root; defaults to the section name.
    #[serde(default)]
    pub folder: Option<String>,
    /// Source root; nights live at `<path>/<mjd>`.
    pub path: String,
    /// `user@host` of the source; local when absent.
    #[serde(default)]
    pub ssh: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Download with parallel streams.
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub verify: VerifyMethod,
    /// Copy target; a leading `$` names an environment variable.
    #[serde(default)]
    pub copy_destination: Option<String>,
    /// rsync mirror target for the `rsync` backend.
    #[serde(default)]
    pub mirror_path: Option<String>,
    /// Directories that receive an `<mjd>` symlink after copy.
    #[serde(default)]
    pub links: Vec<PathBuf>,
}

impl SectionConfig {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folder: None,
            path: path.into(),
            ssh: None,
            port: None,
            multiple: false,
            compress: false,
            verify: VerifyMethod::Skip,
            copy_destination: None,
            mirror_path: None,
            links: Vec::new(),
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_ssh(mut self, ssh: impl Into<String>) -> Self {
        self.ssh = Some(ssh.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    pub fn with_verify(mut self, verify: VerifyMethod) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_copy_destination(mut self, destination: impl Into<String>) -> Self {
        self.copy_destination = Some(destination.into());
        self
    }

    pub fn with_mirror_path(mut self, path: impl Into<String>) -> Self {
        self.mirror_path = Some(path.into());
        self
    }

    pub fn with_links(mut self, links: Vec<PathBuf>) -> Self {
        self.links = links;
        self
    }

    pub fn staging_folder(&self) -> &str {
        self.folder.as_deref().unwrap_or(&self.name)
    }

    /// `<staging>/<folder>`: holds one directory per night.
    pub fn local_root(&self, staging: &Path) -> PathBuf {
        staging.join(self.staging_folder())
    }

    /// `<staging>/<folder>/<mjd>`.
    pub fn local_dir(&self, staging: &Path, mjd: Mjd) -> PathBuf {
        self.local_root(staging).join(mjd.to_string())
    }

    /// Source night directory, as seen from the source host.
    pub fn remote_dir(&self, mjd: Mjd) -> String {
        format!("{}/{}", self.path.trim_end_matches('/'), mjd)
    }

    /// rsync source argument for the night, with a trailing slash.
    pub fn rsync_source(&self, mjd: Mjd) -> String {
        match &self.ssh {
            Some(dest) => format!("{}:{}/", dest, self.remote_dir(mjd)),
            None => format!("{}/", self.remote_dir(mjd)),
        }
    }

    /// Remote shell for rsync when the source listens on a non-default port.
    pub fn rsh(&self) -> Option<String> {
        self.port.map(|port| format!("ssh -p {}", port))
    }

    /// Resolved copy target, expanding a `$VAR` reference.
    pub fn copy_destination(&self) -> Result<Option<PathBuf>, ConfigError> {
        self.copy_destination
            .as_deref()
            .map(|value| expand_env(value).map(PathBuf::from))
            .transpose()
    }
}

/// Deployment values taken from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferEnv {
    pub backup_dir: Option<PathBuf>,
    pub mirror_backup: Option<PathBuf>,
    pub backup_user: Option<String>,
    pub backup_hosts: Vec<String>,
    pub backup_ready: bool,
    pub status_url: String,
    pub template_dir: Option<PathBuf>,
}

impl TransferEnv {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backup_ready = match std::env::var("TRANSFER_BACKUP_READY") {
            Ok(val) => parse_env_bool(&val, "TRANSFER_BACKUP_READY")?,
            Err(_) => false,
        };
        Ok(Self {
            backup_dir: std::env::var_os("TRANSFER_BACKUP_DIR").map(PathBuf::from),
            mirror_backup: std::env::var_os("TRANSFER_MIRROR_BACKUP").map(PathBuf::from),
            backup_user: std::env::var("TRANSFER_BACKUP_USER").ok(),
            backup_hosts: std::env::var("TRANSFER_BACKUP_HOST")
                .map(|hosts| parse_host_list(&hosts))
                .unwrap_or_default(),
            backup_ready,
            status_url: std::env::var("TRANSFER_BACKUP_STATUS_URL")
                .unwrap_or_else(|_| DEFAULT_STATUS_URL.to_string()),
            template_dir: std::env::var_os("TRANSFER_TEMPLATE_DIR").map(PathBuf::from),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    general: GeneralConfig,
    #[serde(default)]
    sections: Vec<SectionConfig>,
}

/// Everything a run needs to know before it starts.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub observatory: String,
    pub mode: Option<String>,
    pub staging: PathBuf,
    pub log_dir: String,
    pub general: GeneralConfig,
    pub sections: Vec<SectionConfig>,
    pub env: TransferEnv,
}

impl TransferConfig {
    pub fn new(observatory: impl Into<String>, mode: Option<&str>, staging: impl Into<PathBuf>) -> Self {
        Self {
            observatory: observatory.into(),
            mode: mode.map(String::from),
            staging: staging.into(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            general: GeneralConfig::default(),
            sections: Vec::new(),
            env: TransferEnv::default(),
        }
    }

    /// Config file name for an observatory and optional mode.
    pub fn file_name(observatory: &str, mode: Option<&str>) -> String {
        match mode {
            Some(mode) => format!("transfer.{}_{}.yaml", observatory, mode),
            None => format!("transfer.{}.yaml", observatory),
        }
    }

    /// Parses the YAML body of a config file.
    pub fn from_yaml_str(
        observatory: &str,
        mode: Option<&str>,
        staging: impl Into<PathBuf>,
        yaml: &str,
        source: &Path,
    ) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: source.to_path_buf(),
            source: e,
        })?;
        let mut config = Self::new(observatory, mode, staging);
        config.general = file.general;
        config.sections = file.sections;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the environment and the YAML file.
    ///
    /// `config_dir` overrides `TRANSFER_INI_DIR`.
    pub fn load(
        observatory: &str,
        mode: Option<&str>,
        config_dir: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let staging_var = format!("{}_STAGING_DATA", observatory.to_uppercase());
        let staging = std::env::var_os(&staging_var)
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingEnvVar(staging_var))?;

        let dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::var_os("TRANSFER_INI_DIR")
                .map(PathBuf::from)
                .ok_or_else(|| ConfigError::MissingEnvVar("TRANSFER_INI_DIR".to_string()))?,
        };
        let path = dir.join(Self::file_name(observatory, mode));
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        info!("OPEN {}", path.display());
        let yaml = std::fs::read_to_string(&path)?;

        let mut config = Self::from_yaml_str(observatory, mode, staging, &yaml, &path)?;
        config.env = TransferEnv::from_env()?;
        debug!(
            "sections={:?}",
            config.sections.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
        );
        Ok(config)
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<String>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_general(mut self, general: GeneralConfig) -> Self {
        self.general = general;
        self
    }

    pub fn with_sections(mut self, sections: Vec<SectionConfig>) -> Self {
        self.sections = sections;
        self
    }

    pub fn with_env(mut self, env: TransferEnv) -> Self {
        self.env = env;
        self
    }

    /// `<staging>/<log_dir>`: ledgers, run directories and the dashboard.
    pub fn log_root(&self) -> PathBuf {
        self.staging.join(&self.log_dir)
    }

    /// `<log_root>/<mjd>`.
    pub fn night_log_dir(&self, mjd: Mjd) -> PathBuf {
        self.log_root().join(mjd.to_string())
    }

    /// Archive label: the observatory for `mos`, otherwise the mode.
    pub fn label(&self) -> &str {
        match self.mode.as_deref() {
            Some(mode) if mode != "mos" => mode,
            _ => &self.observatory,
        }
    }

    /// `transfer.<obs>-<mode>` or `transfer.<obs>`.
    pub fn log_name(&self) -> String {
        match &self.mode {
            Some(mode) => format!("transfer.{}-{}", self.observatory, mode),
            None => format!("transfer.{}", self.observatory),
        }
    }

    /// Keeps only included sections, or drops excluded ones.
    pub fn filter_sections(&mut self, include: &[String], exclude: &[String]) -> Result<(), ConfigError> {
        if !include.is_empty() && !exclude.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "include and exclude are mutually exclusive".to_string(),
            ));
        }
        if !include.is_empty() {
            self.sections.retain(|s| include.contains(&s.name));
        } else if !exclude.is_empty() {
            self.sections.retain(|s| !exclude.contains(&s.name));
        }
        Ok(())
    }

    pub fn section(&self, name: &str) -> Option<&SectionConfig> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.streams == 0 {
            return Err(ConfigError::ValidationFailed(
                "streams must be greater than 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for section in &self.sections {
            if section.name.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "section name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(section.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate section '{}'",
                    section.name
                )));
            }
            if section.path.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "section '{}' has no path",
                    section.name
                )));
            }
        }

        Ok(())
    }
}

/// Replaces a whole-value `$VAR` with the variable's content.
fn expand_env(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix('$') {
        Some(name) => {
            let name = name.trim_start_matches('{').trim_end_matches('}');
            std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
        }
        None => Ok(value.to_string()),
    }
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
general:
  report_url: SKIP
  streams: 4
  backend: rsync
  retention_days: 30
sections:
  - name: apogee
    path: /data/apogee/
    ssh: sdss@observer
    port: 2222
    multiple: true
    verify: md5sum -c
  - name: boss
    folder: boss/sos
    path: /data/boss/sos
    verify: SKIP
  - name: ircam
    path: /data/ircam
    verify: ircam
    copy_destination: /sas/ircam
"#;

    fn sample() -> TransferConfig {
        TransferConfig::from_yaml_str("apo", Some("mos"), "/staging", SAMPLE, Path::new("test.yaml"))
            .unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert_eq!(config.general.streams, 4);
        assert_eq!(config.general.backend, BackendKind::Rsync);
        assert_eq!(config.general.report_url(), None);
        assert_eq!(config.general.retention_days, Some(30));
        assert!(!config.general.permission);
        assert_eq!(config.sections.len(), 3);

        let apogee = config.section("apogee").unwrap();
        assert!(apogee.multiple);
        assert_eq!(
            apogee.verify,
            VerifyMethod::Checksum(vec!["md5sum".to_string(), "-c".to_string()])
        );
        assert_eq!(apogee.verify.tool(), Some("md5sum"));
        assert_eq!(apogee.rsh().as_deref(), Some("ssh -p 2222"));
        assert_eq!(apogee.rsync_source(Mjd(60000)), "sdss@observer:/data/apogee/60000/");

        let boss = config.section("boss").unwrap();
        assert_eq!(boss.verify, VerifyMethod::Skip);
        assert_eq!(
            boss.local_dir(Path::new("/staging"), Mjd(60000)),
            PathBuf::from("/staging/boss/sos/60000")
        );
        assert_eq!(boss.rsync_source(Mjd(60000)), "/data/boss/sos/60000/");

        assert_eq!(config.section("ircam").unwrap().verify, VerifyMethod::Ircam);
    }

    #[test]
    fn test_defaults_and_paths() {
        let config = TransferConfig::new("lco", Some("lvm"), "/staging");
        assert_eq!(config.general.streams, 1);
        assert_eq!(config.general.backend, BackendKind::Tarball);
        assert_eq!(config.log_root(), PathBuf::from("/staging/atlogs"));
        assert_eq!(config.night_log_dir(Mjd(60000)), PathBuf::from("/staging/atlogs/60000"));
        assert_eq!(config.label(), "lvm");
        assert_eq!(config.log_name(), "transfer.lco-lvm");

        let config = TransferConfig::new("apo", Some("mos"), "/staging").with_log_dir("logs");
        assert_eq!(config.label(), "apo");
        assert_eq!(config.log_root(), PathBuf::from("/staging/logs"));
        assert_eq!(TransferConfig::new("apo", None, "/s").log_name(), "transfer.apo");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(TransferConfig::file_name("apo", Some("mos")), "transfer.apo_mos.yaml");
        assert_eq!(TransferConfig::file_name("lco", None), "transfer.lco.yaml");
    }

    #[test]
    fn test_filter_sections() {
        let mut config = sample();
        config
            .filter_sections(&["boss".to_string()], &[])
            .unwrap();
        assert_eq!(config.sections.len(), 1);

        let mut config = sample();
        config
            .filter_sections(&[], &["boss".to_string(), "ircam".to_string()])
            .unwrap();
        assert_eq!(config.sections.len(), 1);
        assert_eq!(config.sections[0].name, "apogee");

        let mut config = sample();
        assert!(config
            .filter_sections(&["a".to_string()], &["b".to_string()])
            .is_err());
    }

    #[test]
    fn test_validation() {
        let dup = "sections:\n  - {name: a, path: /x}\n  - {name: a, path: /y}\n";
        let err = TransferConfig::from_yaml_str("apo", None, "/s", dup, Path::new("dup.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate section"));

        let zero = "general: {streams: 0}\n";
        assert!(TransferConfig::from_yaml_str("apo", None, "/s", zero, Path::new("z.yaml")).is_err());

        let bad = "sections: [ {name: a} ]\n";
        let err = TransferConfig::from_yaml_str("apo", None, "/s", bad, Path::new("bad.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("transfer.zzt_mos.yaml"), SAMPLE).unwrap();
        std::env::set_var("ZZT_STAGING_DATA", temp.path());

        let config = TransferConfig::load("zzt", Some("mos"), Some(temp.path())).unwrap();
        assert_eq!(config.staging, temp.path());
        assert_eq!(config.sections.len(), 3);

        let err = TransferConfig::load("zzt", Some("lvm"), Some(temp.path())).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_missing_staging_variable() {
        let err = TransferConfig::load("nowhere", None, Some(Path::new("/tmp"))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "NOWHERE_STAGING_DATA"));
    }

    #[test]
    fn test_copy_destination_expands_env() {
        std::env::set_var("TRANSFER_TEST_SAS_DIR", "/sas/data");
        let section = SectionConfig::new("apogee", "/data").with_copy_destination("$TRANSFER_TEST_SAS_DIR");
        assert_eq!(section.copy_destination().unwrap(), Some(PathBuf::from("/sas/data")));

        let section = SectionConfig::new("apogee", "/data").with_copy_destination("${TRANSFER_TEST_UNSET_DIR}");
        assert!(section.copy_destination().is_err());

        let section = SectionConfig::new("apogee", "/data");
        assert_eq!(section.copy_destination().unwrap(), None);
    }

    #[test]
    fn test_verify_method_round_trip_text() {
        assert_eq!(String::from(VerifyMethod::from("md5sum -c".to_string())), "md5sum -c");
        assert_eq!(VerifyMethod::from("skip".to_string()), VerifyMethod::Skip);
        assert_eq!(VerifyMethod::from(String::new()), VerifyMethod::Skip);
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("True", "test").unwrap());
        assert!(parse_env_bool("1", "test").unwrap());
        assert!(!parse_env_bool("False", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(parse_env_bool("maybe", "test").is_err());
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("rsync".parse::<BackendKind>().unwrap(), BackendKind::Rsync);
        assert_eq!("Tarball".parse::<BackendKind>().unwrap(), BackendKind::Tarball);
        assert!("globus".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Rsync.to_string(), "rsync");
    }
}
