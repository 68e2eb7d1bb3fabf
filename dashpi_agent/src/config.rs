//! Agent configuration from command-line flags and `DASHPI_*` environment
//! variables. Flags win over the environment, the environment over defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5252;
pub const DEFAULT_SOFTWARE_TOOL: &str = "/boot/dietpi/dietpi-software";
pub const DEFAULT_SERVICES_TOOL: &str = "/boot/dietpi/dietpi-services";
pub const DEFAULT_SHELL: &str = "/bin/bash";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0}")]
    Help(String),
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("unknown argument {0:?}")]
    UnknownArgument(String),
    #[error("--cert and --key must be given together")]
    IncompleteTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// CPU and per-process usage are measured over this window.
    pub sample_interval: Duration,
    pub software_tool: PathBuf,
    pub services_tool: PathBuf,
    pub shell: String,
    pub terminal_grace: Duration,
    pub tls: Option<TlsConfig>,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            sample_interval: Duration::from_millis(1000),
            software_tool: PathBuf::from(DEFAULT_SOFTWARE_TOOL),
            services_tool: PathBuf::from(DEFAULT_SERVICES_TOOL),
            shell: DEFAULT_SHELL.to_string(),
            terminal_grace: Duration::from_millis(2000),
            tls: None,
            log_level: "info".to_string(),
        }
    }
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--port N|-p N] [--bind ADDR] [--sample-ms N] [--software-tool PATH] \
         [--services-tool PATH] [--shell PATH] [--term-grace-ms N] [--enableSSL] [--cert PEM --key PEM] [--log-level L]"
    )
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn truthy(v: &str) -> bool {
    !matches!(v, "" | "0" | "false" | "no" | "off")
}

// Settings that can come from either source, before defaults are applied.
#[derive(Default)]
struct Overrides {
    port: Option<String>,
    bind: Option<String>,
    sample_ms: Option<String>,
    software_tool: Option<String>,
    services_tool: Option<String>,
    shell: Option<String>,
    grace_ms: Option<String>,
    tls: Option<bool>,
    cert: Option<String>,
    key: Option<String>,
    log_level: Option<String>,
}

impl Overrides {
    fn from_env(env: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            port: env("DASHPI_PORT"),
            bind: env("DASHPI_BIND"),
            sample_ms: env("DASHPI_SAMPLE_MS"),
            software_tool: env("DASHPI_SOFTWARE_TOOL"),
            services_tool: env("DASHPI_SERVICES_TOOL"),
            shell: env("DASHPI_SHELL"),
            grace_ms: env("DASHPI_TERM_GRACE_MS"),
            tls: env("DASHPI_TLS").map(|v| truthy(&v)),
            cert: env("DASHPI_CERT"),
            key: env("DASHPI_KEY"),
            log_level: env("DASHPI_LOG"),
        }
    }

    fn merge(self, over: Overrides) -> Self {
        Self {
            port: over.port.or(self.port),
            bind: over.bind.or(self.bind),
            sample_ms: over.sample_ms.or(self.sample_ms),
            software_tool: over.software_tool.or(self.software_tool),
            services_tool: over.services_tool.or(self.services_tool),
            shell: over.shell.or(self.shell),
            grace_ms: over.grace_ms.or(self.grace_ms),
            tls: over.tls.or(self.tls),
            cert: over.cert.or(self.cert),
            key: over.key.or(self.key),
            log_level: over.log_level.or(self.log_level),
        }
    }
}

fn parse_flags<I: IntoIterator<Item = String>>(args: I) -> Result<Overrides, ConfigError> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "dashpi_agent".into());
    let mut o = Overrides::default();

    while let Some(arg) = it.next() {
        // --key=value and --key value are both accepted
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String, ConfigError> {
            match inline.clone() {
                Some(v) => Ok(v),
                None => it
                    .next()
                    .ok_or_else(|| ConfigError::MissingValue(name.to_string())),
            }
        };
        match flag.as_str() {
            "-h" | "--help" => return Err(ConfigError::Help(usage(&prog))),
            "--port" | "-p" => o.port = Some(value("--port")?),
            "--bind" => o.bind = Some(value("--bind")?),
            "--sample-ms" => o.sample_ms = Some(value("--sample-ms")?),
            "--software-tool" => o.software_tool = Some(value("--software-tool")?),
            "--services-tool" => o.services_tool = Some(value("--services-tool")?),
            "--shell" => o.shell = Some(value("--shell")?),
            "--term-grace-ms" => o.grace_ms = Some(value("--term-grace-ms")?),
            "--enableSSL" | "--tls" => o.tls = Some(true),
            "--cert" => o.cert = Some(value("--cert")?),
            "--key" => o.key = Some(value("--key")?),
            "--log-level" => o.log_level = Some(value("--log-level")?),
            _ => return Err(ConfigError::UnknownArgument(arg)),
        }
    }
    Ok(o)
}

impl AgentConfig {
    /// Builds the config from process arguments (program name first) and an
    /// environment lookup.
    pub fn from_sources<I>(args: I, env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let o = Overrides::from_env(env).merge(parse_flags(args)?);
        let mut cfg = AgentConfig::default();

        if let Some(v) = o.port {
            cfg.port = parse("port", &v)?;
        }
        if let Some(v) = o.bind {
            cfg.bind = parse("bind", &v)?;
        }
        if let Some(v) = o.sample_ms {
            // a zero window would turn the polling pages into a busy loop
            let ms: u64 = parse("sample-ms", &v)?;
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "sample-ms".into(),
                    value: v,
                });
            }
            cfg.sample_interval = Duration::from_millis(ms);
        }
        if let Some(v) = o.software_tool {
            cfg.software_tool = PathBuf::from(v);
        }
        if let Some(v) = o.services_tool {
            cfg.services_tool = PathBuf::from(v);
        }
        if let Some(v) = o.shell {
            cfg.shell = v;
        }
        if let Some(v) = o.grace_ms {
            cfg.terminal_grace = Duration::from_millis(parse("term-grace-ms", &v)?);
        }
        if let Some(v) = o.log_level {
            cfg.log_level = v;
        }

        // a cert/key pair implies TLS even without the flag
        let tls_on = o.tls.unwrap_or(false) || o.cert.is_some() || o.key.is_some();
        if tls_on {
            match (o.cert, o.key) {
                (Some(c), Some(k)) => {
                    cfg.tls = Some(TlsConfig {
                        cert: Some(c.into()),
                        key: Some(k.into()),
                    })
                }
                (None, None) => {
                    cfg.tls = Some(TlsConfig {
                        cert: None,
                        key: None,
                    })
                }
                _ => return Err(ConfigError::IncompleteTls),
            }
        }
        Ok(cfg)
    }

    pub fn from_env_and_args() -> Result<Self, ConfigError> {
        Self::from_sources(std::env::args(), &|k: &str| std::env::var(k).ok())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("dashpi_agent")
            .chain(v.iter().copied())
            .map(String::from)
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_input() {
        let cfg = AgentConfig::from_sources(args(&[]), &no_env).unwrap();
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.socket_addr().port(), DEFAULT_PORT);
    }

    #[test]
    fn port_long_short_and_assign() {
        for (a, want) in [
            (vec!["--port", "9001"], 9001),
            (vec!["-p", "9002"], 9002),
            (vec!["--port=9003"], 9003),
        ] {
            let cfg = AgentConfig::from_sources(args(&a), &no_env).unwrap();
            assert_eq!(cfg.port, want);
        }
    }

    #[test]
    fn flags_override_environment() {
        let env: HashMap<&str, &str> = [
            ("DASHPI_PORT", "7000"),
            ("DASHPI_SAMPLE_MS", "250"),
            ("DASHPI_SHELL", "/bin/sh"),
            ("DASHPI_SERVICES_TOOL", "/opt/services"),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());
        let cfg = AgentConfig::from_sources(args(&["--port", "7001"]), &lookup).unwrap();
        assert_eq!(cfg.port, 7001);
        assert_eq!(cfg.sample_interval, Duration::from_millis(250));
        assert_eq!(cfg.shell, "/bin/sh");
        assert_eq!(cfg.services_tool, PathBuf::from("/opt/services"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = AgentConfig::from_sources(args(&["--port", "high"]), &no_env).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "port".into(),
                value: "high".into()
            }
        );
        let err = AgentConfig::from_sources(args(&["--sample-ms"]), &no_env).unwrap_err();
        assert_eq!(err, ConfigError::MissingValue("--sample-ms".into()));
    }

    #[test]
    fn zero_sampling_window_is_rejected() {
        let err = AgentConfig::from_sources(args(&["--sample-ms", "0"]), &no_env).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "sample-ms".into(),
                value: "0".into()
            }
        );
        let from_env = |k: &str| (k == "DASHPI_SAMPLE_MS").then(|| "0".to_string());
        assert!(AgentConfig::from_sources(args(&[]), &from_env).is_err());
    }

    #[test]
    fn tls_flag_and_pairs() {
        let cfg = AgentConfig::from_sources(args(&["--enableSSL"]), &no_env).unwrap();
        assert_eq!(
            cfg.tls,
            Some(TlsConfig {
                cert: None,
                key: None
            })
        );
        let cfg =
            AgentConfig::from_sources(args(&["--cert", "c.pem", "--key", "k.pem"]), &no_env)
                .unwrap();
        assert_eq!(cfg.tls.unwrap().cert, Some(PathBuf::from("c.pem")));
        let err = AgentConfig::from_sources(args(&["--cert", "c.pem"]), &no_env).unwrap_err();
        assert_eq!(err, ConfigError::IncompleteTls);
    }

    #[test]
    fn help_and_unknown_arguments() {
        assert!(matches!(
            AgentConfig::from_sources(args(&["--help"]), &no_env),
            Err(ConfigError::Help(_))
        ));
        assert_eq!(
            AgentConfig::from_sources(args(&["--bogus"]), &no_env).unwrap_err(),
            ConfigError::UnknownArgument("--bogus".into())
        );
    }
}
