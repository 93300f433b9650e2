//! Provides the CLI option parsers
//!
//! Each plugin binary reads its flags and, optionally, a TOML file carrying
//! the same keys. A flag given on the command line overrides the file, the
//! file overrides the built-in default.

use clap::{App, Arg, ArgMatches};
use crate::cloudwatch::Credentials;
use crate::collector::postgres::ConnectionConfig;
use crate::plugin::HostError;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use toml;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

/// Default snapshot cache of the CPU credit plugin.
pub const CPUCREDIT_TEMPFILE: &str = "/tmp/mackerel-plugin-cpucredit";
/// Default snapshot cache of the PostgreSQL plugin.
pub const POSTGRES_TEMPFILE: &str = "/tmp/mackerel-plugin-postgres";

/// Configuration of the CPU credit plugin.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuCreditArgs {
    /// Explicit region. Used only together with `instance_id`.
    pub region: Option<String>,
    /// Explicit instance identifier. Used only together with `region`.
    pub instance_id: Option<String>,
    /// Explicit access key id.
    pub access_key_id: Option<String>,
    /// Explicit secret access key.
    pub secret_access_key: Option<String>,
    /// Previous-snapshot cache.
    pub tempfile: PathBuf,
    /// Verbosity; the higher, the chattier.
    pub verbose: u64,
}

impl CpuCreditArgs {
    /// The credentials part of the configuration.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
        }
    }
}

/// Configuration of the PostgreSQL plugin.
#[derive(Clone, Debug, PartialEq)]
pub struct PostgresArgs {
    /// Where and how to connect.
    pub connection: ConnectionConfig,
    /// Previous-snapshot cache.
    pub tempfile: PathBuf,
    /// Verbosity; the higher, the chattier.
    pub verbose: u64,
}

fn common_args<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.version(VERSION.unwrap_or("unknown"))
        .arg(
            Arg::with_name("tempfile")
                .long("tempfile")
                .value_name("path")
                .help("Where the previous snapshot is kept between runs.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("C")
                .value_name("config")
                .help("A TOML file providing defaults for any of these flags.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Turn on verbose output."),
        )
}

fn value_arg(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name)
        .long(name)
        .value_name(name)
        .help(help)
        .takes_value(true)
}

/// The CPU credit plugin's command line.
pub fn cpucredit_app() -> App<'static, 'static> {
    common_args(App::new("pullstat-cpucredit"))
        .about("EC2 CPU credit usage and balance, for the monitoring agent")
        .arg(value_arg("region", "AWS region. Discovered from instance metadata if omitted."))
        .arg(value_arg(
            "instance-id",
            "Instance to report on. Discovered from instance metadata if omitted.",
        ))
        .arg(value_arg("access-key-id", "AWS access key id."))
        .arg(value_arg("secret-access-key", "AWS secret access key."))
}

/// The PostgreSQL plugin's command line.
pub fn postgres_app() -> App<'static, 'static> {
    common_args(App::new("pullstat-postgres"))
        .about("PostgreSQL pg_stat_database counters, for the monitoring agent")
        .arg(value_arg("hostname", "Server host name. Default: localhost."))
        .arg(value_arg("port", "Server port. Default: 5432."))
        .arg(value_arg("username", "Role to connect as. Default: postgres."))
        .arg(value_arg("password", "Password."))
        .arg(value_arg("database", "Database to connect to."))
        .arg(value_arg("sslmode", "sslmode: disable, prefer, require, ... Default: disable."))
}

/// Flag and file lookups, in precedence order.
struct Settings<'m, 'a: 'm> {
    matches: &'m ArgMatches<'a>,
    file: Option<toml::Value>,
}

impl<'m, 'a> Settings<'m, 'a> {
    fn new(matches: &'m ArgMatches<'a>) -> Result<Settings<'m, 'a>, HostError> {
        let file = match matches.value_of("config") {
            Some(path) => {
                let buffer = fs::read_to_string(path)
                    .map_err(|e| HostError::Config(format!("could not read {}: {}", path, e)))?;
                Some(parse_config_file(&buffer)?)
            }
            None => None,
        };
        Ok(Settings { matches, file })
    }

    fn get(&self, key: &str) -> Result<Option<String>, HostError> {
        if let Some(v) = self.matches.value_of(key) {
            return Ok(Some(v.to_string()));
        }
        match self.file.as_ref().and_then(|f| f.get(key)) {
            None => Ok(None),
            Some(&toml::Value::String(ref s)) => Ok(Some(s.clone())),
            Some(&toml::Value::Integer(i)) => Ok(Some(i.to_string())),
            Some(other) => Err(HostError::Config(format!(
                "{} must be a string or an integer, not {}",
                key,
                other.type_str()
            ))),
        }
    }

    fn tempfile(&self, default: &str) -> Result<PathBuf, HostError> {
        Ok(PathBuf::from(
            self.get("tempfile")?.unwrap_or_else(|| default.to_string()),
        ))
    }

    fn verbose(&self) -> u64 {
        self.matches.occurrences_of("verbose")
    }
}

/// Parse the TOML configuration file.
pub fn parse_config_file(buffer: &str) -> Result<toml::Value, HostError> {
    let value: toml::Value = toml::from_str(buffer)
        .map_err(|e| HostError::Config(format!("could not parse config file: {}", e)))?;
    if !value.is_table() {
        return Err(HostError::Config("config file must be a table".to_string()));
    }
    Ok(value)
}

/// Build `CpuCreditArgs` from parsed flags.
pub fn cpucredit_args(matches: &ArgMatches) -> Result<CpuCreditArgs, HostError> {
    let settings = Settings::new(matches)?;
    Ok(CpuCreditArgs {
        region: settings.get("region")?,
        instance_id: settings.get("instance-id")?,
        access_key_id: settings.get("access-key-id")?,
        secret_access_key: settings.get("secret-access-key")?,
        tempfile: settings.tempfile(CPUCREDIT_TEMPFILE)?,
        verbose: settings.verbose(),
    })
}

/// Build `PostgresArgs` from parsed flags.
pub fn postgres_args(matches: &ArgMatches) -> Result<PostgresArgs, HostError> {
    let settings = Settings::new(matches)?;
    let mut connection = ConnectionConfig::default();
    if let Some(hostname) = settings.get("hostname")? {
        connection.hostname = hostname;
    }
    if let Some(port) = settings.get("port")? {
        connection.port = u16::from_str(&port)
            .map_err(|e| HostError::Config(format!("bad port {:?}: {}", port, e)))?;
    }
    if let Some(username) = settings.get("username")? {
        connection.username = username;
    }
    if let Some(sslmode) = settings.get("sslmode")? {
        connection.sslmode = sslmode;
    }
    connection.password = settings.get("password")?;
    connection.database = settings.get("database")?;
    Ok(PostgresArgs {
        connection,
        tempfile: settings.tempfile(POSTGRES_TEMPFILE)?,
        verbose: settings.verbose(),
    })
}
