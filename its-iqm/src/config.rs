//! Configuration loading.
//!
//! The inter-queue manager is configured from one INI file, the way the
//! original Python service is: a `[general]` section, a `[local]` broker
//! section, a `[neighbours]` section giving the shared client id used for
//! all neighbour connections, a `[telemetry]` section, an `[authority]`
//! section selecting and configuring the central-authority source, and any
//! number of `[filter.<name>]` sections.

use std::path::Path;

use configparser::ini::Ini;

use crate::error::{IqmError, Result};

#[derive(Debug, Clone)]
pub struct GeneralConfig {
    pub instance_id: String,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    /// `"local"` or `"central"`, published in the broker's `info` topic.
    pub instance_type: String,
    /// Period, in seconds, between retained `info` topic publishes.
    pub info_period: u64,
}

#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub interqueue: String,
}

#[derive(Debug, Clone)]
pub struct NeighboursConfig {
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub enum AuthorityConfig {
    File { path: String, reload: Option<u64> },
    Http { uri: String, reload: u64 },
    Mqtt { host: String, port: u16, topic: String, client_id: Option<String>, username: Option<String>, password: Option<String> },
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub endpoint: Option<String>,
    pub authentication: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One `[filter.<name>]` section, still in its raw string form; compiling
/// it into a `its_core::filter::Filter` happens once the queue names and
/// instance id are known.
#[derive(Debug, Clone)]
pub struct FilterSectionConfig {
    pub name: String,
    pub in_prefix: Option<String>,
    pub in_regex: Option<String>,
    pub out_prefix: Option<String>,
    pub out_regex: Option<String>,
    pub drop: bool,
    pub retain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub local: LocalConfig,
    pub neighbours: NeighboursConfig,
    pub authority: AuthorityConfig,
    pub telemetry: TelemetryConfig,
    pub filters: Vec<FilterSectionConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let mut ini = Ini::new();
        ini.load(path).map_err(IqmError::Config)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Config> {
        let general = GeneralConfig {
            instance_id: get(ini, "general", "instance-id")?,
            prefix: ini.get("general", "prefix"),
            suffix: ini.get("general", "suffix"),
            instance_type: ini.get("general", "instance-type").unwrap_or_else(|| "local".to_string()),
            info_period: ini
                .get("general", "info-period")
                .map(|p| p.parse())
                .transpose()
                .map_err(|_| IqmError::Config("general.info-period must be numeric".into()))?
                .unwrap_or(600),
        };

        let local = LocalConfig {
            host: ini.get("local", "host"),
            port: ini.get("local", "port").map(|p| p.parse()).transpose().map_err(|_| IqmError::Config("local.port must be numeric".into()))?,
            socket_path: ini.get("local", "socket-path"),
            username: ini.get("local", "username"),
            password: ini.get("local", "password"),
            client_id: get(ini, "local", "client_id")?,
            interqueue: get(ini, "local", "interqueue")?,
        };

        let neighbours = NeighboursConfig { client_id: get(ini, "neighbours", "client_id")? };

        let authority_type = get(ini, "authority", "type")?;
        let authority = match authority_type.as_str() {
            "file" => AuthorityConfig::File {
                path: get(ini, "authority", "path")?,
                reload: ini.get("authority", "reload").map(|r| r.parse()).transpose().map_err(|_| IqmError::Config("authority.reload must be numeric".into()))?,
            },
            "http" => AuthorityConfig::Http {
                uri: get(ini, "authority", "uri")?,
                reload: get(ini, "authority", "reload")?.parse().map_err(|_| IqmError::Config("authority.reload must be numeric".into()))?,
            },
            "mqtt" => AuthorityConfig::Mqtt {
                host: get(ini, "authority", "host")?,
                port: get(ini, "authority", "port")?.parse().map_err(|_| IqmError::Config("authority.port must be numeric".into()))?,
                topic: get(ini, "authority", "topic")?,
                client_id: ini.get("authority", "client_id"),
                username: ini.get("authority", "username"),
                password: ini.get("authority", "password"),
            },
            other => return Err(IqmError::UnknownAuthorityType(other.to_string())),
        };

        let telemetry = TelemetryConfig {
            endpoint: ini.get("telemetry", "endpoint"),
            authentication: ini.get("telemetry", "authentication"),
            username: ini.get("telemetry", "username"),
            password: ini.get("telemetry", "password"),
        };

        let mut filters = Vec::new();
        for section in ini.sections() {
            let Some(name) = section.strip_prefix("filter.") else { continue };
            filters.push(FilterSectionConfig {
                name: name.to_string(),
                in_prefix: ini.get(&section, "in_prefix"),
                in_regex: ini.get(&section, "in_regex"),
                out_prefix: ini.get(&section, "out_prefix"),
                out_regex: ini.get(&section, "out_regex"),
                drop: ini.get(&section, "drop").is_some(),
                retain: ini.get(&section, "retain"),
            });
        }

        Ok(Config { general, local, neighbours, authority, telemetry, filters })
    }
}

fn get(ini: &Ini, section: &str, key: &str) -> Result<String> {
    ini.get(section, key).ok_or_else(|| IqmError::Config(format!("missing [{section}] {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> Config {
        let mut ini = Ini::new();
        ini.read(text.to_string()).unwrap();
        Config::from_ini(&ini).unwrap()
    }

    const BASE: &str = "\
[general]
instance-id = rsu-1
prefix = v2x
[local]
client_id = local-1
interqueue = inQueue
[neighbours]
client_id = neighbour-1
";

    #[test]
    fn file_authority_is_parsed() {
        let config = load(&format!("{BASE}\n[authority]\ntype = file\npath = /etc/iqm/neighbours.ini\nreload = 30\n"));
        match config.authority {
            AuthorityConfig::File { path, reload } => {
                assert_eq!(path, "/etc/iqm/neighbours.ini");
                assert_eq!(reload, Some(30));
            }
            other => panic!("expected File authority, got {other:?}"),
        }
    }

    #[test]
    fn http_authority_requires_reload() {
        let config = load(&format!("{BASE}\n[authority]\ntype = http\nuri = http://directory/neighbours\nreload = 15\n"));
        match config.authority {
            AuthorityConfig::Http { uri, reload } => {
                assert_eq!(uri, "http://directory/neighbours");
                assert_eq!(reload, 15);
            }
            other => panic!("expected Http authority, got {other:?}"),
        }
    }

    #[test]
    fn unknown_authority_type_is_rejected() {
        let mut ini = Ini::new();
        ini.read(format!("{BASE}\n[authority]\ntype = carrier-pigeon\n")).unwrap();
        assert!(Config::from_ini(&ini).is_err());
    }

    #[test]
    fn filter_sections_are_collected_by_name() {
        let config = load(&format!(
            "{BASE}\n[authority]\ntype = file\npath = x\n\n[filter.drop-cpm]\nin_prefix = v2x/inQueue/cpm\ndrop = 1\n"
        ));
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.filters[0].name, "drop-cpm");
        assert!(config.filters[0].drop);
        assert_eq!(config.filters[0].in_prefix.as_deref(), Some("v2x/inQueue/cpm"));
    }
}
