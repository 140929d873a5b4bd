//! The device record read from the provisioning database.

use std::fmt;
use std::str::FromStr;

/// IoT data endpoint as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Port used when the stored endpoint carries none.
    pub const DEFAULT_PORT: u16 = 8443;

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        if value.is_empty() {
            return Err("endpoint is empty".into());
        }
        if value.contains("://") || value.contains('/') || value.contains(char::is_whitespace) {
            return Err(format!("endpoint `{value}` must be host[:port]"));
        }

        // Bracketed IPv6 literal: [::1]:8443
        let (host, port) = if let Some(rest) = value.strip_prefix('[') {
            let (addr, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("endpoint `{value}` has an unterminated IPv6 literal"))?;
            let port = match tail {
                "" => None,
                t => Some(
                    t.strip_prefix(':')
                        .ok_or_else(|| format!("endpoint `{value}` is malformed"))?,
                ),
            };
            (format!("[{addr}]"), port)
        } else {
            match value.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), Some(port)),
                None => (value.to_string(), None),
            }
        };

        if host.is_empty() || host == "[]" || (host.contains(':') && !host.starts_with('[')) {
            return Err(format!("endpoint `{value}` has an invalid host"));
        }
        let port = match port {
            None => Self::DEFAULT_PORT,
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(format!("endpoint `{value}` has an invalid port")),
                Ok(n) => n,
            },
        };
        Ok(Self { host, port })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One row of `device_config`, validated.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub thing_name: String,
    pub iot_endpoint: Endpoint,
    pub aws_region: String,
    pub role_alias: String,
    pub role_alias_endpoint: Option<String>,
    /// Root CA as inline PEM or as a path to a PEM file.
    pub root_ca: Option<String>,
    pub certificate_pem: Option<String>,
    pub private_key_pem: Option<String>,
    pub nucleus_version: Option<String>,
    pub deployment_group: Option<String>,
    pub initial_components: Vec<String>,
    pub proxy_url: Option<String>,
    pub mqtt_port: Option<u16>,
    pub created_at: Option<String>,
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("device_id", &self.device_id)
            .field("thing_name", &self.thing_name)
            .field("iot_endpoint", &self.iot_endpoint)
            .field("aws_region", &self.aws_region)
            .field("role_alias", &self.role_alias)
            .field("has_certificate", &self.certificate_pem.is_some())
            .field("has_private_key", &self.private_key_pem.is_some())
            .field("nucleus_version", &self.nucleus_version)
            .finish_non_exhaustive()
    }
}

impl DeviceRecord {
    /// Check the fields the rest of the run relies on.
    pub fn validate(&self) -> Result<(), String> {
        validate_thing_name(&self.thing_name)?;
        if self.aws_region.trim().is_empty() {
            return Err("aws_region is empty".into());
        }
        if self.role_alias.trim().is_empty() {
            return Err("role_alias is empty".into());
        }
        if self.certificate_pem.is_some() != self.private_key_pem.is_some() {
            return Err("certificate_pem and private_key_pem must be provided together".into());
        }
        Ok(())
    }

    /// Pre-issued certificate and key, when the record carries both.
    pub fn pre_issued(&self) -> Option<(&str, &str)> {
        self.certificate_pem
            .as_deref()
            .zip(self.private_key_pem.as_deref())
    }

    /// Runtime version to deploy, falling back to `default`.
    pub fn nucleus_version_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.nucleus_version.as_deref().unwrap_or(default)
    }
}

/// Thing names end up in file names, so path syntax is refused outright.
pub fn validate_thing_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("thing_name is empty".into());
    }
    if name.len() > 128 {
        return Err("thing_name exceeds 128 characters".into());
    }
    if name.starts_with('.') {
        return Err(format!("thing_name `{name}` must not start with '.'"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')))
    {
        return Err(format!("thing_name `{name}` contains invalid character {bad:?}"));
    }
    Ok(())
}

/// Split the stored comma-separated component list.
pub fn parse_component_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_record() -> DeviceRecord {
        DeviceRecord {
            device_id: "aabbccddeeff".into(),
            thing_name: "edge-01".into(),
            iot_endpoint: "iot.example".parse().unwrap(),
            aws_region: "us-east-1".into(),
            role_alias: "EdgeTokenExchangeRoleAlias".into(),
            role_alias_endpoint: None,
            root_ca: None,
            certificate_pem: None,
            private_key_pem: None,
            nucleus_version: None,
            deployment_group: None,
            initial_components: Vec::new(),
            proxy_url: None,
            mqtt_port: None,
            created_at: None,
        }
    }

    #[test]
    fn endpoint_without_port_gets_default() {
        let ep: Endpoint = "iot.example".parse().unwrap();
        assert_eq!(ep.host(), "iot.example");
        assert_eq!(ep.port(), 8443);
        assert_eq!(ep.to_string(), "iot.example:8443");
    }

    #[test]
    fn endpoint_keeps_explicit_port() {
        let ep: Endpoint = " a1b2-ats.iot.eu-west-1.amazonaws.com:443 ".parse().unwrap();
        assert_eq!(ep.port(), 443);
        assert_eq!(ep.to_string(), "a1b2-ats.iot.eu-west-1.amazonaws.com:443");
    }

    #[test]
    fn endpoint_accepts_ipv6_literal() {
        let ep: Endpoint = "[::1]:9000".parse().unwrap();
        assert_eq!(ep.to_string(), "[::1]:9000");
        let ep: Endpoint = "[fe80::1]".parse().unwrap();
        assert_eq!(ep.port(), 8443);
    }

    #[test]
    fn endpoint_rejects_garbage() {
        for bad in [
            "",
            "   ",
            ":8443",
            "iot.example:",
            "iot.example:0",
            "iot.example:99999",
            "https://iot.example",
            "iot.example/path",
            "iot example",
            "::1",
            "[::1",
        ] {
            assert!(bad.parse::<Endpoint>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn thing_name_rules() {
        validate_thing_name("edge-01").unwrap();
        validate_thing_name("site:line_3.cell-4").unwrap();
        assert!(validate_thing_name("").is_err());
        assert!(validate_thing_name("../etc").is_err());
        assert!(validate_thing_name("a/b").is_err());
        assert!(validate_thing_name(".hidden").is_err());
        assert!(validate_thing_name(&"x".repeat(129)).is_err());
    }

    #[test]
    fn record_validation() {
        sample_record().validate().unwrap();

        let mut record = sample_record();
        record.aws_region = " ".into();
        assert!(record.validate().is_err());

        let mut record = sample_record();
        record.certificate_pem = Some("cert".into());
        assert!(record.validate().unwrap_err().contains("together"));
    }

    #[test]
    fn pre_issued_needs_both_halves() {
        let mut record = sample_record();
        assert!(record.pre_issued().is_none());
        record.certificate_pem = Some("c".into());
        record.private_key_pem = Some("k".into());
        assert_eq!(record.pre_issued(), Some(("c", "k")));
    }

    #[test]
    fn debug_output_hides_key_material() {
        let mut record = sample_record();
        record.private_key_pem = Some("SECRET-KEY".into());
        let rendered = format!("{record:?}");
        assert!(!rendered.contains("SECRET-KEY"));
        assert!(rendered.contains("has_private_key: true"));
    }

    #[test]
    fn component_list_parsing() {
        assert_eq!(
            parse_component_list("aws.greengrass.Cli, com.example.App,,"),
            vec!["aws.greengrass.Cli".to_string(), "com.example.App".to_string()]
        );
        assert!(parse_component_list(" ").is_empty());
    }
}
