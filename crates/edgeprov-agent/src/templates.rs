//! Runtime configuration document template.

use std::borrow::Cow;
use std::fmt::Write;

use crate::device::DeviceRecord;

/// Nucleus component name in the `services` section.
pub const NUCLEUS_COMPONENT: &str = "aws.greengrass.Nucleus";

/// Resolved values rendered into `config.yaml`.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfigValues<'a> {
    pub record: &'a DeviceRecord,
    pub certificate_path: &'a str,
    pub private_key_path: &'a str,
    pub root_ca_path: &'a str,
    pub root_path: &'a str,
    pub nucleus_version: &'a str,
}

/// Render the runtime configuration YAML.
pub fn runtime_config_yaml(values: &RuntimeConfigValues<'_>) -> String {
    let record = values.record;
    let mut out = format!(
        r"---
system:
  certificateFilePath: {cert}
  privateKeyPath: {key}
  rootCaPath: {ca}
  rootpath: {root}
  thingName: {thing}
services:
  {nucleus}:
    componentType: NUCLEUS
    version: {version}
    configuration:
      awsRegion: {region}
      iotRoleAlias: {role_alias}
      iotDataEndpoint: {endpoint}
",
        cert = yaml_scalar(values.certificate_path),
        key = yaml_scalar(values.private_key_path),
        ca = yaml_scalar(values.root_ca_path),
        root = yaml_scalar(values.root_path),
        thing = yaml_scalar(&record.thing_name),
        nucleus = NUCLEUS_COMPONENT,
        version = yaml_scalar(values.nucleus_version),
        region = yaml_scalar(&record.aws_region),
        role_alias = yaml_scalar(&record.role_alias),
        endpoint = yaml_scalar(&record.iot_endpoint.to_string()),
    );

    // `write!` into a String cannot fail.
    if let Some(cred) = record.role_alias_endpoint.as_deref() {
        let _ = writeln!(out, "      iotCredEndpoint: {}", yaml_scalar(cred));
    }
    if let Some(port) = record.mqtt_port {
        let _ = writeln!(out, "      mqtt:\n        port: {port}");
    }
    if let Some(proxy) = record.proxy_url.as_deref() {
        let _ = writeln!(
            out,
            "      networkProxy:\n        proxy:\n          url: {}",
            yaml_scalar(proxy)
        );
    }
    out.push_str(
        "      logging:\n        level: INFO\n        fileSizeKB: 1024\n        \
         totalLogsSizeKB: 25600\n        format: JSON\n",
    );
    if let Some(group) = record.deployment_group.as_deref() {
        let _ = writeln!(
            out,
            "      deploymentPollingFrequencySeconds: 15\n      deploymentGroup: {}",
            yaml_scalar(group)
        );
    }
    for component in &record.initial_components {
        let _ = writeln!(out, "  {}: {{}}", yaml_scalar(component));
    }
    out
}

/// Emit `value` as a plain YAML scalar when that reads back as the same
/// string, otherwise as a double-quoted one.
pub fn yaml_scalar(value: &str) -> Cow<'_, str> {
    if is_plain_safe(value) {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(quote(value))
    }
}

fn is_plain_safe(value: &str) -> bool {
    const RESERVED: &[&str] = &[
        "~", "null", "true", "false", "yes", "no", "on", "off", "y", "n",
    ];
    let Some(first) = value.chars().next() else {
        return false;
    };
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | '+'))
        && !matches!(first, '-' | ':' | '@')
        && !value.ends_with(':')
        && !RESERVED.contains(&value.to_ascii_lowercase().as_str())
        && value.parse::<f64>().is_err()
        && !value.starts_with("0x")
        && !value.starts_with("0o")
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Inverse of [`yaml_scalar`] for values this module wrote.
pub fn parse_scalar(raw: &str) -> String {
    let raw = raw.trim();
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
    else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Some(c) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(c);
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
