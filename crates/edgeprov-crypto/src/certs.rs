//! Device certificate generation.
//!
//! Provides a local CA and a device certificate signed by it, for devices
//! whose database record does not carry pre-issued identity material.
//!
//! Requires the `certs` feature to be enabled.

use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};
use time::{Duration, OffsetDateTime};

use crate::error::CryptoError;

/// Validity of a locally issued identity when nothing else is configured.
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Backdating applied to `notBefore` for devices with a slightly slow clock.
const CLOCK_SKEW: Duration = Duration::minutes(5);

/// A local CA that issues identities for one organization.
pub struct LocalCa {
    params: CertificateParams,
    key_pair: KeyPair,
    organization: String,
    /// PEM-encoded CA certificate, written as the device's root CA.
    pub ca_cert_pem: String,
}

impl LocalCa {
    /// End of the CA validity window; device certificates never outlive it.
    pub const fn not_after(&self) -> OffsetDateTime {
        self.params.not_after
    }
}

/// PEM-encoded device identity.
pub struct DeviceCertBundle {
    pub cert_pem: String,
    /// PKCS#8.
    pub key_pem: String,
    pub ca_cert_pem: String,
    pub not_after: OffsetDateTime,
}

fn generation(e: &rcgen::Error) -> CryptoError {
    CryptoError::Generation(e.to_string())
}

/// URI subject alternative name carried by the certificate of `thing_name`.
pub fn thing_uri(thing_name: &str) -> String {
    format!("urn:edgeprov:thing:{thing_name}")
}

/// Generate a self-signed CA for `organization`, valid for `validity_days`.
pub fn generate_ca(organization: &str, validity_days: u32) -> Result<LocalCa, CryptoError> {
    if validity_days == 0 {
        return Err(CryptoError::Generation("validity must be at least one day".into()));
    }
    let now = OffsetDateTime::now_utc();

    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.not_before = now - CLOCK_SKEW;
    params.not_after = now + Duration::days(i64::from(validity_days));
    params
        .distinguished_name
        .push(DnType::CommonName, format!("{organization} Provisioning CA"));
    params
        .distinguished_name
        .push(DnType::OrganizationName, organization);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let key_pair = KeyPair::generate().map_err(|e| generation(&e))?;
    let ca_cert = params.self_signed(&key_pair).map_err(|e| generation(&e))?;

    Ok(LocalCa {
        ca_cert_pem: ca_cert.pem(),
        params,
        key_pair,
        organization: organization.to_string(),
    })
}

/// Issue the identity of `thing_name` under `ca`.
///
/// The thing name is both the Common Name and a `urn:edgeprov:thing:` URI SAN,
/// which is what the IoT data endpoint matches the client certificate on.
pub fn generate_device_cert(
    ca: &LocalCa,
    thing_name: &str,
) -> Result<DeviceCertBundle, CryptoError> {
    if thing_name.is_empty() {
        return Err(CryptoError::Generation("thing name must not be empty".into()));
    }
    let uri = Ia5String::try_from(thing_uri(thing_name)).map_err(|e| generation(&e))?;
    let issuer = Issuer::from_params(&ca.params, &ca.key_pair);

    let mut params = CertificateParams::default();
    params.not_before = ca.params.not_before;
    params.not_after = ca.params.not_after;
    params
        .distinguished_name
        .push(DnType::CommonName, thing_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, ca.organization.as_str());
    params.subject_alt_names = vec![SanType::URI(uri)];
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params.use_authority_key_identifier_extension = true;

    let device_key = KeyPair::generate().map_err(|e| generation(&e))?;
    let device_cert = params
        .signed_by(&device_key, &issuer)
        .map_err(|e| generation(&e))?;

    Ok(DeviceCertBundle {
        cert_pem: device_cert.pem(),
        key_pem: device_key.serialize_pem(),
        ca_cert_pem: ca.ca_cert_pem.clone(),
        not_after: params.not_after,
    })
}
