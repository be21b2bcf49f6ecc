// Copyright (C) 2020-2025  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use bherror::traits::{ErrorContext as _, PropagateError as _};
use bhidentity::ResourceRegistry;
use serde::{Deserialize, Serialize};

use crate::{CertificatePool, ClientAuthPolicy, Credential, Error, Result, TlsTrust};

/// Serializable description of a [`TlsTrust`].
///
/// Material is referenced by resource locators, resolved through a [`ResourceRegistry`] when the
/// configuration is built.  Empty strings are treated the same as missing fields.
///
/// ```
/// let config: bhtls::TrustConfiguration = serde_json::from_str(
///     r#"{
///         "authorities": ["file:///etc/tls/ca.pem"],
///         "certificate": "file:///etc/tls/server.pem",
///         "key": "file:///etc/tls/server.key",
///         "authentication": "RequireAndVerifyClientCert"
///     }"#,
/// )
/// .unwrap();
///
/// assert_eq!(
///     config.authentication,
///     bhtls::ClientAuthPolicy::RequireAndVerifyClientCert
/// );
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustConfiguration {
    /// Bundles of trusted certificate authorities.
    ///
    /// When missing, the system trust roots are used.  When present, exactly the certificates
    /// found in the bundles are trusted, which may be none at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorities: Option<Vec<String>>,
    /// The local certificate, given together with [`key`](Self::key).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate: String,
    /// The local private key, given together with [`certificate`](Self::certificate).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    /// How a server treats client certificates.
    #[serde(default)]
    pub authentication: ClientAuthPolicy,
    /// The host name the server certificate is expected to be valid for.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
}

impl TrustConfiguration {
    /// Resolve and load all configured material, and assemble the [`TlsTrust`].
    ///
    /// Fails if any referenced material cannot be loaded, or if only one of the certificate and
    /// the key is configured.
    pub fn build(&self, registry: &ResourceRegistry) -> Result<TlsTrust> {
        let pool = match &self.authorities {
            None => CertificatePool::System,
            Some(locators) => CertificatePool::Explicit(load_authorities(registry, locators)?),
        };

        let credential = match (self.certificate.is_empty(), self.key.is_empty()) {
            (true, true) => None,
            (false, false) => Some(self.load_credential(registry)?),
            (false, true) => {
                return Err(bherror::Error::root(Error::MissingMaterial("key".to_owned())))
                    .ctx(|| format!("certificate [{}] configured without a key", self.certificate));
            }
            (true, false) => {
                return Err(bherror::Error::root(Error::MissingMaterial(
                    "certificate".to_owned(),
                )))
                .ctx(|| format!("key [{}] configured without a certificate", self.key));
            }
        };

        let trust = TlsTrust::build(pool, credential, self.authentication);

        Ok(match self.server.as_str() {
            "" => trust,
            server => trust.with_server_name(server),
        })
    }

    fn load_credential(&self, registry: &ResourceRegistry) -> Result<Credential> {
        let certificate = registry
            .load_certificate(&self.certificate)
            .match_err(|error| Error::from_material(error, &self.certificate))?;
        let key = registry
            .load_key(&self.key)
            .match_err(|error| Error::from_material(error, &self.key))?;

        Ok(Credential::new(certificate, key))
    }
}

fn load_authorities(
    registry: &ResourceRegistry,
    locators: &[String],
) -> Result<Vec<openssl::x509::X509>> {
    let mut authorities = Vec::new();

    for locator in locators.iter().filter(|locator| !locator.is_empty()) {
        let certificates = registry
            .load_certificates(locator)
            .match_err(|error| Error::from_material(error, locator))?;

        if certificates.is_empty() {
            tracing::debug!(%locator, "authority bundle holds no certificates");
        }
        authorities.extend(certificates);
    }

    Ok(authorities)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bhidentity::{encode_certificate, encode_key, test_utils, Identity};
    use openssl::base64;

    use super::*;

    fn base64_locator(pem: &[u8]) -> String {
        format!("base64:///{}", base64::encode_block(pem))
    }

    fn certificate_locator(identity: &Identity) -> String {
        base64_locator(&encode_certificate(Some(identity.certificate().as_ref())).unwrap())
    }

    fn key_locator(identity: &Identity) -> String {
        base64_locator(&encode_key(Some(identity.key().as_ref())).unwrap())
    }

    #[test]
    fn test_missing_authorities_use_system_pool() {
        let trust = TrustConfiguration::default()
            .build(&ResourceRegistry::with_defaults())
            .unwrap();

        assert_matches!(trust.pool(), CertificatePool::System);
        assert!(trust.credential().is_none());
        assert_eq!(trust.policy(), ClientAuthPolicy::NoClientCert);
    }

    #[test]
    fn test_empty_authorities_trust_nothing() {
        let registry = ResourceRegistry::with_defaults();

        for authorities in [vec![], vec!["".to_owned()], vec!["base64:///".to_owned()]] {
            let trust = TrustConfiguration {
                authorities: Some(authorities),
                ..Default::default()
            }
            .build(&registry)
            .unwrap();

            assert_matches!(
                trust.pool(),
                CertificatePool::Explicit(authorities) if authorities.is_empty()
            );
        }
    }

    #[test]
    fn test_build_full_configuration() {
        let root = Identity::self_signed(&test_utils::root_template("root")).unwrap();
        let other_root = Identity::self_signed(&test_utils::root_template("other")).unwrap();
        let server = root.issue(&test_utils::leaf_template("localhost")).unwrap();

        let config = TrustConfiguration {
            authorities: Some(vec![
                certificate_locator(&root),
                certificate_locator(&other_root),
            ]),
            certificate: certificate_locator(&server),
            key: key_locator(&server),
            authentication: ClientAuthPolicy::RequireAndVerifyClientCert,
            server: "localhost".to_owned(),
        };

        let trust = config.build(&ResourceRegistry::with_defaults()).unwrap();

        assert_matches!(
            trust.pool(),
            CertificatePool::Explicit(authorities) if authorities.len() == 2
        );
        assert_eq!(trust.policy(), ClientAuthPolicy::RequireAndVerifyClientCert);
        assert_eq!(trust.server_name(), Some("localhost"));

        let credential = trust.credential().unwrap();
        assert!(credential.key.public_eq(server.key()));

        trust
            .verify(server.certificate(), &[], trust.server_name())
            .unwrap();
        trust.ssl_acceptor().unwrap();
        trust.ssl_connector().unwrap();
    }

    #[test]
    fn test_credential_requires_certificate_and_key() {
        let identity = Identity::self_signed(&test_utils::leaf_template("leaf")).unwrap();
        let registry = ResourceRegistry::with_defaults();

        let err = TrustConfiguration {
            certificate: certificate_locator(&identity),
            ..Default::default()
        }
        .build(&registry)
        .unwrap_err();
        assert_matches!(err.error, Error::MissingMaterial(field) if field == "key");

        let err = TrustConfiguration {
            key: key_locator(&identity),
            ..Default::default()
        }
        .build(&registry)
        .unwrap_err();
        assert_matches!(err.error, Error::MissingMaterial(field) if field == "certificate");
    }

    #[test]
    fn test_credential_cardinality() {
        let first = Identity::self_signed(&test_utils::leaf_template("first")).unwrap();
        let second = Identity::self_signed(&test_utils::leaf_template("second")).unwrap();
        let registry = ResourceRegistry::with_defaults();

        let both = [
            encode_certificate(Some(first.certificate().as_ref())).unwrap(),
            encode_certificate(Some(second.certificate().as_ref())).unwrap(),
        ]
        .concat();
        let both = base64_locator(&both);

        let err = TrustConfiguration {
            certificate: both.clone(),
            key: key_locator(&first),
            ..Default::default()
        }
        .build(&registry)
        .unwrap_err();
        assert_matches!(err.error, Error::AmbiguousMaterial(locator) if locator == both);

        let err = TrustConfiguration {
            certificate: "base64:///".to_owned(),
            key: key_locator(&first),
            ..Default::default()
        }
        .build(&registry)
        .unwrap_err();
        assert_matches!(err.error, Error::MissingMaterial(locator) if locator == "base64:///");
    }

    #[test]
    fn test_unreadable_material() {
        let registry = ResourceRegistry::with_defaults();

        let err = TrustConfiguration {
            authorities: Some(vec!["https://example.com/ca.pem".to_owned()]),
            ..Default::default()
        }
        .build(&registry)
        .unwrap_err();
        assert_matches!(
            err.error,
            Error::Material(locator) if locator == "https://example.com/ca.pem"
        );

        let garbage =
            base64_locator(b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n");
        let err = TrustConfiguration {
            authorities: Some(vec![garbage.clone()]),
            ..Default::default()
        }
        .build(&registry)
        .unwrap_err();
        assert_matches!(err.error, Error::Material(locator) if locator == garbage);
    }

    #[test]
    fn test_deserialize() {
        let config: TrustConfiguration = serde_json::from_value(serde_json::json!({
            "authorities": [],
            "certificate": "/etc/tls/cert.pem",
            "key": "/etc/tls/key.pem",
            "authentication": "verifyclientcertifgiven",
            "server": "example.com",
        }))
        .unwrap();

        assert_eq!(
            config,
            TrustConfiguration {
                authorities: Some(Vec::new()),
                certificate: "/etc/tls/cert.pem".to_owned(),
                key: "/etc/tls/key.pem".to_owned(),
                authentication: ClientAuthPolicy::VerifyClientCertIfGiven,
                server: "example.com".to_owned(),
            }
        );

        let config: TrustConfiguration = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(config, TrustConfiguration::default());
        assert_eq!(config.authorities, None);

        assert!(serde_json::from_value::<TrustConfiguration>(serde_json::json!({
            "authentication": "Sometimes",
        }))
        .is_err());
    }

    #[test]
    fn test_serialize_skips_unset_fields() {
        let config = TrustConfiguration {
            authorities: Some(Vec::new()),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            serde_json::json!({
                "authorities": [],
                "authentication": "NoClientCert",
            })
        );
    }
}
