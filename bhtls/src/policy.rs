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

use std::str::FromStr;

use openssl::ssl::{SslContextBuilder, SslVerifyMode};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The server side rule deciding whether, and how, a TLS peer must present a certificate.
///
/// The policy is written and parsed as its variant name, e.g. `RequireAndVerifyClientCert`.
/// Parsing ignores ASCII case.
///
/// The default policy is [`ClientAuthPolicy::NoClientCert`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ClientAuthPolicy {
    /// No client certificate is requested.
    #[default]
    NoClientCert,
    /// A client certificate is requested but not required, and is not verified.
    RequestClientCert,
    /// A client certificate is required but is not verified.
    RequireAnyClientCert,
    /// A client certificate is not required, but is verified if given.
    VerifyClientCertIfGiven,
    /// A client certificate is required and must be verified.
    RequireAndVerifyClientCert,
}

impl ClientAuthPolicy {
    /// Every policy, from the most permissive to the most strict.
    pub const ALL: [Self; 5] = [
        Self::NoClientCert,
        Self::RequestClientCert,
        Self::RequireAnyClientCert,
        Self::VerifyClientCertIfGiven,
        Self::RequireAndVerifyClientCert,
    ];

    /// Returns the canonical name of the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoClientCert => "NoClientCert",
            Self::RequestClientCert => "RequestClientCert",
            Self::RequireAnyClientCert => "RequireAnyClientCert",
            Self::VerifyClientCertIfGiven => "VerifyClientCertIfGiven",
            Self::RequireAndVerifyClientCert => "RequireAndVerifyClientCert",
        }
    }

    /// The OpenSSL verify mode implementing this policy.
    pub fn verify_mode(&self) -> SslVerifyMode {
        match self {
            Self::NoClientCert => SslVerifyMode::NONE,
            Self::RequestClientCert | Self::VerifyClientCertIfGiven => SslVerifyMode::PEER,
            Self::RequireAnyClientCert | Self::RequireAndVerifyClientCert => {
                SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
            }
        }
    }

    /// Whether a presented client certificate is checked against the trusted authorities.
    pub fn verifies_certificate(&self) -> bool {
        matches!(
            self,
            Self::VerifyClientCertIfGiven | Self::RequireAndVerifyClientCert
        )
    }

    /// Apply the policy to a server side context.
    pub(crate) fn configure(&self, builder: &mut SslContextBuilder) {
        if self.verifies_certificate() || *self == Self::NoClientCert {
            builder.set_verify(self.verify_mode());
        } else {
            // the certificate is requested only to be handed over to the application
            builder.set_verify_callback(self.verify_mode(), |_, _| true);
        }
    }
}

impl FromStr for ClientAuthPolicy {
    type Err = bherror::Error<Error>;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| bherror::Error::root(Error::UnknownPolicy(value.to_owned())))
    }
}

impl TryFrom<String> for ClientAuthPolicy {
    type Error = bherror::Error<Error>;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ClientAuthPolicy> for String {
    fn from(policy: ClientAuthPolicy) -> Self {
        policy.as_str().to_owned()
    }
}

impl std::fmt::Display for ClientAuthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_parse_display_round_trip() {
        for policy in ClientAuthPolicy::ALL {
            assert_eq!(policy.to_string().parse::<ClientAuthPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_parse_ignores_case() {
        assert_eq!(
            "requireandverifyclientcert"
                .parse::<ClientAuthPolicy>()
                .unwrap(),
            ClientAuthPolicy::RequireAndVerifyClientCert
        );
        assert_eq!(
            "NOCLIENTCERT".parse::<ClientAuthPolicy>().unwrap(),
            ClientAuthPolicy::NoClientCert
        );
    }

    #[test]
    fn test_parse_unknown_policy() {
        for value in ["", "VerifyClientCert", " NoClientCert", "RequireClientCert"] {
            let err = value.parse::<ClientAuthPolicy>().unwrap_err();
            assert_matches!(err.error, Error::UnknownPolicy(name) if name == value);
        }
    }

    #[test]
    fn test_serde() {
        assert_eq!(
            serde_json::to_value(ClientAuthPolicy::VerifyClientCertIfGiven).unwrap(),
            serde_json::json!("VerifyClientCertIfGiven")
        );
        assert_eq!(
            serde_json::from_value::<ClientAuthPolicy>(serde_json::json!("requestclientcert"))
                .unwrap(),
            ClientAuthPolicy::RequestClientCert
        );
        assert!(serde_json::from_value::<ClientAuthPolicy>(serde_json::json!("Always")).is_err());
    }

    #[test]
    fn test_default() {
        assert_eq!(ClientAuthPolicy::default(), ClientAuthPolicy::NoClientCert);
    }

    #[test]
    fn test_verify_mode() {
        let peer = SslVerifyMode::PEER;
        let required = SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT;

        assert_eq!(ClientAuthPolicy::NoClientCert.verify_mode(), SslVerifyMode::NONE);
        assert_eq!(ClientAuthPolicy::RequestClientCert.verify_mode(), peer);
        assert_eq!(ClientAuthPolicy::RequireAnyClientCert.verify_mode(), required);
        assert_eq!(ClientAuthPolicy::VerifyClientCertIfGiven.verify_mode(), peer);
        assert_eq!(
            ClientAuthPolicy::RequireAndVerifyClientCert.verify_mode(),
            required
        );

        assert!(!ClientAuthPolicy::RequireAnyClientCert.verifies_certificate());
        assert!(ClientAuthPolicy::VerifyClientCertIfGiven.verifies_certificate());
    }
}
