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

//! Loading an [`Identity`] from a serializable configuration.

use bherror::traits::ErrorContext as _;
use serde::{Deserialize, Serialize};

use crate::{Identity, ResourceRegistry, Result};

/// Locations of the PEM material making up an [`Identity`].
///
/// Each field is a resource locator understood by a [`ResourceRegistry`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Certificates of the issuing authorities, ordered from the immediate issuer to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorities: Option<String>,
    /// The identity certificate; must hold exactly one certificate.
    pub certificate: String,
    /// The identity private key; must hold exactly one RSA key.
    pub key: String,
}

impl IdentityConfig {
    /// Load the configured material through `registry`.
    ///
    /// No check is made that the key matches the certificate or that the authorities issued it.
    pub fn build(&self, registry: &ResourceRegistry) -> Result<Identity> {
        let authorities = match &self.authorities {
            Some(locator) if !locator.is_empty() => registry.load_certificates(locator)?,
            _ => Vec::new(),
        };
        let certificate = registry.load_certificate(&self.certificate)?;
        let key = registry
            .load_key(&self.key)
            .ctx(|| format!("identity certificate [{}]", self.certificate))?;

        tracing::debug!(
            authorities = authorities.len(),
            certificate = %self.certificate,
            "identity loaded"
        );

        Ok(Identity::new(authorities, certificate, key))
    }
}
