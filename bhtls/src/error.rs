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

/// Error returned by the crate API.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum Error {
    /// Error when a client authentication policy name is not recognized.
    #[strum(to_string = "Unknown client authentication policy [{0}]")]
    UnknownPolicy(String),
    /// Error when a required certificate or key was not configured or not found.
    #[strum(to_string = "No material defined in [{0}]")]
    MissingMaterial(String),
    /// Error when several certificates or keys were found where exactly one is required.
    #[strum(to_string = "Multiple materials defined in [{0}]")]
    AmbiguousMaterial(String),
    /// Error when PEM material could not be read or parsed.
    #[strum(to_string = "Invalid material in [{0}]")]
    Material(String),
    /// Error when the TLS backend rejected the configuration.
    #[strum(to_string = "TLS backend error")]
    Backend,
    /// Error when a peer certificate chain is not trusted.
    #[strum(to_string = "Certificate verification failed")]
    Verification,
}

impl bherror::BhError for Error {}

impl Error {
    /// Translate a material loading error of `locator` into this crate's error.
    pub(crate) fn from_material(error: &bhidentity::Error, locator: &str) -> Self {
        match error {
            bhidentity::Error::MissingMaterial(resource) => Self::MissingMaterial(resource.clone()),
            bhidentity::Error::AmbiguousMaterial(resource) => {
                Self::AmbiguousMaterial(resource.clone())
            }
            _ => Self::Material(locator.to_owned()),
        }
    }
}

/// The [`bherror::Result`] type with the error type of
/// [`bhtls::Error`](Error), used throughout this crate.
pub type Result<T> = bherror::Result<T, Error>;
