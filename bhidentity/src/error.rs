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
///
/// Variants carrying a [`String`] hold the template subject or the resource locator the failure
/// relates to.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum Error {
    /// Error when the keypair for a new identity could not be generated.
    #[strum(to_string = "Key generation failed for [{0}]")]
    KeyGeneration(String),
    /// Error when the certificate could not be constructed or signed.
    #[strum(to_string = "Signing failed for [{0}]")]
    Signing(String),
    /// Error when a PEM block does not contain the expected DER structure.
    ///
    /// Holds the resource locator when raised by a loader, and the offending PEM block otherwise.
    #[strum(to_string = "Malformed PEM material in [{0}]")]
    Parse(String),
    /// Error when no entry was found where exactly one is required.
    #[strum(to_string = "No material defined in [{0}]")]
    MissingMaterial(String),
    /// Error when several entries were found where exactly one is required.
    #[strum(to_string = "Multiple materials defined in [{0}]")]
    AmbiguousMaterial(String),
    /// Error when a certificate or key could not be PEM encoded.
    #[strum(to_string = "PEM encoding failed")]
    Encoding,
    /// Error when a resource could not be read.
    #[strum(to_string = "Cannot read resource [{0}]")]
    Resource(String),
    /// Error when no resolver is registered for the scheme of a resource locator.
    #[strum(to_string = "Unsupported resource scheme [{0}]")]
    UnsupportedScheme(String),
    /// Error when a certificate chain fails path validation.
    #[strum(to_string = "Certificate verification failed")]
    Verification,
}

impl bherror::BhError for Error {}

/// The [`bherror::Result`] type with the error type of
/// [`bhidentity::Error`](Error), used throughout this crate.
pub type Result<T> = bherror::Result<T, Error>;
