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

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! This crate assembles the trust material of a TLS endpoint: the certificate authorities it
//! trusts, the credential it presents, and its policy towards client certificates.
//!
//! # Details
//!
//! The primary API this crate offers is the [`TlsTrust`] struct, which produces OpenSSL
//! [`SslAcceptor`](openssl::ssl::SslAcceptor) and [`SslConnector`](openssl::ssl::SslConnector)
//! contexts.  It is either assembled directly with [`TlsTrust::build`], or loaded from a
//! [`TrustConfiguration`].
//!
//! Certificates and keys are issued and loaded with the [`bhidentity`] crate.
//!
//! # Examples
//!
//! ```no_run
//! let config = bhtls::TrustConfiguration {
//!     authorities: Some(vec!["file:///etc/tls/ca.pem".to_owned()]),
//!     certificate: "file:///etc/tls/server.pem".to_owned(),
//!     key: "file:///etc/tls/server.key".to_owned(),
//!     authentication: bhtls::ClientAuthPolicy::RequireAndVerifyClientCert,
//!     ..Default::default()
//! };
//!
//! let trust = config
//!     .build(&bhidentity::ResourceRegistry::with_defaults())
//!     .expect("trust configuration");
//!
//! let acceptor = trust.ssl_acceptor().expect("server context");
//! ```

mod config;
mod error;
mod policy;
mod trust;

pub use config::*;
pub use error::*;
pub use policy::*;
pub use trust::*;
