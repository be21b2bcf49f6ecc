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

//! This crate provides functions and types for issuing X.509 identities (a certificate together
//! with its private key and issuing authorities), and for moving them in and out of PEM.
//!
//! # Details
//!
//! The primary API this crate offers is the [`Identity`] struct, created either self-signed or
//! issued by another [`Identity`] from a [`Template`].
//!
//! PEM material is produced with the `encode_*` functions and consumed with the `decode_*`
//! functions, or loaded directly from resource locators through a [`ResourceRegistry`].
//!
//! # Examples
//!
//! ## Issuing a Chain
//!
//! ```no_run
//! use bhidentity::{Identity, SerialNumber, SubjectName, Template};
//!
//! let now = chrono::Utc::now();
//! let root = Identity::self_signed(&Template {
//!     subject: SubjectName::new("Example Root"),
//!     not_before: now,
//!     not_after: now + chrono::TimeDelta::days(3650),
//!     serial_number: Some(SerialNumber::random().expect("random serial")),
//!     basic_constraints_valid: true,
//!     is_ca: true,
//!     key_usage: vec![bhidentity::KeyUsage::KeyCertSign],
//!     ..Template::default()
//! })
//! .expect("self-signed root");
//!
//! let server = root
//!     .issue(&Template {
//!         subject: SubjectName::new("server.example.com"),
//!         not_before: now,
//!         not_after: now + chrono::TimeDelta::days(365),
//!         serial_number: Some(SerialNumber::random().expect("random serial")),
//!         dns_names: vec!["server.example.com".to_owned()],
//!         ..Template::default()
//!     })
//!     .expect("issued server identity");
//!
//! server
//!     .verify(&[root.certificate().clone()], Some("server.example.com"))
//!     .expect("valid chain");
//! ```
//!
//! ## Loading From Configuration
//!
//! ```no_run
//! let config = bhidentity::IdentityConfig {
//!     authorities: Some("file:///etc/tls/ca.pem".to_owned()),
//!     certificate: "/etc/tls/server.pem".to_owned(),
//!     key: "base64:///LS0tLS1CRUdJTi...".to_owned(),
//! };
//!
//! let identity = config
//!     .build(&bhidentity::ResourceRegistry::with_defaults())
//!     .expect("identity");
//! ```

mod bundle;
mod config;
mod encoding;
mod error;
mod extension;
mod identity;
mod resource;
mod template;
#[cfg(any(feature = "test-utils", test))]
pub mod test_utils;
mod verify;

pub use bundle::*;
pub use config::*;
pub use encoding::*;
pub use error::*;
pub use identity::*;
pub use resource::*;
pub use template::*;
pub use verify::*;
