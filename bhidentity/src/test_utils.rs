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

//! Templates for building throwaway certificate hierarchies in tests.
//!
//! Keys are [`TEST_KEY_BITS`] long, so that generating a full chain stays fast.
//!
//! Do NOT use these templates for production code, but only tests.

use chrono::{TimeDelta, Utc};

use crate::{ExtendedKeyUsage, KeyUsage, SerialNumber, SubjectName, Template};

/// RSA modulus size used by every template of this module.
pub const TEST_KEY_BITS: u32 = 2048;

fn base_template(common_name: &str, lifetime: TimeDelta) -> Template {
    let now = Utc::now();

    Template {
        subject: SubjectName {
            organization: vec!["TBTL".to_owned()],
            ..SubjectName::new(common_name)
        },
        not_before: now - TimeDelta::hours(1),
        not_after: now + lifetime,
        serial_number: Some(SerialNumber::random().expect("random serial number")),
        basic_constraints_valid: true,
        key_bits: TEST_KEY_BITS,
        ..Template::default()
    }
}

fn authority_template(common_name: &str, lifetime: TimeDelta) -> Template {
    Template {
        is_ca: true,
        key_usage: vec![
            KeyUsage::KeyCertSign,
            KeyUsage::CrlSign,
            KeyUsage::DigitalSignature,
        ],
        ..base_template(common_name, lifetime)
    }
}

/// A self-signable root authority valid for ten years.
pub fn root_template(common_name: &str) -> Template {
    authority_template(common_name, TimeDelta::days(3650))
}

/// An intermediate authority valid for five years, allowed to issue only leaf certificates.
pub fn intermediate_template(common_name: &str) -> Template {
    Template {
        max_path_len: Some(0),
        ..authority_template(common_name, TimeDelta::days(1825))
    }
}

/// A leaf valid for one year, usable for both TLS servers and clients, with `common_name` as its
/// only DNS name.
pub fn leaf_template(common_name: &str) -> Template {
    Template {
        key_usage: vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment],
        extended_key_usage: vec![ExtendedKeyUsage::ServerAuth, ExtendedKeyUsage::ClientAuth],
        dns_names: vec![common_name.to_owned()],
        ..base_template(common_name, TimeDelta::days(365))
    }
}
