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

//! DER encoding of the certificate extensions OpenSSL has no builders for.
//!
//! Each function returns the extension as an [`Extension`], ready to be turned into an OpenSSL
//! extension by `Template::openssl_extension`.

use bherror::traits::ErrorContext as _;
use yasna::{models::ObjectIdentifier, DERWriter, Tag};

use crate::{Extension, IpRange, Result, Template};

const SUBJECT_KEY_IDENTIFIER: &str = "2.5.29.14";
const NAME_CONSTRAINTS: &str = "2.5.29.30";
const CRL_DISTRIBUTION_POINTS: &str = "2.5.29.31";
const CERTIFICATE_POLICIES: &str = "2.5.29.32";
const AUTHORITY_KEY_IDENTIFIER: &str = "2.5.29.35";
const AUTHORITY_INFORMATION_ACCESS: &str = "1.3.6.1.5.5.7.1.1";

const ACCESS_METHOD_OCSP: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1];
const ACCESS_METHOD_CA_ISSUERS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 2];

/// The `GeneralName` alternatives used here.
///
/// See [RFC 5280 - section 4.2.1.6](https://datatracker.ietf.org/doc/html/rfc5280#section-4.2.1.6)
enum GeneralName<'a> {
    Email(&'a str),
    Dns(&'a str),
    Uri(&'a str),
    IpRange(Vec<u8>),
}

impl GeneralName<'_> {
    fn write(&self, writer: DERWriter) {
        match self {
            Self::Email(email) => {
                writer.write_tagged_implicit(Tag::context(1), |w| w.write_ia5_string(email))
            }
            Self::Dns(dns) => {
                writer.write_tagged_implicit(Tag::context(2), |w| w.write_ia5_string(dns))
            }
            Self::Uri(uri) => {
                writer.write_tagged_implicit(Tag::context(6), |w| w.write_ia5_string(uri))
            }
            Self::IpRange(range) => {
                writer.write_tagged_implicit(Tag::context(7), |w| w.write_bytes(range))
            }
        }
    }
}

/// `SubjectKeyIdentifier ::= KeyIdentifier`
pub(crate) fn subject_key_identifier(key_id: &[u8]) -> Extension {
    Extension {
        oid: SUBJECT_KEY_IDENTIFIER.to_owned(),
        critical: false,
        value: yasna::construct_der(|writer| writer.write_bytes(key_id)),
    }
}

/// `AuthorityKeyIdentifier` holding only the `keyIdentifier`.
pub(crate) fn authority_key_identifier(key_id: &[u8]) -> Extension {
    Extension {
        oid: AUTHORITY_KEY_IDENTIFIER.to_owned(),
        critical: false,
        value: yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer
                    .next()
                    .write_tagged_implicit(Tag::context(0), |writer| writer.write_bytes(key_id));
            })
        }),
    }
}

pub(crate) fn name_constraints(template: &Template) -> Result<Option<Extension>> {
    let permitted = general_subtrees(
        template,
        &template.permitted_dns_domains,
        &template.permitted_ip_ranges,
        &template.permitted_email_addresses,
        &template.permitted_uri_domains,
    )?;
    let excluded = general_subtrees(
        template,
        &template.excluded_dns_domains,
        &template.excluded_ip_ranges,
        &template.excluded_email_addresses,
        &template.excluded_uri_domains,
    )?;

    if permitted.is_empty() && excluded.is_empty() {
        return Ok(None);
    }

    let value = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            if !permitted.is_empty() {
                write_general_subtrees(writer.next(), 0, &permitted);
            }
            if !excluded.is_empty() {
                write_general_subtrees(writer.next(), 1, &excluded);
            }
        })
    });

    Ok(Some(Extension {
        oid: NAME_CONSTRAINTS.to_owned(),
        critical: template.name_constraints_critical,
        value,
    }))
}

/// One distribution point with a single `fullName` per URL.
pub(crate) fn crl_distribution_points(template: &Template) -> Result<Option<Extension>> {
    if template.crl_distribution_points.is_empty() {
        return Ok(None);
    }

    let urls = template
        .crl_distribution_points
        .iter()
        .map(|url| ia5_string(template, url))
        .collect::<Result<Vec<_>>>()?;

    let value = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            for url in &urls {
                writer.next().write_sequence(|writer| {
                    // distributionPoint [0] { fullName [0] GeneralNames }
                    writer.next().write_tagged(Tag::context(0), |writer| {
                        writer.write_tagged_implicit(Tag::context(0), |writer| {
                            writer.write_sequence(|writer| {
                                GeneralName::Uri(url).write(writer.next())
                            })
                        })
                    })
                })
            }
        })
    });

    Ok(Some(Extension {
        oid: CRL_DISTRIBUTION_POINTS.to_owned(),
        critical: false,
        value,
    }))
}

/// OCSP responders first, then the issuing certificate URLs.
pub(crate) fn authority_information_access(template: &Template) -> Result<Option<Extension>> {
    let mut descriptions = Vec::new();
    for url in &template.ocsp_servers {
        descriptions.push((ACCESS_METHOD_OCSP, ia5_string(template, url)?));
    }
    for url in &template.issuing_certificate_urls {
        descriptions.push((ACCESS_METHOD_CA_ISSUERS, ia5_string(template, url)?));
    }

    if descriptions.is_empty() {
        return Ok(None);
    }

    let value = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            for (method, url) in &descriptions {
                writer.next().write_sequence(|writer| {
                    writer.next().write_oid(&ObjectIdentifier::from_slice(method));
                    GeneralName::Uri(url).write(writer.next());
                })
            }
        })
    });

    Ok(Some(Extension {
        oid: AUTHORITY_INFORMATION_ACCESS.to_owned(),
        critical: false,
        value,
    }))
}

/// Policy identifiers only, without qualifiers.
pub(crate) fn certificate_policies(template: &Template) -> Result<Option<Extension>> {
    if template.policy_identifiers.is_empty() {
        return Ok(None);
    }

    let policies = template
        .policy_identifiers
        .iter()
        .map(|policy| parse_oid(template, policy))
        .collect::<Result<Vec<_>>>()?;

    let value = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            for policy in &policies {
                writer
                    .next()
                    .write_sequence(|writer| writer.next().write_oid(policy))
            }
        })
    });

    Ok(Some(Extension {
        oid: CERTIFICATE_POLICIES.to_owned(),
        critical: false,
        value,
    }))
}

fn general_subtrees<'a>(
    template: &Template,
    dns_domains: &'a [String],
    ip_ranges: &[IpRange],
    email_addresses: &'a [String],
    uri_domains: &'a [String],
) -> Result<Vec<GeneralName<'a>>> {
    let mut names = Vec::new();

    for domain in dns_domains {
        names.push(GeneralName::Dns(ia5_string(template, domain)?));
    }
    for range in ip_ranges {
        let Some(bytes) = range.to_bytes() else {
            return Err(bherror::Error::root(template.signing_error()))
                .ctx(|| format!("invalid IP range [{}/{}]", range.address, range.prefix_len));
        };
        names.push(GeneralName::IpRange(bytes));
    }
    for email in email_addresses {
        names.push(GeneralName::Email(ia5_string(template, email)?));
    }
    for domain in uri_domains {
        names.push(GeneralName::Uri(ia5_string(template, domain)?));
    }

    Ok(names)
}

fn write_general_subtrees(writer: DERWriter, tag: u64, names: &[GeneralName]) {
    writer.write_tagged_implicit(Tag::context(tag), |writer| {
        writer.write_sequence(|writer| {
            for name in names {
                // minimum is the default 0 and maximum is absent
                writer
                    .next()
                    .write_sequence(|writer| name.write(writer.next()));
            }
        })
    })
}

fn ia5_string<'a>(template: &Template, value: &'a str) -> Result<&'a str> {
    if value.is_ascii() {
        return Ok(value);
    }

    Err(bherror::Error::root(template.signing_error()))
        .ctx(|| format!("[{value}] is not an ASCII string"))
}

fn parse_oid(template: &Template, oid: &str) -> Result<ObjectIdentifier> {
    let components: Option<Vec<u64>> = oid.split('.').map(|arc| arc.parse().ok()).collect();

    match components.as_deref() {
        Some([first, second, ..]) if *first < 2 && *second < 40 => {}
        Some([2, _, ..]) => {}
        _ => {
            return Err(bherror::Error::root(template.signing_error()))
                .ctx(|| format!("invalid OID [{oid}]"))
        }
    }

    Ok(ObjectIdentifier::new(components.unwrap_or_default()))
}
