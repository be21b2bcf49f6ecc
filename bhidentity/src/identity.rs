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

use bherror::traits::{ErrorContext as _, ForeignError as _};
use openssl::{
    pkey::{PKey, PKeyRef, Private},
    rsa::Rsa,
    x509::{
        extension::{SubjectAlternativeName, SubjectKeyIdentifier},
        X509NameRef, X509Ref, X509,
    },
};

use crate::{extension, trust_store, verify_certificate, Error, Result, Template};

/// X.509v3
///
/// See [RFC 5280 - section 4.1.2.1](https://datatracker.ietf.org/doc/html/rfc5280#section-4.1.2.1)
const VERSION: i32 = 2;

/// The private key type of an [`Identity`]; always an RSA key.
pub type PrivateKey = PKey<Private>;

/// An X.509 identity: a signed certificate, its private key, and the chain of authorities which
/// issued it.
///
/// The `authorities` are ordered starting with the immediate issuer of the certificate and ending
/// with the root.  An identity with no authorities is self-signed.
///
/// Issuing a new identity never modifies the issuer, so an [`Identity`] can be freely shared
/// between threads once created.
#[derive(Clone, Debug)]
pub struct Identity {
    authorities: Vec<X509>,
    certificate: X509,
    key: PrivateKey,
}

impl Identity {
    /// Create a new [`Identity`] out of already existing material.
    ///
    /// # Warning
    ///
    /// Neither the chain of `authorities` nor the correspondence between `certificate` and `key`
    /// is validated here.
    pub fn new(authorities: Vec<X509>, certificate: X509, key: PrivateKey) -> Self {
        Self {
            authorities,
            certificate,
            key,
        }
    }

    /// Generate a self-signed identity (e.g. a root certificate authority) from `template`.
    ///
    /// A fresh RSA keypair of [`Template::key_bits`] bits is generated and the certificate is
    /// signed with it, with the template serving both as subject and issuer.
    pub fn self_signed(template: &Template) -> Result<Self> {
        let key = generate_key(template)?;

        let certificate = sign(template, &key, None, &key)
            .ctx(|| format!("error signing certificate for [{}]", template.display_name()))?;

        tracing::debug!(subject = template.display_name(), "self-signed identity created");

        Ok(Self::new(Vec::new(), certificate, key))
    }

    /// Issue a new identity from `template`, signed by this identity.
    ///
    /// The issued identity gets a fresh RSA keypair, and its authorities are this identity's
    /// certificate followed by this identity's authorities.
    pub fn issue(&self, template: &Template) -> Result<Self> {
        let key = generate_key(template)?;

        let certificate = sign(template, &key, Some(&self.certificate), &self.key)
            .ctx(|| format!("error signing certificate for [{}]", template.display_name()))?;

        let mut authorities = Vec::with_capacity(self.authorities.len() + 1);
        authorities.push(self.certificate.clone());
        authorities.extend(self.authorities.iter().cloned());

        tracing::debug!(
            subject = template.display_name(),
            depth = authorities.len(),
            "identity issued"
        );

        Ok(Self::new(authorities, certificate, key))
    }

    /// Returns the certificate of this identity.
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// Returns the private key of this identity.
    pub fn key(&self) -> &PrivateKey {
        &self.key
    }

    /// Returns the issuing authorities, immediate issuer first.
    pub fn authorities(&self) -> &[X509] {
        &self.authorities
    }

    /// Returns the full chain: the certificate followed by its authorities.
    pub fn chain(&self) -> Vec<X509> {
        std::iter::once(self.certificate.clone())
            .chain(self.authorities.iter().cloned())
            .collect()
    }

    /// Validate the certificate of this identity against the trusted `anchors`, using the
    /// authorities of this identity as intermediates.
    ///
    /// If `host` is given, the certificate must also be valid for that host name.
    pub fn verify(&self, anchors: &[X509], host: Option<&str>) -> Result<()> {
        let store = trust_store(anchors, host)?;
        verify_certificate(&store, &self.certificate, &self.authorities)
    }
}

fn generate_key(template: &Template) -> Result<PrivateKey> {
    let error = || Error::KeyGeneration(template.display_name().to_owned());

    let rsa = Rsa::generate(template.key_bits)
        .foreign_err(error)
        .ctx(|| format!("cannot generate {}-bit RSA key", template.key_bits))?;

    PKey::from_rsa(rsa).foreign_err(error)
}

/// Build the certificate described by `template` for `subject_key`, signed by `issuer_key`.
///
/// If `issuer` is [`None`], the certificate is self-signed and `issuer_key` must be the
/// `subject_key`.
fn sign(
    template: &Template,
    subject_key: &PKeyRef<Private>,
    issuer: Option<&X509Ref>,
    issuer_key: &PKeyRef<Private>,
) -> Result<X509> {
    let error = || template.signing_error();

    let mut cert_builder = X509::builder()
        .foreign_err(error)
        .ctx(|| "Cannot create cert builder")?;
    cert_builder
        .set_version(VERSION)
        .foreign_err(error)
        .ctx(|| "Cannot set cert version")?;

    let serial_number = template.asn1_serial_number()?;
    cert_builder
        .set_serial_number(&serial_number)
        .foreign_err(error)
        .ctx(|| "Cannot set serial number")?;

    cert_builder
        .set_pubkey(subject_key)
        .foreign_err(error)
        .ctx(|| "Cannot set public key")?;

    let subject_name = template.subject.to_x509_name()?;
    cert_builder
        .set_subject_name(&subject_name)
        .foreign_err(error)
        .ctx(|| "Cannot set subject name")?;
    let issuer_name: &X509NameRef = match issuer {
        Some(issuer) => issuer.subject_name(),
        None => &subject_name,
    };
    cert_builder
        .set_issuer_name(issuer_name)
        .foreign_err(error)
        .ctx(|| "Cannot set issuer name")?;

    let (not_before, not_after) = template.validity()?;
    cert_builder
        .set_not_before(&not_before)
        .foreign_err(error)
        .ctx(|| "Cannot set `not_before` time")?;
    cert_builder
        .set_not_after(&not_after)
        .foreign_err(error)
        .ctx(|| "Cannot set `not_after` time")?;

    let extensions = [
        template.basic_constraints()?,
        template.key_usage()?,
        template.extended_key_usage()?,
    ];
    for extension in extensions.into_iter().flatten() {
        cert_builder
            .append_extension(extension)
            .foreign_err(error)
            .ctx(|| "Cannot append extension")?;
    }

    let subject_key_identifier = match &template.subject_key_id {
        Some(key_id) => template.openssl_extension(&extension::subject_key_identifier(key_id))?,
        None => SubjectKeyIdentifier::new()
            .build(&cert_builder.x509v3_context(issuer, None))
            .foreign_err(error)
            .ctx(|| "Cannot create subject_key_identifier")?,
    };
    cert_builder
        .append_extension(subject_key_identifier)
        .foreign_err(error)
        .ctx(|| "Cannot append subject key identifier")?;

    // the issuer's own identifier takes precedence over the template
    let authority_key_id = issuer
        .and_then(|issuer| issuer.subject_key_id())
        .map(|key_id| key_id.as_slice().to_vec())
        .or_else(|| template.authority_key_id.clone());
    if let Some(key_id) = authority_key_id {
        let authority_key_identifier =
            template.openssl_extension(&extension::authority_key_identifier(&key_id))?;
        cert_builder
            .append_extension(authority_key_identifier)
            .foreign_err(error)
            .ctx(|| "Cannot append authority key identifier")?;
    }

    if template.has_subject_alternative_names() {
        let mut subject_alternative_name = SubjectAlternativeName::new();
        for dns_name in &template.dns_names {
            subject_alternative_name.dns(dns_name);
        }
        for email in &template.email_addresses {
            subject_alternative_name.email(email);
        }
        for ip in &template.ip_addresses {
            subject_alternative_name.ip(&ip.to_string());
        }
        for uri in &template.uris {
            subject_alternative_name.uri(uri.as_str());
        }

        let subject_alternative_name = subject_alternative_name
            .build(&cert_builder.x509v3_context(issuer, None))
            .foreign_err(error)
            .ctx(|| "Cannot create `subject_alternative_name`")?;
        cert_builder
            .append_extension(subject_alternative_name)
            .foreign_err(error)
            .ctx(|| "Cannot append `subject_alternative_name`")?;
    }

    for extension in template.pkix_extensions()? {
        cert_builder
            .append_extension(extension)
            .foreign_err(error)
            .ctx(|| "Cannot append extension")?;
    }

    for extension in template.extra_extensions()? {
        cert_builder
            .append_extension(extension)
            .foreign_err(error)
            .ctx(|| "Cannot append extra extension")?;
    }

    cert_builder
        .sign(issuer_key, template.signature_algorithm.message_digest())
        .foreign_err(error)
        .ctx(|| "Cannot sign certificate")?;

    Ok(cert_builder.build())
}
