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

use std::{net::IpAddr, num::NonZeroUsize, ops::Shr};

use bherror::traits::{ErrorContext as _, ForeignError as _, PropagateError as _};
use chrono::{DateTime, Utc};
use iref::UriBuf;
use openssl::{
    asn1::{Asn1Integer, Asn1Object, Asn1OctetString, Asn1Time},
    bn::BigNum,
    hash::MessageDigest,
    x509::{
        extension::{
            BasicConstraints, ExtendedKeyUsage as OpenSslExtendedKeyUsage,
            KeyUsage as OpenSslKeyUsage,
        },
        X509Extension, X509Name, X509NameBuilder,
    },
};
use rand::RngCore;

use crate::{extension, Error, Result};

/// Default size of the generated RSA modulus, in bits.
pub const DEFAULT_KEY_BITS: u32 = 4096;

/// Length of the random certificate serial number in bits.
///
/// See [RFC 5280 - section 4.1.2.2](https://datatracker.ietf.org/doc/html/rfc5280#section-4.1.2.2),
/// and this answer from [stackoverflow](https://stackoverflow.com/a/55277597).
const RANDOM_SERIAL_NUMBER_BITS: usize = 159;

/// The attributes requested for a certificate prior to signing.
///
/// A [`Template`] is a plain value.  It is only read during issuance, so the same template can be
/// reused for any number of [`Identity`][crate::Identity] values.
///
/// Apart from the serial number and the path length constraint, the issuance engine does not
/// second-guess the template: whatever combination of attributes is requested ends up in the
/// certificate.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    /// The subject distinguished name.
    pub subject: SubjectName,
    /// Start of the validity window.
    pub not_before: DateTime<Utc>,
    /// End of the validity window.
    pub not_after: DateTime<Utc>,
    /// Serial number of the certificate; uniqueness per issuer is up to the caller.
    pub serial_number: Option<SerialNumber>,
    /// Key usage bits, emitted as a critical extension when not empty.
    pub key_usage: Vec<KeyUsage>,
    /// Extended key usage purposes.
    pub extended_key_usage: Vec<ExtendedKeyUsage>,
    /// Whether the basic constraints extension is emitted at all.
    pub basic_constraints_valid: bool,
    /// Whether the subject is a certificate authority.
    pub is_ca: bool,
    /// Path length constraint; [`None`] is unset, `Some(0)` is an explicit zero.
    pub max_path_len: Option<u32>,
    /// DNS names of the Subject Alternative Name extension.
    pub dns_names: Vec<String>,
    /// Email addresses of the Subject Alternative Name extension.
    pub email_addresses: Vec<String>,
    /// IP addresses of the Subject Alternative Name extension.
    pub ip_addresses: Vec<IpAddr>,
    /// URIs of the Subject Alternative Name extension.
    pub uris: Vec<UriBuf>,
    /// Whether the name constraints extension is marked critical.
    pub name_constraints_critical: bool,
    /// DNS domains names issued by this authority must be within.
    pub permitted_dns_domains: Vec<String>,
    /// DNS domains names issued by this authority must not be within.
    pub excluded_dns_domains: Vec<String>,
    /// IP ranges addresses issued by this authority must be within.
    pub permitted_ip_ranges: Vec<IpRange>,
    /// IP ranges addresses issued by this authority must not be within.
    pub excluded_ip_ranges: Vec<IpRange>,
    /// Email addresses, mailboxes or domains permitted below this authority.
    pub permitted_email_addresses: Vec<String>,
    /// Email addresses, mailboxes or domains excluded below this authority.
    pub excluded_email_addresses: Vec<String>,
    /// URI host domains permitted below this authority.
    pub permitted_uri_domains: Vec<String>,
    /// URI host domains excluded below this authority.
    pub excluded_uri_domains: Vec<String>,
    /// OCSP responder URLs of the Authority Information Access extension.
    pub ocsp_servers: Vec<String>,
    /// Issuer certificate URLs of the Authority Information Access extension.
    pub issuing_certificate_urls: Vec<String>,
    /// CRL distribution point URLs, one distribution point each.
    pub crl_distribution_points: Vec<String>,
    /// Certificate policy OIDs, as dotted strings.
    pub policy_identifiers: Vec<String>,
    /// Subject key identifier; derived from the public key when [`None`].
    pub subject_key_id: Option<Vec<u8>>,
    /// Authority key identifier.
    ///
    /// Only used when the issuer certificate has no subject key identifier of its own, including
    /// self-signed certificates.
    pub authority_key_id: Option<Vec<u8>>,
    /// Additional extensions, appended verbatim.
    pub extra_extensions: Vec<Extension>,
    /// Digest used when signing the certificate.
    pub signature_algorithm: SignatureAlgorithm,
    /// Size of the RSA modulus generated for the subject, in bits.
    pub key_bits: u32,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            subject: SubjectName::default(),
            not_before: DateTime::default(),
            not_after: DateTime::default(),
            serial_number: None,
            key_usage: Vec::new(),
            extended_key_usage: Vec::new(),
            basic_constraints_valid: false,
            is_ca: false,
            max_path_len: None,
            dns_names: Vec::new(),
            email_addresses: Vec::new(),
            ip_addresses: Vec::new(),
            uris: Vec::new(),
            name_constraints_critical: false,
            permitted_dns_domains: Vec::new(),
            excluded_dns_domains: Vec::new(),
            permitted_ip_ranges: Vec::new(),
            excluded_ip_ranges: Vec::new(),
            permitted_email_addresses: Vec::new(),
            excluded_email_addresses: Vec::new(),
            permitted_uri_domains: Vec::new(),
            excluded_uri_domains: Vec::new(),
            ocsp_servers: Vec::new(),
            issuing_certificate_urls: Vec::new(),
            crl_distribution_points: Vec::new(),
            policy_identifiers: Vec::new(),
            subject_key_id: None,
            authority_key_id: None,
            extra_extensions: Vec::new(),
            signature_algorithm: SignatureAlgorithm::default(),
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

impl Template {
    /// Name used to identify the template in errors and logs.
    pub fn display_name(&self) -> &str {
        &self.subject.common_name
    }

    pub(crate) fn signing_error(&self) -> Error {
        Error::Signing(self.display_name().to_owned())
    }

    pub(crate) fn has_subject_alternative_names(&self) -> bool {
        !(self.dns_names.is_empty()
            && self.email_addresses.is_empty()
            && self.ip_addresses.is_empty()
            && self.uris.is_empty())
    }

    pub(crate) fn asn1_serial_number(&self) -> Result<Asn1Integer> {
        let Some(serial_number) = &self.serial_number else {
            return Err(bherror::Error::root(self.signing_error())).ctx(|| "no serial number given");
        };

        serial_number
            .to_asn1_integer()
            .with_err(|| self.signing_error())
            .ctx(|| "invalid serial number")
    }

    pub(crate) fn validity(&self) -> Result<(Asn1Time, Asn1Time)> {
        let not_before = Asn1Time::from_unix(self.not_before.timestamp())
            .foreign_err(|| self.signing_error())
            .ctx(|| "Cannot create `not_before` time")?;
        let not_after = Asn1Time::from_unix(self.not_after.timestamp())
            .foreign_err(|| self.signing_error())
            .ctx(|| "Cannot create `not_after` time")?;

        Ok((not_before, not_after))
    }

    /// The basic constraints extension, if the template asks for one.
    ///
    /// Without the extension, [`max_path_len`](Template::max_path_len) is ignored.
    pub(crate) fn basic_constraints(&self) -> Result<Option<X509Extension>> {
        if !self.basic_constraints_valid {
            return Ok(None);
        }

        if self.max_path_len.is_some() && !self.is_ca {
            return Err(bherror::Error::root(self.signing_error()))
                .ctx(|| "only certificate authorities may carry a path length constraint");
        }

        let mut basic_constraints = BasicConstraints::new();
        basic_constraints.critical();
        if self.is_ca {
            basic_constraints.ca();
        }
        if let Some(path_len) = self.max_path_len {
            basic_constraints.pathlen(path_len);
        }

        basic_constraints
            .build()
            .foreign_err(|| self.signing_error())
            .ctx(|| "Cannot create basic_constraints")
            .map(Some)
    }

    pub(crate) fn key_usage(&self) -> Result<Option<X509Extension>> {
        if self.key_usage.is_empty() {
            return Ok(None);
        }

        let mut key_usage = OpenSslKeyUsage::new();
        key_usage.critical();
        for usage in &self.key_usage {
            match usage {
                KeyUsage::DigitalSignature => key_usage.digital_signature(),
                KeyUsage::ContentCommitment => key_usage.non_repudiation(),
                KeyUsage::KeyEncipherment => key_usage.key_encipherment(),
                KeyUsage::DataEncipherment => key_usage.data_encipherment(),
                KeyUsage::KeyAgreement => key_usage.key_agreement(),
                KeyUsage::KeyCertSign => key_usage.key_cert_sign(),
                KeyUsage::CrlSign => key_usage.crl_sign(),
                KeyUsage::EncipherOnly => key_usage.encipher_only(),
                KeyUsage::DecipherOnly => key_usage.decipher_only(),
            };
        }

        key_usage
            .build()
            .foreign_err(|| self.signing_error())
            .ctx(|| "Cannot create key_usage")
            .map(Some)
    }

    pub(crate) fn extended_key_usage(&self) -> Result<Option<X509Extension>> {
        if self.extended_key_usage.is_empty() {
            return Ok(None);
        }

        let mut extended_key_usage = OpenSslExtendedKeyUsage::new();
        for usage in &self.extended_key_usage {
            match usage {
                ExtendedKeyUsage::Any => extended_key_usage.other("anyExtendedKeyUsage"),
                ExtendedKeyUsage::ServerAuth => extended_key_usage.server_auth(),
                ExtendedKeyUsage::ClientAuth => extended_key_usage.client_auth(),
                ExtendedKeyUsage::CodeSigning => extended_key_usage.code_signing(),
                ExtendedKeyUsage::EmailProtection => extended_key_usage.email_protection(),
                ExtendedKeyUsage::TimeStamping => extended_key_usage.time_stamping(),
                ExtendedKeyUsage::OcspSigning => extended_key_usage.other("OCSPSigning"),
                ExtendedKeyUsage::Other(oid) => extended_key_usage.other(oid),
            };
        }

        extended_key_usage
            .build()
            .foreign_err(|| self.signing_error())
            .ctx(|| "Cannot create extended_key_usage")
            .map(Some)
    }

    /// Name constraints, CRL distribution points, authority information access and certificate
    /// policies, in that order.
    pub(crate) fn pkix_extensions(&self) -> Result<Vec<X509Extension>> {
        let extensions = [
            extension::name_constraints(self)?,
            extension::crl_distribution_points(self)?,
            extension::authority_information_access(self)?,
            extension::certificate_policies(self)?,
        ];

        extensions
            .iter()
            .flatten()
            .map(|extension| self.openssl_extension(extension))
            .collect()
    }

    pub(crate) fn extra_extensions(&self) -> Result<Vec<X509Extension>> {
        self.extra_extensions
            .iter()
            .map(|extension| self.openssl_extension(extension))
            .collect()
    }

    pub(crate) fn openssl_extension(&self, extension: &Extension) -> Result<X509Extension> {
        extension
            .to_x509_extension()
            .foreign_err(|| self.signing_error())
            .ctx(|| format!("Cannot create extension [{}]", extension.oid))
    }
}

/// Subject distinguished name of a [`Template`].
///
/// Attributes are emitted in the order: `C`, `ST`, `L`, `street`, `postalCode`, `O`, `OU`, `CN`.
/// Empty attributes are omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectName {
    /// `CN`
    pub common_name: String,
    /// `C`
    pub country: Vec<String>,
    /// `ST`
    pub province: Vec<String>,
    /// `L`
    pub locality: Vec<String>,
    /// `street`
    pub street_address: Vec<String>,
    /// `postalCode`
    pub postal_code: Vec<String>,
    /// `O`
    pub organization: Vec<String>,
    /// `OU`
    pub organizational_unit: Vec<String>,
}

impl SubjectName {
    /// Create a [`SubjectName`] with only the common name set.
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn to_x509_name(&self) -> Result<X509Name> {
        let error = || Error::Signing(self.common_name.clone());

        let mut name = X509NameBuilder::new()
            .foreign_err(error)
            .ctx(|| "couldn't create `subject_name`")?;

        let common_name = (!self.common_name.is_empty()).then_some(&self.common_name);
        let entries = [
            ("C", self.country.iter()),
            ("ST", self.province.iter()),
            ("L", self.locality.iter()),
            ("street", self.street_address.iter()),
            ("postalCode", self.postal_code.iter()),
            ("O", self.organization.iter()),
            ("OU", self.organizational_unit.iter()),
        ];

        for (field, values) in entries {
            for value in values {
                name.append_entry_by_text(field, value)
                    .foreign_err(error)
                    .ctx(|| format!("couldn't append `{field}` to `subject_name`"))?;
            }
        }

        if let Some(common_name) = common_name {
            name.append_entry_by_text("CN", common_name)
                .foreign_err(error)
                .ctx(|| "couldn't append `CN` to `subject_name`")?;
        }

        Ok(name.build())
    }
}

/// A positive certificate serial number, stored as a big endian unsigned integer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    /// Create a serial number from its big endian unsigned representation.
    pub fn from_be_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Generate a random, nonzero serial number of 159 bits.
    ///
    /// See this [stackexchange answer](https://crypto.stackexchange.com/questions/257/unpredictability-of-x-509-serial-numbers)
    /// for more details.
    pub fn random() -> Result<Self> {
        // `RANDOM_SERIAL_NUMBER_BITS` is a nonzero constant
        let bits = NonZeroUsize::new(RANDOM_SERIAL_NUMBER_BITS).unwrap_or(NonZeroUsize::MIN);
        generate_random_nonzero_bits_big_endian(bits).map(Self)
    }

    /// The big endian unsigned representation.
    pub fn as_be_bytes(&self) -> &[u8] {
        &self.0
    }

    fn to_asn1_integer(&self) -> Result<Asn1Integer> {
        let serial_number = BigNum::from_slice(&self.0)
            .foreign_err(|| Error::Signing(String::new()))
            .ctx(|| "Cannot create serial number")?;

        serial_number
            .to_asn1_integer()
            .foreign_err(|| Error::Signing(String::new()))
            .ctx(|| "Cannot create asn1 integer")
    }
}

impl From<u64> for SerialNumber {
    fn from(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let first_nonzero = bytes
            .iter()
            .position(|byte| *byte != 0)
            .unwrap_or(bytes.len() - 1);

        Self(bytes[first_nonzero..].to_vec())
    }
}

/// Generate a vector of `n_bits`-many random bits which are not all zero,
/// represented as a big endian byte vector of minimum size, i.e. any bits
/// which are zero due to not being part of the generated bits will be
/// the most significant bits of the byte at index `0`.
///
/// All-zero bits are avoided using rejection sampling, with at most a constant
/// number of attempts; the chance of exhausting them with a uniform source is
/// at most `2^(-256)`, so that case is reported as an error.
fn generate_random_nonzero_bits_big_endian(n_bits: NonZeroUsize) -> Result<Vec<u8>> {
    const MAX_ITERATIONS: usize = 256;

    let mut rng = rand::rng();

    let bytes: usize = n_bits.get().div_ceil(8);
    let leading_zeros: u32 = (bytes * 8 - n_bits.get()) as u32;
    debug_assert!(leading_zeros < 8);
    let most_significant_byte_mask: u8 = u8::MAX.shr(leading_zeros);

    let mut sample = vec![0u8; bytes];

    for _ in 0..MAX_ITERATIONS {
        rng.fill_bytes(&mut sample);
        sample[0] &= most_significant_byte_mask;

        if !sample.iter().all(|b| *b == 0) {
            return Ok(sample);
        }
    }

    Err(bherror::Error::root(Error::Signing(String::new()))
        .ctx("Failed to generate a nonzero random serial number"))
}

/// A range of IP addresses, given as a network address and the length of its prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IpRange {
    /// The network address.
    pub address: IpAddr,
    /// Number of leading bits of [`address`](IpRange::address) fixed by the range.
    pub prefix_len: u8,
}

impl IpRange {
    /// Create a new [`IpRange`].
    pub fn new(address: IpAddr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }

    /// The address octets followed by the netmask octets, or [`None`] if the prefix is longer
    /// than the address.
    pub(crate) fn to_bytes(self) -> Option<Vec<u8>> {
        let mut bytes = match self.address {
            IpAddr::V4(address) => address.octets().to_vec(),
            IpAddr::V6(address) => address.octets().to_vec(),
        };

        let total_bits = bytes.len() * 8;
        let prefix_len = usize::from(self.prefix_len);
        if prefix_len > total_bits {
            return None;
        }

        let mask = (0..bytes.len()).map(|i| {
            let bits = prefix_len.saturating_sub(i * 8).min(8) as u32;
            u8::MAX.checked_shl(8 - bits).unwrap_or(0)
        });
        bytes.extend(mask.collect::<Vec<u8>>());

        Some(bytes)
    }
}

/// Key usage bits.
///
/// See [RFC 5280 - section 4.2.1.3](https://datatracker.ietf.org/doc/html/rfc5280#section-4.2.1.3)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    /// `digitalSignature`
    DigitalSignature,
    /// `contentCommitment` (formerly `nonRepudiation`)
    ContentCommitment,
    /// `keyEncipherment`
    KeyEncipherment,
    /// `dataEncipherment`
    DataEncipherment,
    /// `keyAgreement`
    KeyAgreement,
    /// `keyCertSign`
    KeyCertSign,
    /// `cRLSign`
    CrlSign,
    /// `encipherOnly`
    EncipherOnly,
    /// `decipherOnly`
    DecipherOnly,
}

/// Extended key usage purposes.
///
/// See [RFC 5280 - section 4.2.1.12](https://datatracker.ietf.org/doc/html/rfc5280#section-4.2.1.12)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExtendedKeyUsage {
    /// `anyExtendedKeyUsage`
    Any,
    /// TLS server authentication.
    ServerAuth,
    /// TLS client authentication.
    ClientAuth,
    /// Code signing.
    CodeSigning,
    /// Email protection.
    EmailProtection,
    /// Time stamping.
    TimeStamping,
    /// OCSP response signing.
    OcspSigning,
    /// Any other purpose, given as a dotted OID string.
    Other(String),
}

/// An arbitrary extension to be appended to the certificate as is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    /// Dotted OID string, e.g. `1.2.3.4`.
    pub oid: String,
    /// Whether the extension is marked critical.
    pub critical: bool,
    /// DER encoded extension value.
    pub value: Vec<u8>,
}

impl Extension {
    fn to_x509_extension(&self) -> std::result::Result<X509Extension, openssl::error::ErrorStack> {
        let oid = Asn1Object::from_str(&self.oid)?;
        let value = Asn1OctetString::new_from_bytes(&self.value)?;
        X509Extension::new_from_der(&oid, self.critical, &value)
    }
}

/// Signature algorithm used by the issuer to sign the certificate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// `sha256WithRSAEncryption`
    #[default]
    Sha256WithRsa,
    /// `sha384WithRSAEncryption`
    Sha384WithRsa,
    /// `sha512WithRSAEncryption`
    Sha512WithRsa,
}

impl SignatureAlgorithm {
    pub(crate) fn message_digest(self) -> MessageDigest {
        match self {
            Self::Sha256WithRsa => MessageDigest::sha256(),
            Self::Sha384WithRsa => MessageDigest::sha384(),
            Self::Sha512WithRsa => MessageDigest::sha512(),
        }
    }
}
