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

//! Assembly of the trust material used on either side of a TLS connection.

use bherror::traits::{ErrorContext as _, ForeignError as _, PropagateError as _};
use bhidentity::{Identity, PrivateKey};
use openssl::{
    ssl::{SslAcceptor, SslConnector, SslContextBuilder, SslMethod},
    x509::{store::X509Store, X509Ref, X509},
};

use crate::{ClientAuthPolicy, Error, Result};

/// The set of certificate authorities a peer certificate is validated against.
#[derive(Clone, Debug)]
pub enum CertificatePool {
    /// The default trust roots of the operating system.
    System,
    /// Exactly the given authorities.  An empty pool trusts nothing.
    Explicit(Vec<X509>),
}

impl CertificatePool {
    /// Build a certificate store of this pool, requiring the validated certificate to match `host`
    /// when given.
    pub fn x509_store(&self, host: Option<&str>) -> Result<X509Store> {
        match self {
            Self::System => {
                tracing::warn!("no certificate authorities configured, using system trust roots");
                bhidentity::system_trust_store(host).with_err(|| Error::Backend)
            }
            Self::Explicit(authorities) => {
                bhidentity::trust_store(authorities, host).with_err(|| Error::Backend)
            }
        }
    }
}

/// The certificate and key a TLS endpoint presents to its peer.
#[derive(Clone, Debug)]
pub struct Credential {
    /// The end-entity certificate.
    pub certificate: X509,
    /// Private key matching the [`certificate`](Credential::certificate).
    pub key: PrivateKey,
    /// Intermediate certificates sent along with the certificate, starting with its issuer.
    pub chain: Vec<X509>,
}

impl Credential {
    /// Create a new [`Credential`] without intermediates.
    pub fn new(certificate: X509, key: PrivateKey) -> Self {
        Self {
            certificate,
            key,
            chain: Vec::new(),
        }
    }

    fn apply(&self, builder: &mut SslContextBuilder) -> Result<()> {
        builder
            .set_certificate(&self.certificate)
            .foreign_err(|| Error::Backend)
            .ctx(|| "cannot use certificate")?;
        for certificate in &self.chain {
            builder
                .add_extra_chain_cert(certificate.clone())
                .foreign_err(|| Error::Backend)
                .ctx(|| "cannot use chain certificate")?;
        }
        builder
            .set_private_key(&self.key)
            .foreign_err(|| Error::Backend)?;
        builder
            .check_private_key()
            .foreign_err(|| Error::Backend)
            .ctx(|| "private key does not match the certificate")
    }
}

impl From<&Identity> for Credential {
    /// The identity's certificate and key, presented with all its authorities.
    fn from(identity: &Identity) -> Self {
        Self {
            certificate: identity.certificate().clone(),
            key: identity.key().clone(),
            chain: identity.authorities().to_vec(),
        }
    }
}

/// Everything needed to set up one side of a TLS connection: whom to trust, what to present, and
/// how to treat client certificates.
///
/// Construct it with [`TlsTrust::build`], or from configuration through
/// [`TrustConfiguration::build`][crate::TrustConfiguration::build].
#[derive(Clone, Debug)]
pub struct TlsTrust {
    pool: CertificatePool,
    credential: Option<Credential>,
    policy: ClientAuthPolicy,
    server_name: Option<String>,
}

impl TlsTrust {
    /// Assemble the trust material.  This never fails; problems with the material surface when it
    /// is used.
    pub fn build(
        pool: CertificatePool,
        credential: Option<Credential>,
        policy: ClientAuthPolicy,
    ) -> Self {
        tracing::debug!(
            system_pool = matches!(pool, CertificatePool::System),
            credential = credential.is_some(),
            %policy,
            "TLS trust assembled"
        );

        Self {
            pool,
            credential,
            policy,
            server_name: None,
        }
    }

    /// Set the host name clients expect the server certificate to be valid for.
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// The pool of trusted authorities.
    pub fn pool(&self) -> &CertificatePool {
        &self.pool
    }

    /// The local credential, if any.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// The client authentication policy.
    pub fn policy(&self) -> ClientAuthPolicy {
        self.policy
    }

    /// The host name clients verify the server against, if configured.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Build a certificate store of the trusted authorities.
    ///
    /// See [`CertificatePool::x509_store`].
    pub fn x509_store(&self, host: Option<&str>) -> Result<X509Store> {
        self.pool.x509_store(host)
    }

    /// Validate a peer certificate, given along with the `intermediates` it was sent with, against
    /// the trusted authorities.
    pub fn verify(&self, leaf: &X509Ref, intermediates: &[X509], host: Option<&str>) -> Result<()> {
        let store = self.x509_store(host)?;

        bhidentity::verify_certificate(&store, leaf, intermediates).match_err(|error| match error {
            bhidentity::Error::Verification => Error::Verification,
            _ => Error::Backend,
        })
    }

    /// Create the server side TLS context.
    ///
    /// The local credential is required.  Client certificates are treated according to the
    /// [`policy`](Self::policy) and verified against the trusted authorities.
    pub fn ssl_acceptor(&self) -> Result<SslAcceptor> {
        let Some(credential) = &self.credential else {
            return Err(bherror::Error::root(Error::MissingMaterial(
                "certificate".to_owned(),
            )))
            .ctx(|| "a TLS server needs a local credential");
        };

        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
            .foreign_err(|| Error::Backend)?;

        credential.apply(&mut builder)?;

        if let CertificatePool::Explicit(authorities) = &self.pool {
            for authority in authorities {
                builder
                    .add_client_ca(authority)
                    .foreign_err(|| Error::Backend)
                    .ctx(|| "cannot advertise client certificate authority")?;
            }
        }
        builder.set_cert_store(self.x509_store(None)?);
        self.policy.configure(&mut builder);

        Ok(builder.build())
    }

    /// Create the client side TLS context.
    ///
    /// The server certificate is verified against the trusted authorities, and the local
    /// credential, if any, is offered as the client certificate.
    ///
    /// The server certificate must also match the [server name](Self::server_name), if set.  A
    /// host name checked when connecting takes precedence over it.
    pub fn ssl_connector(&self) -> Result<SslConnector> {
        let mut builder =
            SslConnector::builder(SslMethod::tls_client()).foreign_err(|| Error::Backend)?;

        if let Some(credential) = &self.credential {
            credential.apply(&mut builder)?;
        }
        builder.set_cert_store(self.x509_store(self.server_name())?);

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{TcpListener, TcpStream},
        thread,
    };

    use assert_matches::assert_matches;
    use bhidentity::test_utils;

    use super::*;

    struct Hierarchy {
        root: Identity,
        server: Identity,
        client: Identity,
    }

    fn hierarchy() -> Hierarchy {
        let root = Identity::self_signed(&test_utils::root_template("root")).unwrap();
        let intermediate = root
            .issue(&test_utils::intermediate_template("intermediate"))
            .unwrap();
        let server = intermediate
            .issue(&test_utils::leaf_template("localhost"))
            .unwrap();
        let client = intermediate
            .issue(&test_utils::leaf_template("client"))
            .unwrap();

        Hierarchy {
            root,
            server,
            client,
        }
    }

    fn explicit(identity: &Identity) -> CertificatePool {
        CertificatePool::Explicit(vec![identity.certificate().clone()])
    }

    /// Run a handshake between the two contexts over loopback, returning whether the server
    /// accepted the connection.
    fn handshake(acceptor: SslAcceptor, connector: SslConnector) -> bool {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            acceptor.accept(stream).is_ok()
        });

        let stream = TcpStream::connect(address).unwrap();
        // the client may finish its side before the server rejects its certificate
        let _ = connector.connect("localhost", stream);

        server.join().unwrap()
    }

    /// Run a handshake over loopback without checking the host name when connecting, returning
    /// whether the client accepted the server.
    fn handshake_without_host_check(acceptor: SslAcceptor, connector: SslConnector) -> bool {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let _ = acceptor.accept(stream);
        });

        let stream = TcpStream::connect(address).unwrap();
        let accepted = connector
            .configure()
            .unwrap()
            .verify_hostname(false)
            .connect("localhost", stream)
            .is_ok();

        server.join().unwrap();
        accepted
    }

    #[test]
    fn test_build_is_total() {
        let trust = TlsTrust::build(
            CertificatePool::Explicit(Vec::new()),
            None,
            ClientAuthPolicy::default(),
        );

        assert_matches!(
            trust.pool(),
            CertificatePool::Explicit(authorities) if authorities.is_empty()
        );
        assert!(trust.credential().is_none());
        assert_eq!(trust.policy(), ClientAuthPolicy::NoClientCert);
        assert_eq!(trust.server_name(), None);

        let trust = trust.with_server_name("localhost");
        assert_eq!(trust.server_name(), Some("localhost"));
    }

    #[test]
    fn test_verify_against_explicit_pool() {
        let Hierarchy { root, server, .. } = hierarchy();
        let trust = TlsTrust::build(explicit(&root), None, ClientAuthPolicy::default());

        trust
            .verify(server.certificate(), server.authorities(), Some("localhost"))
            .unwrap();

        let err = trust
            .verify(server.certificate(), server.authorities(), Some("example.com"))
            .unwrap_err();
        assert_matches!(err.error, Error::Verification);

        // intermediates are required to build the path
        let err = trust.verify(server.certificate(), &[], None).unwrap_err();
        assert_matches!(err.error, Error::Verification);
    }

    #[test]
    fn test_empty_pool_trusts_nothing() {
        let Hierarchy { server, .. } = hierarchy();
        let trust = TlsTrust::build(
            CertificatePool::Explicit(Vec::new()),
            None,
            ClientAuthPolicy::default(),
        );

        let err = trust
            .verify(server.certificate(), server.authorities(), None)
            .unwrap_err();
        assert_matches!(err.error, Error::Verification);
    }

    #[test]
    fn test_system_pool_does_not_trust_private_root() {
        let Hierarchy { server, .. } = hierarchy();
        let trust = TlsTrust::build(CertificatePool::System, None, ClientAuthPolicy::default());

        trust.x509_store(None).unwrap();

        let err = trust
            .verify(server.certificate(), server.authorities(), None)
            .unwrap_err();
        assert_matches!(err.error, Error::Verification);
    }

    #[test]
    fn test_acceptor_requires_credential() {
        let Hierarchy { root, .. } = hierarchy();
        let trust = TlsTrust::build(explicit(&root), None, ClientAuthPolicy::default());

        let err = trust.ssl_acceptor().err().unwrap();
        assert_matches!(err.error, Error::MissingMaterial(_));

        trust.ssl_connector().unwrap();
    }

    #[test]
    fn test_acceptor_rejects_mismatched_key() {
        let Hierarchy { root, server, client } = hierarchy();
        let credential = Credential::new(server.certificate().clone(), client.key().clone());
        let trust = TlsTrust::build(
            explicit(&root),
            Some(credential),
            ClientAuthPolicy::default(),
        );

        let err = trust.ssl_acceptor().err().unwrap();
        assert_matches!(err.error, Error::Backend);
    }

    #[test]
    fn test_acceptor_verify_mode_follows_policy() {
        let Hierarchy { root, server, .. } = hierarchy();

        for policy in ClientAuthPolicy::ALL {
            let trust = TlsTrust::build(explicit(&root), Some((&server).into()), policy);
            let acceptor = trust.ssl_acceptor().unwrap();

            assert_eq!(acceptor.context().verify_mode(), policy.verify_mode());
        }
    }

    #[test]
    fn test_mutual_tls_handshake() {
        let Hierarchy {
            root,
            server,
            client,
        } = hierarchy();

        let server_trust = TlsTrust::build(
            explicit(&root),
            Some((&server).into()),
            ClientAuthPolicy::RequireAndVerifyClientCert,
        );
        let client_trust = TlsTrust::build(
            explicit(&root),
            Some((&client).into()),
            ClientAuthPolicy::default(),
        );

        assert!(handshake(
            server_trust.ssl_acceptor().unwrap(),
            client_trust.ssl_connector().unwrap()
        ));
    }

    #[test]
    fn test_handshake_without_client_certificate() {
        let Hierarchy { root, server, .. } = hierarchy();
        let anonymous = TlsTrust::build(explicit(&root), None, ClientAuthPolicy::default());

        let optional = TlsTrust::build(
            explicit(&root),
            Some((&server).into()),
            ClientAuthPolicy::VerifyClientCertIfGiven,
        );
        assert!(handshake(
            optional.ssl_acceptor().unwrap(),
            anonymous.ssl_connector().unwrap()
        ));

        let required = TlsTrust::build(
            explicit(&root),
            Some((&server).into()),
            ClientAuthPolicy::RequireAndVerifyClientCert,
        );
        assert!(!handshake(
            required.ssl_acceptor().unwrap(),
            anonymous.ssl_connector().unwrap()
        ));
    }

    #[test]
    fn test_handshake_with_untrusted_client_certificate() {
        let Hierarchy { root, server, .. } = hierarchy();
        let foreign_root = Identity::self_signed(&test_utils::root_template("root")).unwrap();
        let foreign_client = foreign_root
            .issue(&test_utils::leaf_template("client"))
            .unwrap();

        // the client trusts the server, but the server does not trust the client's issuer
        let client_trust = TlsTrust::build(
            explicit(&root),
            Some((&foreign_client).into()),
            ClientAuthPolicy::default(),
        );

        let verifying = TlsTrust::build(
            explicit(&root),
            Some((&server).into()),
            ClientAuthPolicy::RequireAndVerifyClientCert,
        );
        assert!(!handshake(
            verifying.ssl_acceptor().unwrap(),
            client_trust.ssl_connector().unwrap()
        ));

        let any = TlsTrust::build(
            explicit(&root),
            Some((&server).into()),
            ClientAuthPolicy::RequireAnyClientCert,
        );
        assert!(handshake(
            any.ssl_acceptor().unwrap(),
            client_trust.ssl_connector().unwrap()
        ));
    }

    #[test]
    fn test_connector_checks_server_name() {
        let Hierarchy { root, server, .. } = hierarchy();
        let server_trust = TlsTrust::build(
            explicit(&root),
            Some((&server).into()),
            ClientAuthPolicy::default(),
        );

        let matching = TlsTrust::build(explicit(&root), None, ClientAuthPolicy::default())
            .with_server_name("localhost");
        assert!(handshake_without_host_check(
            server_trust.ssl_acceptor().unwrap(),
            matching.ssl_connector().unwrap()
        ));

        let mismatched = TlsTrust::build(explicit(&root), None, ClientAuthPolicy::default())
            .with_server_name("other.example.com");
        assert!(!handshake_without_host_check(
            server_trust.ssl_acceptor().unwrap(),
            mismatched.ssl_connector().unwrap()
        ));

        // the host given when connecting wins
        assert!(handshake(
            server_trust.ssl_acceptor().unwrap(),
            mismatched.ssl_connector().unwrap()
        ));
    }

    #[test]
    fn test_trust_is_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TlsTrust>();
        assert_send_sync::<CertificatePool>();
        assert_send_sync::<Credential>();

        let Hierarchy { root, server, .. } = hierarchy();
        let trust = TlsTrust::build(explicit(&root), None, ClientAuthPolicy::default());

        thread::scope(|scope| {
            scope.spawn(|| {
                trust
                    .verify(server.certificate(), server.authorities(), Some("localhost"))
                    .unwrap()
            });
            scope.spawn(|| trust.ssl_connector().unwrap());
        });
    }
}
