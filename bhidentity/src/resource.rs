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

//! Resolution of resource locators into raw bytes.
//!
//! Locators are URI-like strings such as `file:///etc/tls/ca.pem` or `base64:///LS0tLS1CRUdJTi...`.
//! Which schemes are understood is decided by an explicit [`ResourceRegistry`] value handed to the
//! loaders, never by process-wide state.

use std::{collections::HashMap, fmt, sync::Arc};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use openssl::{base64, x509::X509};

use crate::{
    decode_certificates, decode_keys, load_any, load_exactly_one, Error, PrivateKey, Result,
};

/// Scheme used for locators that do not name one.
pub const FILE_SCHEME: &str = "file";

/// Scheme of locators carrying their content inline, base64 encoded.
pub const BASE64_SCHEME: &str = "base64";

/// Resolves a resource locator into the bytes it points to.
pub trait ResourceResolver: Send + Sync {
    /// Return the content of the resource at `locator`.
    ///
    /// The `locator` is passed as is, including its scheme.
    fn resolve(&self, locator: &str) -> Result<Vec<u8>>;
}

/// A table of [`ResourceResolver`]s keyed by URI scheme.
///
/// Locators without a scheme are treated as local file paths.
#[derive(Clone)]
pub struct ResourceRegistry {
    resolvers: HashMap<String, Arc<dyn ResourceResolver>>,
}

impl ResourceRegistry {
    /// Create a registry with no resolvers at all.
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    /// Create a registry resolving the `file` and `base64` schemes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FILE_SCHEME, FileResolver);
        registry.register(BASE64_SCHEME, Base64Resolver);
        registry
    }

    /// Register `resolver` for `scheme`, returning the resolver it replaces, if any.
    ///
    /// Schemes are case-insensitive.
    pub fn register<R>(&mut self, scheme: &str, resolver: R) -> Option<Arc<dyn ResourceResolver>>
    where
        R: ResourceResolver + 'static,
    {
        self.resolvers
            .insert(scheme.to_ascii_lowercase(), Arc::new(resolver))
    }

    /// Read the resource at `locator` with the resolver registered for its scheme.
    pub fn resolve(&self, locator: &str) -> Result<Vec<u8>> {
        let scheme = scheme_of(locator).unwrap_or(FILE_SCHEME);

        let Some(resolver) = self.resolvers.get(&scheme.to_ascii_lowercase()) else {
            return Err(bherror::Error::root(Error::UnsupportedScheme(
                scheme.to_owned(),
            )))
            .ctx(|| format!("cannot resolve [{locator}]"));
        };

        resolver
            .resolve(locator)
            .ctx(|| format!("error reading resource from [{locator}]"))
    }

    /// Load exactly one PEM encoded certificate from `locator`.
    pub fn load_certificate(&self, locator: &str) -> Result<X509> {
        let bytes = self.resolve(locator)?;
        load_exactly_one(locator, &bytes, decode_certificates)
            .ctx(|| format!("error loading certificate from [{locator}]"))
    }

    /// Load any number of PEM encoded certificates from `locator`.
    pub fn load_certificates(&self, locator: &str) -> Result<Vec<X509>> {
        let bytes = self.resolve(locator)?;
        load_any(locator, &bytes, decode_certificates)
            .ctx(|| format!("error loading certificates from [{locator}]"))
    }

    /// Load exactly one PEM encoded RSA private key from `locator`.
    pub fn load_key(&self, locator: &str) -> Result<PrivateKey> {
        let bytes = self.resolve(locator)?;
        load_exactly_one(locator, &bytes, decode_keys)
            .ctx(|| format!("error loading key from [{locator}]"))
    }
}

impl Default for ResourceRegistry {
    /// Same as [`ResourceRegistry::with_defaults`].
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<&String> = self.resolvers.keys().collect();
        schemes.sort();

        f.debug_struct("ResourceRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

/// Reads `file` locators and bare paths from the local filesystem.
///
/// `file:///etc/ca.pem` and `/etc/ca.pem` name the same file; relative paths are resolved against
/// the current working directory.  The authority part of a `file://` locator is ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileResolver;

impl ResourceResolver for FileResolver {
    fn resolve(&self, locator: &str) -> Result<Vec<u8>> {
        let mut path = strip_scheme(locator);
        if let Some(rest) = path.strip_prefix("//") {
            path = rest.find('/').map_or("", |start| &rest[start..]);
        }

        std::fs::read(path)
            .foreign_err(|| Error::Resource(locator.to_owned()))
            .ctx(|| format!("cannot read file [{path}]"))
    }
}

/// Decodes `base64` locators whose path is the standard base64 encoding of the content.
///
/// Leading slashes of the path are ignored, so `base64:///TUlJ` and `base64:TUlJ` are equal.
/// Useful for supplying PEM material through environment variables.
#[derive(Clone, Copy, Debug, Default)]
pub struct Base64Resolver;

impl ResourceResolver for Base64Resolver {
    fn resolve(&self, locator: &str) -> Result<Vec<u8>> {
        let data = strip_scheme(locator).trim_start_matches('/');

        base64::decode_block(data)
            .foreign_err(|| Error::Resource(locator.to_owned()))
            .ctx(|| "invalid base64 content")
    }
}

/// Returns the scheme of `locator`, if it has one.
///
/// Single letter schemes are not recognized, so that Windows drive letters are read as paths.
pub fn scheme_of(locator: &str) -> Option<&str> {
    let (scheme, _) = locator.split_once(':')?;

    let mut chars = scheme.chars();
    let valid = scheme.len() > 1
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    valid.then_some(scheme)
}

fn strip_scheme(locator: &str) -> &str {
    match scheme_of(locator) {
        Some(scheme) => &locator[scheme.len() + 1..],
        None => locator,
    }
}
