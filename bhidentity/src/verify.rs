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
    error::ErrorStack,
    stack::Stack,
    x509::{
        store::{X509Store, X509StoreBuilder, X509StoreRef},
        verify::{X509VerifyFlags, X509VerifyParam},
        X509Ref, X509StoreContext, X509,
    },
};

use crate::{Error, Result};

/// Build a certificate store trusting exactly the given `anchors`.
///
/// An empty `anchors` slice yields a store which trusts nothing.  If `host` is given, validation
/// against the store additionally requires the target certificate to be valid for that host name.
pub fn trust_store(anchors: &[X509], host: Option<&str>) -> Result<X509Store> {
    let mut builder = store_builder(X509VerifyFlags::CHECK_SS_SIGNATURE, host)?;

    for anchor in anchors {
        builder
            .add_cert(anchor.clone())
            .foreign_err(|| Error::Verification)
            .ctx(|| "cannot add trust anchor")?;
    }

    Ok(builder.build())
}

/// Build a certificate store trusting the operating system's default trust roots.
pub fn system_trust_store(host: Option<&str>) -> Result<X509Store> {
    let mut builder = store_builder(X509VerifyFlags::empty(), host)?;

    builder
        .set_default_paths()
        .foreign_err(|| Error::Verification)
        .ctx(|| "cannot load system trust roots")?;

    Ok(builder.build())
}

/// Validate the path from `certificate` to one of the anchors in `store`.
///
/// The `intermediates` are untrusted certificates used only to help building the path; the order
/// does not matter and they may contain the target itself.
pub fn verify_certificate(
    store: &X509StoreRef,
    certificate: &X509Ref,
    intermediates: &[X509],
) -> Result<()> {
    let intermediates = chain_to_stack(intermediates.iter().cloned())?;

    let mut context = X509StoreContext::new().foreign_err(|| Error::Verification)?;
    let is_valid = context
        .init(store, certificate, &intermediates, |ctx| {
            clean_up_after_openssl(|| ctx.verify_cert())
        })
        .foreign_err(|| Error::Verification)?;

    if !is_valid {
        return Err(bherror::Error::root(Error::Verification)
            .ctx("Certificate validation against trust anchors failed")
            .ctx(format!(
                "OpenSSL error on depth {}: {}",
                context.error_depth(),
                context.error()
            )));
    }

    Ok(())
}

fn store_builder(flags: X509VerifyFlags, host: Option<&str>) -> Result<X509StoreBuilder> {
    let mut param = X509VerifyParam::new().foreign_err(|| Error::Verification)?;
    param
        .set_flags(flags)
        .foreign_err(|| Error::Verification)?;
    if let Some(host) = host {
        param
            .set_host(host)
            .foreign_err(|| Error::Verification)
            .ctx(|| format!("invalid host name [{host}]"))?;
    }

    let mut builder = X509StoreBuilder::new().foreign_err(|| Error::Verification)?;
    builder
        .set_param(&param)
        .foreign_err(|| Error::Verification)?;

    Ok(builder)
}

/// Helper method for converting certificates to `Stack<x509>`.
fn chain_to_stack(chain: impl IntoIterator<Item = X509>) -> Result<Stack<X509>> {
    let mut stack = Stack::new().foreign_err(|| Error::Verification)?;

    for cert in chain {
        stack.push(cert).foreign_err(|| Error::Verification)?;
    }

    Ok(stack)
}

/// Wrap a closure calling OpenSSL with low-level cleanup of the thread's error stack.
///
/// Try to make the closure as small as possible.
pub(crate) fn clean_up_after_openssl<T>(
    f: impl FnOnce() -> std::result::Result<T, ErrorStack>,
) -> std::result::Result<T, ErrorStack> {
    let return_value = f()?;

    // The call succeeded, so anything left on the error stack is stale.
    drop(ErrorStack::get());

    Ok(return_value)
}
