use std::time::Duration;

use der::{asn1::Ia5String, Encode as _};
use pkcs8::EncodePrivateKey as _;
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
    request::CertReq,
};
use zeroize::Zeroizing;

use crate::{
    client::AcmeAccount,
    issue::{poll::Deadline, Phase, PollingConfig, RunState},
    Error, OrderStatus, Result,
};

/// Creates a CSR for `domains` with `common_name` as subject CN, signed with `signer`.
///
/// Every domain goes into the Subject Alternative Name extension, in the given order.
pub fn create_csr(
    signer: &p256::ecdsa::SigningKey,
    domains: &[String],
    common_name: &str,
) -> Result<CertReq> {
    let subject = format!("CN={}", escape_dn_value(common_name))
        .parse::<Name>()
        .map_err(|err| Error::Key(format!("invalid common name {common_name:?}: {err}")))?;

    let sans = domains
        .iter()
        .map(|domain| {
            Ia5String::new(domain)
                .map(GeneralName::DnsName)
                .map_err(|err| Error::Key(format!("invalid domain {domain:?}: {err}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut csr = CsrBuilder::new(subject, signer).map_err(csr_error)?;
    csr.add_extension(&SubjectAltName(sans))
        .map_err(csr_error)?;

    csr.build::<p256::ecdsa::DerSignature>().map_err(csr_error)
}

fn csr_error(err: impl std::fmt::Display) -> Error {
    Error::Key(format!("failed to build CSR: {err}"))
}

/// Escapes RFC 4514 special characters.
fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for (idx, c) in value.chars().enumerate() {
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';') || (idx == 0 && c == '#') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

/// Submits the CSR and waits for the CA to finish processing it.
#[derive(Debug)]
pub struct OrderFinalizer {
    interval: Duration,
}

impl OrderFinalizer {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            interval: config.finalize_interval,
        }
    }

    /// Finalizes the order in `state` with a CSR signed by `request_key` and returns the key as
    /// PKCS#8 PEM.
    ///
    /// Polls at a fixed interval while the order is `processing`. An order ending up `invalid`
    /// is [`Error::OrderInvalid`].
    pub async fn finalize<A: AcmeAccount>(
        &self,
        state: &mut RunState<A>,
        request_key: &p256::ecdsa::SigningKey,
        domains: &[String],
        common_name: &str,
        deadline: &Deadline,
    ) -> Result<Zeroizing<String>> {
        let csr = create_csr(request_key, domains, common_name)?;

        // DER, not PEM
        let csr_der = csr.to_der().map_err(csr_error)?;

        state.account.finalize_order(&state.order, &csr_der).await?;
        log::info!("Submitted CSR for {}", domains.join(", "));

        loop {
            match state.account.poll_order_status(&mut state.order).await? {
                OrderStatus::Processing => {}
                OrderStatus::Valid => break,
                OrderStatus::Invalid => {
                    return Err(Error::OrderInvalid {
                        problem: state.order.error.clone(),
                    })
                }
                status => return Err(Error::UnexpectedOrderStatus(status)),
            }

            if deadline.is_expired() {
                return Err(Error::FinalizationStalled {
                    waited: deadline.elapsed(),
                });
            }

            log::debug!("Order still processing");
            deadline.sleep(self.interval).await;
        }

        state.advance(Phase::Finalized);

        request_key
            .to_pkcs8_pem(pem::LineEnding::LF)
            .map_err(|err| Error::Key(format!("failed to encode request key: {err}")))
    }
}
