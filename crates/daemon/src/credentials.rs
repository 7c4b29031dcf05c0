// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store: CA keypair, leaf keypair, invite token.
//!
//! Generated lazily on first boot and persisted in the sensitive blob.
//! The CA is an ECDSA P-256 self-signed certificate with a ten-year
//! validity; the leaf is signed by it at generation time. The invite
//! token is 256 bits of OS randomness, base64url encoded, compared in
//! constant time, and rotated atomically on successful redemption.

use parking_lot::Mutex;
use porpulsion_storage::{RegistryError, StateRegistry};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

const CA_VALIDITY_DAYS: i64 = 3650;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("invalid certificate PEM: {0}")]
    BadPem(String),
    #[error("invite token invalid")]
    InviteTokenInvalid,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone)]
struct Credentials {
    ca_pem: String,
    leaf_pem: String,
    fingerprint: String,
}

/// Loads or generates the agent's key material. Certificates are
/// write-once; only the invite token mutates after init.
pub struct CredentialStore {
    registry: Arc<StateRegistry>,
    cached: Mutex<Credentials>,
}

impl CredentialStore {
    /// Load existing credentials from the sensitive blob, generating and
    /// persisting fresh ones on first boot.
    pub fn init(registry: Arc<StateRegistry>, agent_name: &str) -> Result<Self, CredentialError> {
        let sensitive = registry.sensitive();

        let credentials = match (&sensitive.ca_pem, &sensitive.leaf_pem) {
            (Some(ca_pem), Some(leaf_pem)) => {
                let fingerprint = fingerprint_pem(ca_pem)?;
                tracing::info!(%fingerprint, "loaded CA certificate");
                Credentials { ca_pem: ca_pem.clone(), leaf_pem: leaf_pem.clone(), fingerprint }
            }
            _ => {
                let generated = generate(agent_name)?;
                let fingerprint = fingerprint_pem(&generated.ca_pem)?;
                registry.mutate_sensitive(|s| {
                    s.ca_pem = Some(generated.ca_pem.clone());
                    s.ca_key = Some(generated.ca_key.clone());
                    s.leaf_pem = Some(generated.leaf_pem.clone());
                    s.leaf_key = Some(generated.leaf_key.clone());
                    Ok(())
                })?;
                tracing::info!(%fingerprint, "generated ECDSA P-256 CA (10-year validity)");
                Credentials {
                    ca_pem: generated.ca_pem,
                    leaf_pem: generated.leaf_pem,
                    fingerprint,
                }
            }
        };

        if sensitive.invite_token.is_none() {
            let token = new_invite_token();
            registry.mutate_sensitive(|s| {
                s.invite_token = Some(token.clone());
                Ok(())
            })?;
            tracing::info!("generated initial invite token");
        }

        Ok(Self { registry, cached: Mutex::new(credentials) })
    }

    pub fn ca_pem(&self) -> String {
        self.cached.lock().ca_pem.clone()
    }

    pub fn leaf_pem(&self) -> String {
        self.cached.lock().leaf_pem.clone()
    }

    /// SHA-256 of the DER-encoded CA certificate, lowercase colon-hex.
    pub fn fingerprint(&self) -> String {
        self.cached.lock().fingerprint.clone()
    }

    pub fn invite_token(&self) -> String {
        self.registry.sensitive().invite_token.unwrap_or_default()
    }

    /// Replace the invite token unconditionally.
    pub fn rotate_invite(&self) -> Result<String, CredentialError> {
        let token = new_invite_token();
        self.registry.mutate_sensitive(|s| {
            s.invite_token = Some(token.clone());
            Ok(())
        })?;
        tracing::info!("invite token rotated");
        Ok(token)
    }

    /// Redeem a presented invite token. Constant-time compare; on success
    /// the token rotates within the same persisted write, so a concurrent
    /// redeem of the old value can succeed at most once.
    pub fn redeem(&self, presented: &str) -> Result<String, CredentialError> {
        let next = new_invite_token();
        let swapped = self.registry.mutate_sensitive(|s| {
            let current = s.invite_token.as_deref().unwrap_or("");
            let matches: bool = current.as_bytes().ct_eq(presented.as_bytes()).into();
            if matches {
                s.invite_token = Some(next.clone());
            }
            Ok(matches)
        })?;
        if swapped {
            Ok(next)
        } else {
            Err(CredentialError::InviteTokenInvalid)
        }
    }
}

struct Generated {
    ca_pem: String,
    ca_key: String,
    leaf_pem: String,
    leaf_key: String,
}

/// Generate a fresh CA and a leaf signed by it.
fn generate(agent_name: &str) -> Result<Generated, CredentialError> {
    let now = time::OffsetDateTime::now_utc();

    // CA: ECDSA P-256, self-signed, ten-year validity.
    let ca_key = rcgen::KeyPair::generate()?;
    let mut ca_params = rcgen::CertificateParams::new(Vec::new())?;
    let mut ca_dn = rcgen::DistinguishedName::new();
    ca_dn.push(rcgen::DnType::CommonName, format!("porpulsion-ca-{agent_name}"));
    ca_params.distinguished_name = ca_dn;
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    ca_params.not_before = now;
    ca_params.not_after = now + time::Duration::days(CA_VALIDITY_DAYS);
    let ca_cert = ca_params.self_signed(&ca_key)?;

    // Leaf: signed by the CA, same validity window.
    let leaf_key = rcgen::KeyPair::generate()?;
    let mut leaf_params = rcgen::CertificateParams::new(vec![
        agent_name.to_string(),
        "localhost".to_string(),
    ])?;
    let mut leaf_dn = rcgen::DistinguishedName::new();
    leaf_dn.push(rcgen::DnType::CommonName, agent_name.to_string());
    leaf_params.distinguished_name = leaf_dn;
    leaf_params.not_before = now;
    leaf_params.not_after = now + time::Duration::days(CA_VALIDITY_DAYS);
    let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key)?;

    Ok(Generated {
        ca_pem: ca_cert.pem(),
        ca_key: ca_key.serialize_pem(),
        leaf_pem: leaf_cert.pem(),
        leaf_key: leaf_key.serialize_pem(),
    })
}

/// 256-bit OS-random token, base64url without padding (43 chars).
pub fn new_invite_token() -> String {
    use base64::Engine;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 fingerprint of the first certificate in a PEM, over its DER
/// encoding, rendered lowercase hex with colons.
pub fn fingerprint_pem(pem: &str) -> Result<String, CredentialError> {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| CredentialError::BadPem(format!("{e:?}")))?;
    if parsed.label != "CERTIFICATE" {
        return Err(CredentialError::BadPem(format!("unexpected PEM label {}", parsed.label)));
    }
    let digest = Sha256::digest(&parsed.contents);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":"))
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
