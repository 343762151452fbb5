// splitpay/src/certificate.rs
// PKCS#12 client certificate extraction for the direct PIX mTLS transport

use base64::{engine::general_purpose, Engine as _};
use p12::PFX;

use crate::error::{Result, SplitError};

/// Certificate chain and private key pulled out of a PKCS#12 bundle.
///
/// Immutable once loaded; the transport client built from it can be shared
/// for the lifetime of the configuration it came from.
#[derive(Clone)]
pub struct ClientCertificate {
    /// DER certificates, leaf first
    pub chain: Vec<Vec<u8>>,
    /// PKCS#8 DER private key
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("chain_len", &self.chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ClientCertificate {
    /// Decodes a base64 PKCS#12 bundle. Fails with `SplitError::Certificate`
    /// for bad base64, a malformed bundle, a wrong password, or a bundle with
    /// no certificate or no private key.
    pub fn from_base64_pkcs12(bundle_b64: &str, password: &str) -> Result<Self> {
        let cleaned: String = bundle_b64.chars().filter(|c| !c.is_whitespace()).collect();
        let der = general_purpose::STANDARD
            .decode(cleaned)
            .map_err(|e| SplitError::Certificate(format!("bundle is not valid base64: {}", e)))?;

        Self::from_pkcs12_der(&der, password)
    }

    pub fn from_pkcs12_der(der: &[u8], password: &str) -> Result<Self> {
        let pfx = PFX::parse(der)
            .map_err(|e| SplitError::Certificate(format!("malformed PKCS#12 bundle: {:?}", e)))?;

        if !pfx.verify_mac(password) {
            return Err(SplitError::Certificate(
                "PKCS#12 integrity check failed, the import password is wrong".to_string(),
            ));
        }

        let chain = pfx
            .cert_x509_bags(password)
            .map_err(|e| SplitError::Certificate(format!("unable to read certificates: {:?}", e)))?;
        if chain.is_empty() {
            return Err(SplitError::Certificate(
                "PKCS#12 bundle contains no certificate".to_string(),
            ));
        }

        let private_key = pfx
            .key_bags(password)
            .map_err(|e| SplitError::Certificate(format!("unable to read private key: {:?}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                SplitError::Certificate("PKCS#12 bundle contains no private key".to_string())
            })?;

        Ok(Self { chain, private_key })
    }

    /// Key followed by the chain, PEM encoded, as the rustls identity loader expects
    pub fn to_pem(&self) -> String {
        let mut blocks = vec![pem::Pem::new("PRIVATE KEY", self.private_key.clone())];
        blocks.extend(
            self.chain
                .iter()
                .map(|cert| pem::Pem::new("CERTIFICATE", cert.clone())),
        );
        pem::encode_many(&blocks)
    }

    pub fn to_identity(&self) -> Result<reqwest::Identity> {
        reqwest::Identity::from_pem(self.to_pem().as_bytes())
            .map_err(|e| SplitError::Certificate(format!("certificate rejected by TLS stack: {}", e)))
    }
}
