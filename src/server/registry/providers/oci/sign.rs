//! OCI request signing (draft-cavage HTTP signatures with an API key).
//!
//! Every request carries a `date` header and an `Authorization: Signature`
//! header covering `date`, `(request-target)` and `host`; requests with a
//! body additionally cover `content-length`, `content-type` and
//! `x-content-sha256`.
//!
//! https://docs.oracle.com/en-us/iaas/Content/API/Concepts/signingrequests.htm

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};

pub struct RequestSigner {
    /// `tenancy/user/fingerprint`
    key_id: String,
    key: SigningKey<Sha256>,
}

/// Headers to set on the outgoing request, in order.
pub type SignedHeaders = Vec<(&'static str, String)>;

impl RequestSigner {
    pub fn new(tenancy: &str, user: &str, fingerprint: &str, key_pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(key_pem))
            .context("failed to parse RSA private key")?;
        Ok(Self {
            key_id: format!("{tenancy}/{user}/{fingerprint}"),
            key: SigningKey::<Sha256>::new(key),
        })
    }

    /// Sign one request. `path_and_query` must be exactly what goes on the
    /// wire, query string included.
    pub fn sign(
        &self,
        method: &str,
        host: &str,
        path_and_query: &str,
        body: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<SignedHeaders> {
        let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut covered: Vec<(&'static str, String)> = vec![
            ("date", date),
            (
                "(request-target)",
                format!("{} {path_and_query}", method.to_lowercase()),
            ),
            ("host", host.to_string()),
        ];
        if let Some(body) = body {
            covered.push(("content-length", body.len().to_string()));
            covered.push(("content-type", "application/json".to_string()));
            covered.push(("x-content-sha256", BASE64.encode(Sha256::digest(body))));
        }

        let signing_string = covered
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        let signature = self
            .key
            .try_sign(signing_string.as_bytes())
            .context("failed to sign request")?;
        let header_list = covered
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(" ");
        let authorization = format!(
            "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            header_list,
            BASE64.encode(signature.to_bytes()),
        );

        // `(request-target)` and `host` are implied by the request itself
        let mut headers: SignedHeaders = covered
            .into_iter()
            .filter(|(name, _)| *name != "(request-target)" && *name != "host")
            .collect();
        headers.push(("authorization", authorization));
        Ok(headers)
    }
}
