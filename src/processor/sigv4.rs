//! AWS Signature Version 4 request signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{Result, RouterError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub struct Credentials<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

/// The parts of an HTTP request covered by the signature.
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Already canonical: sorted and URI-encoded.
    pub query: &'a str,
    /// Lowercase header names. Must include `host`.
    pub headers: BTreeMap<String, String>,
    pub payload: &'a [u8],
}

/// Headers to attach to the outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedHeaders {
    pub amz_date: String,
    pub authorization: String,
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| RouterError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn canonical_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl SignableRequest<'_> {
    fn signed_header_names(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    fn canonical_request(&self) -> String {
        let mut canonical_headers = String::new();
        for (name, value) in &self.headers {
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(&canonical_header_value(value));
            canonical_headers.push('\n');
        }

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.query,
            canonical_headers,
            self.signed_header_names(),
            sha256_hex(self.payload)
        )
    }
}

/// Sign `request` for `service` in `region` at time `now`.
///
/// If `request.headers` carries `x-amz-date` it must match `now`.
pub fn sign(
    request: &SignableRequest<'_>,
    credentials: &Credentials<'_>,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date_stamp, region, service);

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(request.canonical_request().as_bytes())
    );

    let key = signing_key(credentials.secret_key, &date_stamp, region, service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        credentials.access_key,
        scope,
        request.signed_header_names(),
        signature
    );

    Ok(SignedHeaders {
        amz_date,
        authorization,
    })
}
