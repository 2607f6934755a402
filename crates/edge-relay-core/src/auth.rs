//! Broker client context and AWS MSK IAM token signing.
//!
//! MSK IAM authentication rides on SASL `OAUTHBEARER`: the token is a
//! SigV4-presigned `kafka-cluster:Connect` URL for the regional service
//! endpoint, base64url-encoded, signed with the access/secret key pair
//! and refreshed by librdkafka before expiry. [`RelayContext`] is the
//! client context for every endpoint client; it only produces tokens
//! when a signer is configured.

use std::error::Error;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rdkafka::client::{ClientContext, OAuthToken};
use rdkafka::consumer::ConsumerContext;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::SaslCredentials;

const SERVICE: &str = "kafka-cluster";
const ACTION: &str = "kafka-cluster:Connect";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const TOKEN_LIFETIME_SECS: i64 = 900;
const USER_AGENT: &str = concat!("edge-relay/", env!("CARGO_PKG_VERSION"));

/// Client context shared by every endpoint client.
///
/// Token refresh events only fire on `OAUTHBEARER` connections, so the
/// context is inert for clusters using other mechanisms or none.
#[derive(Clone, Default)]
pub struct RelayContext {
    iam: Option<MskIamSigner>,
}

impl RelayContext {
    #[must_use]
    pub fn new(iam: Option<MskIamSigner>) -> Self {
        Self { iam }
    }
}

impl ClientContext for RelayContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn Error>> {
        match &self.iam {
            Some(signer) => {
                debug!("generating msk iam auth token");
                Ok(signer.token_at(Utc::now()))
            }
            None => Err("no oauthbearer token source configured".into()),
        }
    }
}

impl ConsumerContext for RelayContext {}

/// Signs MSK IAM auth tokens with an access/secret key pair.
#[derive(Clone)]
pub struct MskIamSigner {
    access_key: String,
    secret_key: String,
    region: String,
}

impl MskIamSigner {
    #[must_use]
    pub fn new(credentials: &SaslCredentials) -> Self {
        Self {
            access_key: credentials.username.clone(),
            secret_key: credentials.password.clone(),
            region: credentials.aws_region.clone(),
        }
    }

    /// Build the token for the given signing time. The principal is the
    /// access key id; the secret key only ever feeds the signature.
    #[must_use]
    pub fn token_at(&self, now: DateTime<Utc>) -> OAuthToken {
        let url = format!("{}&User-Agent={USER_AGENT}", self.presigned_url(now));
        OAuthToken {
            token: URL_SAFE_NO_PAD.encode(url),
            principal_name: self.access_key.clone(),
            lifetime_ms: now.timestamp_millis() + TOKEN_LIFETIME_SECS * 1000,
        }
    }

    /// SigV4 query-presigned `kafka-cluster:Connect` request against the
    /// regional MSK endpoint.
    fn presigned_url(&self, now: DateTime<Utc>) -> String {
        let host = format!("kafka.{}.amazonaws.com", self.region);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let datestamp = now.format("%Y%m%d").to_string();
        let scope = format!("{datestamp}/{}/{SERVICE}/aws4_request", self.region);
        let credential = format!("{}/{scope}", self.access_key);

        // Keys are already in canonical (sorted) order.
        let query = [
            ("Action", ACTION),
            ("X-Amz-Algorithm", ALGORITHM),
            ("X-Amz-Credential", credential.as_str()),
            ("X-Amz-Date", amz_date.as_str()),
            ("X-Amz-Expires", "900"),
            ("X-Amz-SignedHeaders", "host"),
        ]
        .iter()
        .map(|(k, v)| format!("{}={}", aws_escape(k), aws_escape(v)))
        .collect::<Vec<_>>()
        .join("&");

        let canonical_request = format!(
            "GET\n/\n{query}\nhost:{host}\n\nhost\n{}",
            hex(&Sha256::digest(b""))
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex(&Sha256::digest(canonical_request.as_bytes()))
        );

        let mut key = hmac(format!("AWS4{}", self.secret_key).as_bytes(), &datestamp);
        key = hmac(&key, &self.region);
        key = hmac(&key, SERVICE);
        key = hmac(&key, "aws4_request");
        let signature = hex(&hmac(&key, &string_to_sign));

        format!("https://{host}/?{query}&X-Amz-Signature={signature}")
    }
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Percent-encode everything outside the SigV4 unreserved set.
fn aws_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(b));
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
