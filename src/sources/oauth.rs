//! OAuth 1.0a request signing (HMAC-SHA1) for the Twitter REST API.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;

/// User-context credentials of the monitoring app.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

/// Per-request values that must differ between requests.
pub struct Nonce {
    pub nonce: String,
    pub timestamp: i64,
}

impl Nonce {
    pub fn generate() -> Self {
        Self {
            nonce: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

impl Credentials {
    /// Build `Authorization` header value for request.
    /// `params` are query (or form) parameters of the request, unencoded.
    pub fn authorization(&self, method: &str, url: &str, params: &[(&str, &str)], nonce: &Nonce) -> String {
        let timestamp = nonce.timestamp.to_string();
        let oauth = [
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_nonce", nonce.nonce.as_str()),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_token", self.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let signature = self.signature(&base_string(method, url, params.iter().chain(oauth.iter())));

        let mut header = String::from("OAuth ");
        let fields = oauth
            .iter()
            .map(|(k, v)| (*k, *v))
            .chain(std::iter::once(("oauth_signature", signature.as_str())))
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        header.push_str(&fields);

        header
    }

    fn signature(&self, base: &str) -> String {
        let key = format!("{}&{}", encode(&self.consumer_secret), encode(&self.access_token_secret));

        // HMAC accepts keys of any length
        let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes()).expect("hmac key");
        mac.update(base.as_bytes());

        STANDARD.encode(mac.finalize().into_bytes())
    }
}

fn base_string<'a>(method: &str, url: &str, params: impl Iterator<Item = &'a (&'a str, &'a str)>) -> String {
    let mut encoded: Vec<(String, String)> = params.map(|(k, v)| (encode(k), encode(v))).collect();
    encoded.sort();

    let params = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}&{}&{}", method.to_uppercase(), encode(url), encode(&params))
}
