//! AWS Signature Version 4 request signing.
//!
//! [`sign`] is a pure transform: given the same request, body, timestamp and
//! credentials it always produces the same `Authorization` header. It runs once per
//! request, before the executor sees it; retries resend the signed request unchanged.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use ring::{digest, hmac};
use url::Url;

use crate::error::LLMError;
use crate::http::HttpRequest;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const REQUEST_TYPE: &str = "aws4_request";
const TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const DATE_FORMAT: &str = "%Y%m%d";

/// Default service name in the credential scope.
pub const BEDROCK_SERVICE: &str = "bedrock";

/// Credentials and scope used to sign requests.
///
/// Constructed once per adapter and shared read-only across calls. `Debug` output
/// redacts the secret key and session token.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub service: String,
}

impl SigningContext {
    pub fn new(
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            service: BEDROCK_SERVICE.to_string(),
        }
    }

    /// Adds temporary-credential session token; empty tokens are ignored.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.session_token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// `date8/region/service/aws4_request`.
    pub fn credential_scope(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/{REQUEST_TYPE}",
            timestamp.format(DATE_FORMAT),
            self.region,
            self.service
        )
    }
}

impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("service", &self.service)
            .finish()
    }
}

/// Signs `request` in place.
///
/// Sets `X-Amz-Date`, `X-Amz-Security-Token` (when a session token is configured),
/// `Host` (when absent), `X-Amz-Content-Sha256` and finally `Authorization`.
///
/// # Errors
///
/// Returns [`LLMError::Signing`] when the request URL cannot be parsed or has no host.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use relaycore::http::HttpRequest;
/// use relaycore::sigv4::{SigningContext, sign};
///
/// let body = br#"{"messages":[]}"#.to_vec();
/// let mut request = HttpRequest::post_json(
///     "https://bedrock-runtime.us-east-1.amazonaws.com/model/m/converse",
///     body.clone(),
/// );
/// let context = SigningContext::new("us-east-1", "AKIDEXAMPLE", "secret");
/// let at = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 45).unwrap();
///
/// sign(&mut request, &body, at, &context).unwrap();
/// let auth = request.header("authorization").unwrap();
/// assert!(auth.starts_with(
///     "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240115/us-east-1/bedrock/aws4_request"
/// ));
/// ```
pub fn sign(
    request: &mut HttpRequest,
    body: &[u8],
    timestamp: DateTime<Utc>,
    context: &SigningContext,
) -> Result<(), LLMError> {
    let url = Url::parse(&request.url).map_err(|err| LLMError::Signing {
        message: format!("invalid request URL {:?}: {err}", request.url),
    })?;
    let amz_date = timestamp.format(TIME_FORMAT).to_string();

    request.set_header("X-Amz-Date", amz_date.clone());
    if let Some(token) = &context.session_token {
        request.set_header("X-Amz-Security-Token", token.clone());
    }
    if request.header("host").is_none() {
        request.set_header("Host", host_header(&url)?);
    }

    let payload_hash = sha256_hex(body);
    request.set_header("X-Amz-Content-Sha256", payload_hash.clone());

    let headers = canonical_headers(request);
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_request = canonical_request(
        request.method.as_str(),
        &canonical_uri(&url),
        &canonical_query_string(&url),
        &headers,
        &signed_headers,
        &payload_hash,
    );

    let scope = context.credential_scope(timestamp);
    let string_to_sign = string_to_sign(&amz_date, &scope, &canonical_request);
    let key = signing_key(
        &context.secret_access_key,
        &timestamp.format(DATE_FORMAT).to_string(),
        &context.region,
        &context.service,
    );
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    request.set_header(
        "Authorization",
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            context.access_key_id
        ),
    );
    tracing::trace!(%scope, %signed_headers, "signed request");
    Ok(())
}

/// `host[:port]`, with the scheme's default port omitted.
pub fn host_header(url: &Url) -> Result<String, LLMError> {
    let host = url.host_str().ok_or_else(|| LLMError::Signing {
        message: format!("request URL {url} has no host"),
    })?;
    // `Url::port` is `None` for the scheme's default port.
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Query pairs sorted by key then value, each side RFC 3986 encoded.
///
/// # Examples
///
/// ```
/// use relaycore::sigv4::canonical_query_string;
/// use url::Url;
///
/// let url = Url::parse("https://example.com/?b=2&a=hello world&a=1").unwrap();
/// assert_eq!(canonical_query_string(&url), "a=1&a=hello%20world&b=2");
/// ```
pub fn canonical_query_string(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Every path segment encoded once more on top of the URL's own encoding.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lowercased header names (without `authorization`) mapped to trimmed values.
fn canonical_headers(request: &HttpRequest) -> BTreeMap<String, String> {
    let mut sorted: Vec<(&String, &String)> = request.headers.iter().collect();
    sorted.sort();

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in sorted {
        let name = name.to_ascii_lowercase();
        if name == "authorization" {
            continue;
        }
        let value = value.trim();
        headers
            .entry(name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}

fn canonical_request(
    method: &str,
    uri: &str,
    query: &str,
    headers: &BTreeMap<String, String>,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    format!("{method}\n{uri}\n{query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}")
}

fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    )
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, REQUEST_TYPE.as_bytes())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data))
}
