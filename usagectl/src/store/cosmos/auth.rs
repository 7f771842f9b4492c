//! Master-key request signing for the Cosmos DB REST API.
//!
//! Each request carries an `authorization` header holding an HMAC-SHA256 signature computed over
//! `{verb}\n{resource_type}\n{resource_link}\n{date}\n\n`, where verb, resource type and date are
//! lower-cased. The token is `type=master&ver=1.0&sig={base64 signature}`, url-encoded.
//!
//! See: <https://learn.microsoft.com/rest/api/cosmos-db/access-control-on-cosmosdb-resources>

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Resource kinds addressed by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Database,
    Container,
    Document,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Database => "dbs",
            ResourceType::Container => "colls",
            ResourceType::Document => "docs",
        }
    }
}

/// Decode a base64 master key. Returns `None` for anything that is not valid base64.
pub fn decode_key(key: &str) -> Option<Vec<u8>> {
    let bytes = BASE64_STANDARD.decode(key.trim()).ok()?;
    (!bytes.is_empty()).then_some(bytes)
}

/// RFC 1123 date for the `x-ms-date` header, e.g. `Fri, 01 Mar 2024 12:30:00 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the url-encoded `authorization` header value.
///
/// `resource_link` is the unencoded path without a leading slash, e.g.
/// `dbs/{db}/colls/{coll}/docs/{id}`. For queries it is the parent collection link.
///
/// Returns `None` if the key is rejected by the MAC.
pub fn authorization_token(key: &[u8], verb: &str, resource_type: ResourceType, resource_link: &str, date: &str) -> Option<String> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.as_str(),
        resource_link,
        date.to_lowercase()
    );

    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(payload.as_bytes());
    let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

    let token = format!("type=master&ver=1.0&sig={signature}");
    Some(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
}
