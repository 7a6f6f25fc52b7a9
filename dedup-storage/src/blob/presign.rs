use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::BackendError;

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of a download URL.
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct PresignConfig {
    /// Public base URL objects are served under, without trailing slash.
    pub base_url: String,
    pub secret: String,
}

/// Signs and verifies time-limited download URLs of the form
/// `<base>/<bucket>/<key>?expires=<unix>&signature=<hex>`.
#[derive(Debug, Clone)]
pub struct Presigner {
    config: PresignConfig,
}

impl Presigner {
    pub fn new(mut config: PresignConfig) -> Self {
        while config.base_url.ends_with('/') {
            config.base_url.pop();
        }
        Self { config }
    }

    fn mac(&self, bucket: &str, key: &str, expires: i64) -> Result<HmacSha256, BackendError> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| BackendError::InvalidPresign(e.to_string()))?;
        mac.update(bucket.as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Builds a URL for `bucket/key` expiring `ttl` after `now` (unix seconds).
    pub fn sign(
        &self,
        bucket: &str,
        key: &str,
        now: i64,
        ttl: Duration,
    ) -> Result<String, BackendError> {
        let expires = now + ttl.as_secs() as i64;
        let digest = self.mac(bucket, key, expires)?.finalize().into_bytes();
        let signature = faster_hex::hex_string(&digest);
        Ok(format!(
            "{}/{}/{}?expires={}&signature={}",
            self.config.base_url,
            bucket,
            urlencoding::encode(key),
            expires,
            signature
        ))
    }

    /// Checks a URL produced by [`Presigner::sign`] and returns the bucket and
    /// key it grants access to.
    pub fn verify(&self, url: &str, now: i64) -> Result<(String, String), BackendError> {
        let invalid = |msg: &str| BackendError::InvalidPresign(msg.to_string());

        let rest = url
            .strip_prefix(self.config.base_url.as_str())
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| invalid("foreign base url"))?;
        let (location, query) = rest.split_once('?').ok_or_else(|| invalid("missing query"))?;
        let (bucket, encoded_key) = location
            .split_once('/')
            .ok_or_else(|| invalid("missing object key"))?;
        let key = urlencoding::decode(encoded_key)
            .map_err(|e| BackendError::InvalidPresign(e.to_string()))?
            .into_owned();

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = Some(v),
                _ => {}
            }
        }
        let expires = expires.ok_or_else(|| invalid("missing expires"))?;
        let signature = signature.ok_or_else(|| invalid("missing signature"))?;

        if expires < now {
            return Err(invalid("url expired"));
        }
        let mut raw = vec![0u8; signature.len() / 2];
        faster_hex::hex_decode(signature.as_bytes(), &mut raw)
            .map_err(|_| invalid("malformed signature"))?;
        self.mac(bucket, &key, expires)?
            .verify_slice(&raw)
            .map_err(|_| invalid("signature mismatch"))?;

        Ok((bucket.to_string(), key))
    }
}
