//! AWS Signature Version 4 for JSON POST requests

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub struct Signer<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

impl Signer<'_> {
    /// Headers to attach to a signed `POST https://{host}{path}` carrying `payload`
    pub fn sign_post(
        &self,
        host: &str,
        path: &str,
        target: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        // Header names in sorted order
        let headers = [
            ("content-encoding", "amz-1.0".to_string()),
            ("content-type", "application/json; charset=utf-8".to_string()),
            ("host", host.to_string()),
            ("x-amz-date", amz_date.clone()),
            ("x-amz-target", target.to_string()),
        ];
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{}",
            sha256_hex(payload.as_bytes())
        );
        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let key = signing_key(self.secret_key, &date, self.region, self.service);
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));
        let authorization = format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        );

        let mut out: Vec<(&'static str, String)> = headers.into_iter().collect();
        out.push(("authorization", authorization));
        out
    }
}

pub fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signing_key_matches_aws_example() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_sign_post_headers() {
        let signer = Signer {
            access_key: "AKIDEXAMPLE",
            secret_key: "secret",
            region: "us-east-1",
            service: "ProductAdvertisingAPI",
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).unwrap();
        let headers = signer.sign_post(
            "webservices.amazon.com",
            "/paapi5/getitems",
            "com.amazon.paapi5.v1.ProductAdvertisingAPIv1.GetItems",
            "{}",
            now,
        );

        let get = |name: &str| headers.iter().find(|(n, _)| *n == name).map(|(_, v)| v.clone());
        assert_eq!(get("x-amz-date").as_deref(), Some("20240309T123000Z"));
        let auth = get("authorization").unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240309/us-east-1/ProductAdvertisingAPI/aws4_request, "
        ));
        assert!(auth.contains("SignedHeaders=content-encoding;content-type;host;x-amz-date;x-amz-target"));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);

        // Deterministic for identical input
        let again = signer.sign_post(
            "webservices.amazon.com",
            "/paapi5/getitems",
            "com.amazon.paapi5.v1.ProductAdvertisingAPIv1.GetItems",
            "{}",
            now,
        );
        assert_eq!(headers, again);
    }
}
