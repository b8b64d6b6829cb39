use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
const PBKDF2_SALT_LEN: usize = 16;
const PBKDF2_KEY_LEN: usize = 32;

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison. Unequal lengths compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn base64url_decode(data: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data).ok()
}

/// Derive a PBKDF2-SHA256 hash in the stored form
/// `pbkdf2_sha256$<iterations>$<salt b64>$<dk b64>`.
pub fn pbkdf2_hash(password: &str) -> String {
    use rand::RngCore;
    let mut salt = [0u8; PBKDF2_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    pbkdf2_hash_with(password, &salt, PBKDF2_ITERATIONS)
}

fn pbkdf2_hash_with(password: &str, salt: &[u8], iterations: u32) -> String {
    let mut dk = [0u8; PBKDF2_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut dk);
    format!(
        "pbkdf2_sha256${}${}${}",
        iterations,
        STANDARD.encode(salt),
        STANDARD.encode(dk)
    )
}

/// Verify a password against a stored `pbkdf2_sha256$...` string.
pub fn pbkdf2_verify(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    if parts.next() != Some("pbkdf2_sha256") {
        return false;
    }
    let Some(iterations) = parts.next().and_then(|s| s.parse::<u32>().ok()) else {
        return false;
    };
    let Some(salt) = parts.next().and_then(|s| STANDARD.decode(s).ok()) else {
        return false;
    };
    let Some(expected) = parts.next().and_then(|s| STANDARD.decode(s).ok()) else {
        return false;
    };

    let mut dk = vec![0u8; expected.len()];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut dk);
    constant_time_eq(&dk, &expected)
}

pub fn bcrypt_verify(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hmac_matches_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn base64url_round_trip() {
        let data = b"\xff\xfe{\"scope\":\"web\"}";
        let encoded = base64url_encode(data);
        assert!(!encoded.contains('='));
        assert_eq!(base64url_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn pbkdf2_hash_verifies_and_rejects() {
        let stored = pbkdf2_hash_with("Hunter#2026x", b"0123456789abcdef", 1000);
        assert!(stored.starts_with("pbkdf2_sha256$1000$"));
        assert!(pbkdf2_verify("Hunter#2026x", &stored));
        assert!(!pbkdf2_verify("hunter#2026x", &stored));
    }

    #[test]
    fn pbkdf2_verify_rejects_malformed() {
        assert!(!pbkdf2_verify("x", "bcrypt$whatever"));
        assert!(!pbkdf2_verify("x", "pbkdf2_sha256$notanumber$AA$AA"));
        assert!(!pbkdf2_verify("x", ""));
    }

    #[test]
    fn bcrypt_verify_accepts_real_hash() {
        let hash = bcrypt::hash("DesktopUser#2026", 4).unwrap();
        assert!(bcrypt_verify("DesktopUser#2026", &hash));
        assert!(!bcrypt_verify("wrong", &hash));
    }
}
