use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Claim cooldown shared by the income and bonus engines. The display
/// countdown and the authoritative in-transaction check both go through
/// these two functions so they can never diverge.
pub const CLAIM_WINDOW_HOURS: i64 = 24;

pub fn claim_window() -> Duration {
    Duration::hours(CLAIM_WINDOW_HOURS)
}

/// True once a full window has elapsed since `anchor`. A `None` anchor means
/// the window never started, so the claim is immediately due.
pub fn claim_due(now: DateTime<Utc>, anchor: Option<DateTime<Utc>>) -> bool {
    match anchor {
        Some(anchor) => now - anchor >= claim_window(),
        None => true,
    }
}

/// Seconds left until the next claim becomes due. Zero when already due.
pub fn claim_remaining_secs(now: DateTime<Utc>, anchor: Option<DateTime<Utc>>) -> i64 {
    match anchor {
        Some(anchor) => (claim_window() - (now - anchor)).num_seconds().max(0),
        None => 0,
    }
}

/// Basis-point share of an amount. Computed wide so any `i64` input,
/// including hostile request bodies, stays panic-free.
pub fn basis_points(amount: i64, bp: i64) -> i64 {
    (amount as i128 * bp as i128 / 10_000) as i64
}

/// Collection key with an embedded creation timestamp and a random suffix.
/// Unique within its parent collection; chronological sorting stays the job
/// of the embedded record timestamp, not the key.
pub fn history_key(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, now.timestamp_millis(), &suffix[..5])
}

/// Fixed-width 5-digit numeric referral code. Uniqueness is enforced by the
/// registry, which regenerates on collision.
pub fn referral_code() -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    format!("{}", 10_000 + raw % 90_000)
}

pub fn session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Salted sha256, hex encoded. The original compared plain secrets by
/// equality; storing only the salted digest preserves the external
/// mobile + secret contract without keeping the secret around.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn verify_password(password: &str, salt: &str, hash: &str) -> bool {
    hash_password(password, salt) == hash
}

/// Bangladeshi mobile format: 11 digits, `01`, operator digit 3-9.
pub fn valid_mobile_number(mobile: &str) -> bool {
    let bytes = mobile.as_bytes();
    bytes.len() == 11
        && bytes[0] == b'0'
        && bytes[1] == b'1'
        && (b'3'..=b'9').contains(&bytes[2])
        && bytes[2..].iter().all(|b| b.is_ascii_digit())
}

/// Payment references are exactly 10 alphanumeric characters.
pub fn valid_trx_reference(trx_id: &str) -> bool {
    trx_id.len() == 10 && trx_id.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h % 24, 0, 0).unwrap() + Duration::days((h / 24) as i64)
    }

    #[test]
    fn claim_due_at_window_boundary() {
        let anchor = Some(at(0));
        assert!(!claim_due(at(23), anchor));
        assert!(claim_due(at(24), anchor));
        assert!(claim_due(at(25), anchor));
    }

    #[test]
    fn never_claimed_is_immediately_due() {
        assert!(claim_due(at(0), None));
        assert_eq!(claim_remaining_secs(at(0), None), 0);
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let anchor = Some(at(0));
        assert_eq!(claim_remaining_secs(at(23), anchor), 3600);
        assert_eq!(claim_remaining_secs(at(24), anchor), 0);
        assert_eq!(claim_remaining_secs(at(30), anchor), 0);
    }

    #[test]
    fn basis_points_survives_extreme_amounts() {
        assert_eq!(basis_points(100_000, 700), 7_000);
        assert_eq!(basis_points(0, 700), 0);
        let fee = basis_points(i64::MAX, 700);
        assert_eq!(fee, (i64::MAX as i128 * 700 / 10_000) as i64);
        assert!(fee > 0);
    }

    #[test]
    fn referral_code_is_five_digits() {
        for _ in 0..64 {
            let code = referral_code();
            assert_eq!(code.len(), 5);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(code.as_bytes()[0], b'0');
        }
    }

    #[test]
    fn password_round_trip() {
        let salt = new_salt();
        let hash = hash_password("secret123", &salt);
        assert!(verify_password("secret123", &salt, &hash));
        assert!(!verify_password("secret124", &salt, &hash));
        assert!(!verify_password("secret123", "othersalt", &hash));
    }

    #[test]
    fn mobile_format() {
        assert!(valid_mobile_number("01712345678"));
        assert!(!valid_mobile_number("01212345678")); // bad operator digit
        assert!(!valid_mobile_number("0171234567")); // too short
        assert!(!valid_mobile_number("02712345678"));
        assert!(!valid_mobile_number("0171234567a"));
    }

    #[test]
    fn trx_reference_format() {
        assert!(valid_trx_reference("AB12CD34EF"));
        assert!(!valid_trx_reference("AB12CD34E")); // 9 chars
        assert!(!valid_trx_reference("AB12CD34E!"));
    }
}
