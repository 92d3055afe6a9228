//! Pure outbox filename helpers: parsing and rewriting the retry count
//! encoded in an outbox filename. Kept separate from [`super::OutboxStore`]
//! so the naming scheme is independently unit-testable without touching
//! the filesystem.
//!
//! Name shapes:
//! - fresh:   `resend_<YYYYMMDDHHMMSS>_<ms3>_<rand4>.json`
//! - retried: `resend_<YYYYMMDDHHMMSS>_<ms3>_<rand4>.retryN.json`
//! - failed:  `resend_<YYYYMMDDHHMMSS>_<ms3>_<rand4>.fail`

use chrono::{DateTime, Utc};
use rand::Rng;

/// Builds a fresh outbox filename stamped with `now`.
pub fn new_filename(now: DateTime<Utc>) -> String {
    let base = now.format("%Y%m%d%H%M%S");
    let ms = now.timestamp_subsec_millis();
    let rand_suffix: String = {
        let mut rng = rand::thread_rng();
        (0..4).map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap()).collect()
    };
    format!("resend_{base}_{ms:03}_{rand_suffix}.json")
}

/// Returns the retry count encoded in `filename`'s `.retryN.json` suffix,
/// or `0` for a fresh (never-retried) file.
pub fn extract_retry_count(filename: &str) -> u32 {
    let Some(stem) = filename.strip_suffix(".json") else { return 0 };
    let Some(idx) = stem.rfind(".retry") else { return 0 };
    stem[idx + ".retry".len()..].parse().unwrap_or(0)
}

/// Strips any existing `.retryN.json` / `.json` suffix and re-appends with
/// the retry count incremented by one.
pub fn increment_retry_name(filename: &str) -> String {
    let count = extract_retry_count(filename);
    let base = strip_known_suffix(filename);
    format!("{base}.retry{}.json", count + 1)
}

/// Strips any existing suffix and marks the file permanently failed.
pub fn mark_as_fail(filename: &str) -> String {
    let base = strip_known_suffix(filename);
    format!("{base}.fail")
}

fn strip_known_suffix(filename: &str) -> &str {
    if let Some(stem) = filename.strip_suffix(".json") {
        if let Some(idx) = stem.rfind(".retry") {
            return &stem[..idx];
        }
        return stem;
    }
    filename.strip_suffix(".fail").unwrap_or(filename)
}

pub fn is_retry_file(filename: &str) -> bool {
    let Some(stem) = filename.strip_suffix(".json") else { return false };
    stem.rfind(".retry").is_some()
}

pub fn is_fresh_file(filename: &str) -> bool {
    filename.ends_with(".json") && !is_retry_file(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_file_has_zero_retry_count() {
        assert_eq!(extract_retry_count("resend_20240101120100_000_ab12.json"), 0);
    }

    #[test]
    fn retry_suffix_is_parsed() {
        assert_eq!(extract_retry_count("resend_20240101120100_000_ab12.retry3.json"), 3);
    }

    #[test]
    fn increment_from_fresh_yields_retry1() {
        let next = increment_retry_name("resend_20240101120100_000_ab12.json");
        assert_eq!(next, "resend_20240101120100_000_ab12.retry1.json");
    }

    #[test]
    fn increment_from_retry_n_yields_retry_n_plus_1() {
        let next = increment_retry_name("resend_20240101120100_000_ab12.retry1.json");
        assert_eq!(next, "resend_20240101120100_000_ab12.retry2.json");
    }

    #[test]
    fn mark_as_fail_strips_retry_suffix() {
        let failed = mark_as_fail("resend_20240101120100_000_ab12.retry3.json");
        assert_eq!(failed, "resend_20240101120100_000_ab12.fail");
    }

    #[test]
    fn classification_helpers_agree_with_extract() {
        assert!(is_fresh_file("resend_x_000_a.json"));
        assert!(!is_fresh_file("resend_x_000_a.retry1.json"));
        assert!(is_retry_file("resend_x_000_a.retry1.json"));
        assert!(!is_retry_file("resend_x_000_a.fail"));
    }
}
