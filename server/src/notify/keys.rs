use chrono::{DateTime, TimeZone};

/// Timestamp used in artifact keys, e.g. `02-18-2026_09-30-00-026490`.
pub fn notification_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%m-%d-%Y_%H-%M-%S-%6f").to_string()
}

/// Key for a detection snapshot.
/// e.g. "images/02-18-2026_09-30-00-026490_fire.jpg"
pub fn artifact_key(prefix: &str, timestamp: &str, label: &str) -> String {
    format!("{prefix}{timestamp}_{label}.jpg", label = sanitize_label(label))
}

/// Public URL for an uploaded object. Virtual-hosted AWS style unless a
/// base URL for an S3-compatible store is configured.
pub fn public_url(base_url: Option<&str>, bucket: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    match base_url {
        Some(base) => format!("{}/{bucket}/{key}", base.trim_end_matches('/')),
        None => format!("https://{bucket}.s3.amazonaws.com/{key}"),
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "object".into()
    } else {
        cleaned
    }
}
