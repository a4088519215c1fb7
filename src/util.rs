use std::env;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const DEFAULT_WORKSPACE_DIR: &str = "./data";

pub(crate) fn env_required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    let value = env::var(name).unwrap_or_default();
    if value.trim().is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("Missing {name}")).into());
    }
    Ok(value)
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_u64(name: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    match env_optional(name) {
        Some(value) => Ok(value
            .parse::<u64>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid {name}")))?),
        None => Ok(default),
    }
}

pub(crate) fn env_usize(name: &str, default: usize) -> Result<usize, Box<dyn std::error::Error>> {
    match env_optional(name) {
        Some(value) => Ok(value
            .parse::<usize>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid {name}")))?),
        None => Ok(default),
    }
}

pub(crate) fn env_f64(name: &str, default: f64) -> Result<f64, Box<dyn std::error::Error>> {
    match env_optional(name) {
        Some(value) => Ok(value
            .parse::<f64>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid {name}")))?),
        None => Ok(default),
    }
}

pub(crate) fn jitter_ratio() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

pub(crate) fn parse_retry_after(resp: &ureq::Response) -> Option<f64> {
    resp.header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok())
}

pub(crate) fn resolve_workspace(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Some(value) = env_optional("CONCIERGE_WORKSPACE") {
        return PathBuf::from(value);
    }
    PathBuf::from(DEFAULT_WORKSPACE_DIR)
}

/// Trim oversized tool output so the model context stays bounded.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n... (output truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_text_unchanged() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_long_text_marks_cut() {
        let out = truncate_chars("abcdefghij", 4);
        assert!(out.starts_with("abcd"));
        assert!(out.ends_with("(output truncated)"));
    }

    #[test]
    fn jitter_stays_in_unit_range() {
        for _ in 0..32 {
            let j = jitter_ratio();
            assert!((0.0..1.0).contains(&j));
        }
    }
}
