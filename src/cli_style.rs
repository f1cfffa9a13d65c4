/*!
 * Terminal styling for the ferry CLI
 */

use crate::format::format_bytes;
use crate::link::LinkRecord;
use console::{style, StyledObject};

/// Colors used across CLI output
pub struct Theme;

impl Theme {
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }
}

pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const LINK: &'static str = "🔗";
}

pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!("{} {}", Theme::error(format!("{} Error:", Icons::ERROR)), message);
    if let Some(hint) = suggestion {
        eprintln!("  {} {}", Theme::muted("hint:"), hint);
    }
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", Theme::warning(Icons::WARNING), Theme::warning(message));
}

pub fn print_success(message: &str) {
    eprintln!("{} {}", Theme::success(Icons::SUCCESS), Theme::success(message));
}

pub fn print_info(message: &str) {
    eprintln!("{} {}", Theme::primary(Icons::INFO), message);
}

/// Human summary of a relayed file, one field per line
pub fn link_summary(record: &LinkRecord) -> String {
    let mut out = format!(
        "{} {} ({}, {})\n  id:   {}\n  url:  {}",
        Icons::LINK,
        record.file_name,
        format_bytes(record.size),
        record.kind,
        record.file_id,
        record.primary_url
    );
    for (variant, url) in &record.player_variants {
        out.push_str(&format!("\n  {:<5} {}", format!("{}:", variant), url));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkSet, PlayerVariant};
    use crate::registry::FileId;
    use crate::store::ObjectRef;
    use std::collections::BTreeMap;

    #[test]
    fn test_link_summary_lists_variants() {
        let object = ObjectRef {
            key: "a.mp4".to_string(),
            size: 2048,
            content_id: None,
        };
        let links = LinkSet {
            primary_url: "https://x/a.mp4".to_string(),
            player_variants: BTreeMap::from([(PlayerVariant::Vlc, "vlc://https://x/a.mp4".to_string())]),
            is_streamable: true,
        };
        let record = LinkRecord::new(
            FileId::from_hex("0123456789abcdef").unwrap(),
            "a.mp4",
            &object,
            links,
            chrono::Utc::now(),
        );

        let summary = link_summary(&record);
        assert!(summary.contains("a.mp4 (2.00 KB, video)"));
        assert!(summary.contains("id:   0123456789abcdef"));
        assert!(summary.contains("vlc:  vlc://https://x/a.mp4"));
    }
}
