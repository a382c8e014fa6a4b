use regex::Regex;

/// Backups kept per module and extension after a successful deploy.
pub const DEFAULT_RETENTION: usize = 3;

/// Matches `{base}{YYMMDDHHmm}{ext}` and nothing else.
pub fn backup_pattern(base_name: &str, extension: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"^{}\d{{10}}{}$",
        regex::escape(base_name),
        regex::escape(extension)
    ))
}

/// Picks the backups to delete from a newest-first directory listing.
///
/// Only names matching the backup pattern count; the live file is never selected.
pub fn expired_backups(
    listing_newest_first: &[&str],
    base_name: &str,
    extension: &str,
    active_file_name: &str,
    keep: usize,
) -> Result<Vec<String>, regex::Error> {
    let pattern = backup_pattern(base_name, extension)?;
    Ok(listing_newest_first
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty() && *name != active_file_name)
        .filter(|name| pattern.is_match(name))
        .skip(keep)
        .map(str::to_string)
        .collect())
}
