//! Filesystem-safe names derived from media titles.

/// Characters not allowed in file names on any supported platform.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved device names (case-insensitive, extension ignored).
const RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const MAX_BYTES: usize = 255;

/// Make a media title safe to use as a file or directory name.
///
/// Forbidden characters become `_`, control characters are dropped,
/// trailing spaces/dots are trimmed, the result is capped at 255 bytes
/// (preserving a trailing extension), and Windows reserved device names
/// get a `_` suffix. Never returns an empty string.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();

    sanitized = sanitized.trim_end_matches([' ', '.']).to_string();

    if sanitized.len() > MAX_BYTES {
        sanitized = truncate_preserving_extension(&sanitized, MAX_BYTES);
    }

    let stem = sanitized
        .rsplit_once('.')
        .map_or(sanitized.as_str(), |(stem, _)| stem);
    if RESERVED.contains(&stem.to_ascii_uppercase().as_str()) {
        sanitized.push('_');
    }

    if sanitized.is_empty() {
        sanitized = "untitled".to_string();
    }
    sanitized
}

/// Cut a name down to `max_bytes`, keeping the extension and never
/// splitting a UTF-8 character.
fn truncate_preserving_extension(name: &str, max_bytes: usize) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        // Only keep extensions that look like extensions.
        Some((stem, ext)) if !ext.is_empty() && ext.len() <= 10 => (stem, Some(ext)),
        _ => (name, None),
    };

    let ext_len = ext.map_or(0, |e| e.len() + 1);
    let stem_budget = max_bytes.saturating_sub(ext_len);

    let mut cut = 0;
    for (idx, ch) in stem.char_indices() {
        if idx + ch.len_utf8() > stem_budget {
            break;
        }
        cut = idx + ch.len_utf8();
    }

    match ext {
        Some(ext) => format!("{}.{ext}", &stem[..cut]),
        None => stem[..cut].to_string(),
    }
}
