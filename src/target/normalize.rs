use crate::TargetError;
use url::Url;

/// Path segments that introduce a post shortcode
const POST_SEGMENTS: &[&str] = &["p", "reel", "reels", "tv"];

/// Reserved first path segments that are never usernames
const RESERVED_PATHS: &[&str] = &[
    "p", "reel", "reels", "tv", "explore", "accounts", "stories", "direct", "api", "graphql",
];

/// Longest username the source accepts
const MAX_USERNAME_LEN: usize = 30;

/// Extracts the shortcode from a post or reel URL
///
/// Accepts `/p/<code>/`, `/reel/<code>/`, `/reels/<code>/` and `/tv/<code>/`
/// paths, with or without a trailing slash, query string, or fragment.
///
/// # Examples
///
/// ```
/// use sumi_harvest::target::extract_shortcode;
///
/// let code = extract_shortcode("https://www.instagram.com/p/DPeGrDmjA9R/").unwrap();
/// assert_eq!(code, "DPeGrDmjA9R");
///
/// let code = extract_shortcode("https://www.instagram.com/reel/C1a2B3c4/?igsh=x").unwrap();
/// assert_eq!(code, "C1a2B3c4");
/// ```
pub fn extract_shortcode(post_url: &str) -> Result<String, TargetError> {
    let url = Url::parse(post_url.trim()).map_err(|e| TargetError::Parse(e.to_string()))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    for pair in segments.windows(2) {
        if POST_SEGMENTS.contains(&pair[0]) && is_valid_shortcode(pair[1]) {
            return Ok(pair[1].to_string());
        }
    }

    Err(TargetError::NotAPost(post_url.to_string()))
}

/// Extracts a username from a bare name, `@name`, or a profile URL
///
/// # Examples
///
/// ```
/// use sumi_harvest::target::extract_username;
///
/// assert_eq!(extract_username("psv").unwrap(), "psv");
/// assert_eq!(extract_username("@psv").unwrap(), "psv");
/// assert_eq!(extract_username("https://www.instagram.com/psv/").unwrap(), "psv");
/// ```
pub fn extract_username(input: &str) -> Result<String, TargetError> {
    let trimmed = input.trim();

    let candidate = if trimmed.contains("://") {
        let url = Url::parse(trimmed).map_err(|e| TargetError::Parse(e.to_string()))?;
        url.path_segments()
            .and_then(|mut s| s.find(|seg| !seg.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| TargetError::InvalidUsername(input.to_string()))?
    } else {
        trimmed.trim_start_matches('@').to_string()
    };

    let candidate = candidate.to_lowercase();

    if RESERVED_PATHS.contains(&candidate.as_str()) || !is_valid_username(&candidate) {
        return Err(TargetError::InvalidUsername(input.to_string()));
    }

    Ok(candidate)
}

/// Builds the canonical post URL for a shortcode
///
/// # Examples
///
/// ```
/// use sumi_harvest::target::post_url;
///
/// assert_eq!(
///     post_url("https://www.instagram.com/", "ABC123"),
///     "https://www.instagram.com/p/ABC123/"
/// );
/// ```
pub fn post_url(base_url: &str, shortcode: &str) -> String {
    format!("{}/p/{}/", base_url.trim_end_matches('/'), shortcode)
}

fn is_valid_shortcode(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && !name.starts_with('.')
        && !name.ends_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
