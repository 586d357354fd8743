use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static REPLACER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9-._]").unwrap());

/// Transform an opaque job id into a string Docker accepts as a container
/// name component (alphanumerics, dashes, dots and underscores only).
pub(crate) fn sanitize_for_container_name(s: &str) -> Cow<str> {
    REPLACER.replace_all(s, "_")
}
