use std::borrow::Cow;

/// Replaces line breaks so multi-line server replies fit on one log line
pub fn make_single_line(s: &str) -> Cow<str> {
    if s.contains(['\r', '\n']) {
        Cow::Owned(s.replace("\r\n", "↵").replace(['\r', '\n'], "↵"))
    } else {
        Cow::Borrowed(s)
    }
}
