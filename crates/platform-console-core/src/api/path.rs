//! Resource path normalization.
//!
//! Resource clients build paths inconsistently: some already include the
//! API prefix, some include it twice, some omit the leading slash. Every
//! path is reduced to a prefix-free form starting with exactly one `/`
//! before the configured prefix is joined back on.

/// Normalize `path` against `api_prefix` (for example `/api/v1`).
///
/// Absolute URLs are returned unchanged. The result never starts with the
/// prefix, never contains the prefix twice in a row, and starts with a
/// single `/`. Normalizing an already normalized path is a no-op.
pub fn normalize_path(path: &str, api_prefix: &str) -> String {
    if is_absolute_url(path) {
        return path.to_string();
    }

    let prefix = api_prefix.trim_matches('/');
    let mut rest = path.trim_start_matches('/').to_string();

    if prefix.is_empty() {
        return format!("/{}", rest);
    }

    // The first prefix segment on its own ("api") is also stripped.
    let root = prefix.split('/').next().unwrap_or(prefix);
    let prefixed = format!("{}/", prefix);
    let rooted = format!("{}/", root);

    let doubled = format!("/{0}/{0}/", prefix);
    while let Some(idx) = rest.find(&doubled) {
        rest.replace_range(idx..idx + doubled.len(), "/");
    }

    loop {
        if rest == prefix || rest == root {
            rest.clear();
        } else if let Some(stripped) = rest.strip_prefix(&prefixed) {
            rest = stripped.to_string();
        } else if let Some(stripped) = rest.strip_prefix(&rooted) {
            rest = stripped.to_string();
        } else {
            break;
        }
        rest = rest.trim_start_matches('/').to_string();
    }

    format!("/{}", rest)
}

/// Join a server URL, the API prefix and a normalized path.
pub fn join_url(server_url: &str, api_prefix: &str, normalized: &str) -> String {
    if is_absolute_url(normalized) {
        return normalized.to_string();
    }
    let prefix = api_prefix.trim_matches('/');
    let server = server_url.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{}{}", server, normalized)
    } else {
        format!("{}/{}{}", server, prefix, normalized)
    }
}

fn is_absolute_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/api/v1";

    #[test]
    fn test_duplicated_prefix_collapses() {
        assert_eq!(normalize_path("/api/v1/api/v1/datasets/", PREFIX), "/datasets/");
        assert_eq!(normalize_path("/api/v1/api/v1/api/v1/datasets/", PREFIX), "/datasets/");
        assert_eq!(
            normalize_path("/training-center/api/v1/api/v1/models/", PREFIX),
            "/training-center/models/"
        );
    }

    #[test]
    fn test_single_prefix_and_root_stripped() {
        assert_eq!(normalize_path("/api/v1/auth/login/", PREFIX), "/auth/login/");
        assert_eq!(normalize_path("/api/app-center/plugins/", PREFIX), "/app-center/plugins/");
        assert_eq!(normalize_path("api/v1/datasets", PREFIX), "/datasets");
        assert_eq!(normalize_path("/api/v1", PREFIX), "/");
    }

    #[test]
    fn test_leading_separator() {
        assert_eq!(normalize_path("datasets/", PREFIX), "/datasets/");
        assert_eq!(normalize_path("//datasets/", PREFIX), "/datasets/");
        assert_eq!(normalize_path("", PREFIX), "/");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "/api/v1/api/v1/datasets/",
            "/api/api/v1/models/3/",
            "/api/api/x",
            "evaluation-center/reports/?page=2",
            "/knowledge-bases/7/documents/",
            "/a/api/v1/api/v1/api/v1/api/v1/b",
        ];
        for input in inputs {
            let once = normalize_path(input, PREFIX);
            assert_eq!(normalize_path(&once, PREFIX), once, "input: {}", input);
        }
    }

    #[test]
    fn test_absolute_urls_untouched() {
        let url = "https://files.example.com/api/v1/report.pdf";
        assert_eq!(normalize_path(url, PREFIX), url);
        assert_eq!(join_url("http://localhost:5688", PREFIX, url), url);
    }

    #[test]
    fn test_empty_prefix() {
        assert_eq!(normalize_path("datasets", ""), "/datasets");
        assert_eq!(join_url("http://host/", "", "/datasets"), "http://host/datasets");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://localhost:5688/", PREFIX, "/datasets/"),
            "http://localhost:5688/api/v1/datasets/"
        );
    }
}
