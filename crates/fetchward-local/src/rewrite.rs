//! Raw-URL rewrite rules: ordered, first-match-wins, deterministic.
//!
//! Rewrites source-hosting "view" URLs to their raw-content counterparts before
//! fetching, so the pipeline spends its budget on content instead of a
//! JavaScript-heavy HTML shell. Already-raw URLs are fixed points: `rewrite`
//! applied twice equals `rewrite` applied once.

use reqwest::Url;

/// Result of applying the rewrite rule set to a normalized URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    pub url: String,
    pub transformed: bool,
    pub platform: Option<&'static str>,
}

impl RewriteResult {
    fn unchanged(url: &str) -> Self {
        Self {
            url: url.to_string(),
            transformed: false,
            platform: None,
        }
    }
}

fn host_matches(host: &str, pat: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let pat = pat.trim().to_ascii_lowercase();
    host == pat || host.ends_with(&format!(".{pat}"))
}

/// Apply the ordered rewrite rules. First rule to match wins; a URL that is
/// already a raw-content URL (or matches no rule) is returned unchanged with
/// `transformed=false`.
pub fn rewrite(normalized_url: &str) -> RewriteResult {
    let Ok(u) = Url::parse(normalized_url) else {
        return RewriteResult::unchanged(normalized_url);
    };
    let Some(host) = u.host_str() else {
        return RewriteResult::unchanged(normalized_url);
    };
    let host = host.to_string();

    if host_matches(&host, "raw.githubusercontent.com")
        || host_matches(&host, "gist.githubusercontent.com")
    {
        return RewriteResult::unchanged(normalized_url);
    }

    if host_matches(&host, "github.com") {
        if let Some(url) = github_blob_raw(&u) {
            return RewriteResult {
                url,
                transformed: true,
                platform: Some("github"),
            };
        }
        return RewriteResult::unchanged(normalized_url);
    }

    if host_matches(&host, "gist.github.com") {
        if let Some(url) = gist_raw(&u) {
            return RewriteResult {
                url,
                transformed: true,
                platform: Some("gist"),
            };
        }
        return RewriteResult::unchanged(normalized_url);
    }

    if host_matches(&host, "gitlab.com") {
        if let Some(url) = gitlab_blob_raw(&u) {
            return RewriteResult {
                url,
                transformed: true,
                platform: Some("gitlab"),
            };
        }
        return RewriteResult::unchanged(normalized_url);
    }

    if host_matches(&host, "bitbucket.org") {
        if let Some(url) = bitbucket_src_raw(&u) {
            return RewriteResult {
                url,
                transformed: true,
                platform: Some("bitbucket"),
            };
        }
        return RewriteResult::unchanged(normalized_url);
    }

    RewriteResult::unchanged(normalized_url)
}

fn host_with_port(u: &Url) -> String {
    let host = u.host_str().unwrap_or_default();
    match u.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// `github.com/{owner}/{repo}/blob/{branch}/{path} → raw.githubusercontent.com/{owner}/{repo}/{branch}/{path}`
fn github_blob_raw(u: &Url) -> Option<String> {
    let parts: Vec<&str> = u.path().trim_matches('/').split('/').collect();
    if parts.len() < 5 || parts[2] != "blob" {
        return None;
    }
    let (owner, repo, branch) = (parts[0], parts[1], parts[3]);
    if owner.is_empty() || repo.is_empty() || branch.is_empty() {
        return None;
    }
    let path = parts[4..].join("/");
    if path.is_empty() {
        return None;
    }
    Some(format!(
        "{}://raw.githubusercontent.com/{owner}/{repo}/{branch}/{path}{}{}",
        u.scheme(),
        query_suffix(u),
        fragment_suffix(u),
    ))
}

/// `gist.github.com/{user}/{id}[/raw/{file}|#file-{slug}] → gist.githubusercontent.com/{user}/{id}/raw[/{file}]`
fn gist_raw(u: &Url) -> Option<String> {
    let parts: Vec<&str> = u.path().trim_matches('/').split('/').collect();
    if parts.len() < 2 {
        return None;
    }
    let (user, id) = (parts[0], parts[1]);
    if user.is_empty() || id.is_empty() {
        return None;
    }

    if parts.len() >= 4 && parts[2] == "raw" {
        let file = parts[3..].join("/");
        return Some(format!(
            "{}://gist.githubusercontent.com/{user}/{id}/raw/{file}",
            u.scheme()
        ));
    }

    if let Some(frag) = u.fragment() {
        if let Some(slug) = frag.strip_prefix("file-") {
            // GitHub encodes dots in the anchor slug as hyphens; undo that.
            let file = slug.replace('-', ".");
            return Some(format!(
                "{}://gist.githubusercontent.com/{user}/{id}/raw/{file}",
                u.scheme()
            ));
        }
    }

    Some(format!(
        "{}://gist.githubusercontent.com/{user}/{id}/raw",
        u.scheme()
    ))
}

/// `gitlab.com/{path}/-/blob/{branch}/{file} → gitlab.com/{path}/-/raw/{branch}/{file}`
fn gitlab_blob_raw(u: &Url) -> Option<String> {
    let parts: Vec<&str> = u.path().trim_matches('/').split('/').collect();
    let blob_idx = parts
        .windows(2)
        .position(|w| w[0] == "-" && w[1] == "blob")?;
    if blob_idx == 0 {
        return None;
    }
    let mut out = parts.to_vec();
    out[blob_idx + 1] = "raw";
    Some(format!(
        "{}://{}/{}{}{}",
        u.scheme(),
        host_with_port(u),
        out.join("/"),
        query_suffix(u),
        fragment_suffix(u),
    ))
}

/// `bitbucket.org/{owner}/{repo}/src/{branch}/{file} → bitbucket.org/{owner}/{repo}/raw/{branch}/{file}`
fn bitbucket_src_raw(u: &Url) -> Option<String> {
    let parts: Vec<&str> = u.path().trim_matches('/').split('/').collect();
    if parts.len() < 5 || parts[2] != "src" {
        return None;
    }
    let (owner, repo) = (parts[0], parts[1]);
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    let mut out = parts.to_vec();
    out[2] = "raw";
    Some(format!(
        "{}://{}/{}{}{}",
        u.scheme(),
        host_with_port(u),
        out.join("/"),
        query_suffix(u),
        fragment_suffix(u),
    ))
}

fn query_suffix(u: &Url) -> String {
    u.query().map(|q| format!("?{q}")).unwrap_or_default()
}

fn fragment_suffix(u: &Url) -> String {
    u.fragment().map(|f| format!("#{f}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_blob_rewrites_to_raw() {
        let r = rewrite("https://github.com/o/r/blob/main/p/a.md");
        assert!(r.transformed);
        assert_eq!(r.platform, Some("github"));
        assert_eq!(r.url, "https://raw.githubusercontent.com/o/r/main/p/a.md");
    }

    #[test]
    fn already_raw_github_is_a_fixed_point() {
        let once = rewrite("https://github.com/o/r/blob/main/p/a.md");
        let twice = rewrite(&once.url);
        assert!(!twice.transformed);
        assert_eq!(twice.url, once.url);
    }

    #[test]
    fn gitlab_blob_rewrites_to_raw() {
        let r = rewrite("https://gitlab.com/group/proj/-/blob/main/README.md");
        assert!(r.transformed);
        assert_eq!(r.platform, Some("gitlab"));
        assert_eq!(
            r.url,
            "https://gitlab.com/group/proj/-/raw/main/README.md"
        );
    }

    #[test]
    fn bitbucket_src_rewrites_to_raw() {
        let r = rewrite("https://bitbucket.org/owner/repo/src/main/README.md");
        assert!(r.transformed);
        assert_eq!(r.platform, Some("bitbucket"));
        assert_eq!(
            r.url,
            "https://bitbucket.org/owner/repo/raw/main/README.md"
        );
    }

    #[test]
    fn gist_with_explicit_file_rewrites() {
        let r = rewrite("https://gist.github.com/user/abc123/raw/file.py");
        assert!(r.transformed);
        assert_eq!(r.platform, Some("gist"));
        assert_eq!(
            r.url,
            "https://gist.githubusercontent.com/user/abc123/raw/file.py"
        );
    }

    #[test]
    fn unrelated_host_is_unchanged() {
        let r = rewrite("https://example.com/page");
        assert!(!r.transformed);
        assert_eq!(r.url, "https://example.com/page");
        assert_eq!(r.platform, None);
    }

    #[test]
    fn query_and_fragment_preserved_for_blob_rule() {
        let r = rewrite("https://github.com/o/r/blob/main/p/a.md?plain=1#L10");
        assert_eq!(
            r.url,
            "https://raw.githubusercontent.com/o/r/main/p/a.md?plain=1#L10"
        );
    }
}
