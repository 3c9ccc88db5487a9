//! Sitemap pre-filters applied before Phase E (spec §4.7c).

use super::types::SitemapRef;

const ADMIN_PREFIXES: &[&str] = &[
    "/admin/", "/wp-admin/", "/dashboard/", "/login/", "/private/", "/test/", "/staging/", "/dev/", "/debug/",
];

const MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".ico", ".pdf", ".doc", ".docx", ".zip", ".tar", ".gz", ".mp3",
    ".mp4", ".avi", ".mov", ".css", ".js",
];

const NON_CONTENT_SUBSTRINGS: &[&str] = &[
    "privacy",
    "terms",
    "contact",
    "about",
    "help",
    "support",
    "blog",
    "news",
    "legal",
    "cookies",
    "ads",
    "advertisement",
    "tracking",
    "analytics",
];

/// `true` if `sitemap` should be dropped before Phase E.
#[must_use]
pub fn should_drop(sitemap: &SitemapRef) -> bool {
    let url = &sitemap.url;
    let path = url::Url::parse(url).map_or_else(|_| url.clone(), |parsed| parsed.path().to_string());
    let lower_path = path.to_lowercase();

    if ADMIN_PREFIXES.iter().any(|prefix| lower_path.contains(prefix)) {
        return true;
    }
    if MEDIA_EXTENSIONS.iter().any(|ext| lower_path.ends_with(ext)) {
        return true;
    }
    let lower_url = url.to_lowercase();
    if NON_CONTENT_SUBSTRINGS.iter().any(|sub| lower_url.contains(sub)) {
        return true;
    }
    false
}

/// Drop every [`SitemapRef`] that fails [`should_drop`].
#[must_use]
pub fn filter(sitemaps: Vec<SitemapRef>) -> Vec<SitemapRef> {
    sitemaps.into_iter().filter(|s| !should_drop(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_admin_prefixes() {
        assert!(should_drop(&SitemapRef::new("https://s/admin/sitemap.xml")));
    }

    #[test]
    fn drops_media_extensions() {
        assert!(should_drop(&SitemapRef::new("https://s/images/banner.jpg")));
    }

    #[test]
    fn drops_non_content_substrings() {
        assert!(should_drop(&SitemapRef::new("https://s/privacy-policy.xml")));
    }

    #[test]
    fn keeps_ordinary_sitemap() {
        assert!(!should_drop(&SitemapRef::new("https://s/sitemap.xml")));
    }

    #[test]
    fn filter_keeps_only_survivors() {
        let sitemaps = vec![
            SitemapRef::new("https://s/sitemap.xml"),
            SitemapRef::new("https://s/admin/sitemap.xml"),
        ];
        let survivors = filter(sitemaps);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].url, "https://s/sitemap.xml");
    }
}
