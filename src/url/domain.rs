use url::Url;

/// Extracts the lowercase host of a URL
///
/// The host is the politeness key: every URL sharing a host shares one
/// rate limit and one set of robots rules. Ports are not part of the key.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use kumo_crawl::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM:8443/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Builds the robots.txt location for the origin of `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    let mut robots = url.clone();
    if robots.cannot_be_a_base() {
        return None;
    }
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Some(robots)
}
