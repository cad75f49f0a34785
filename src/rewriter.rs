//! Rewriting of origin references in response bodies
//!
//! Every reference that would send the browser to the origin (absolute,
//! scheme-relative or root-relative) is relocated under the proxy prefix so
//! navigation keeps re-entering the proxy. Third-party references are left
//! alone. Rewriting works on raw bytes and replaces only the URL spans it
//! changes, so bodies in any ASCII-compatible charset pass through intact.
//!
//! Document-relative references (`about.html`, `../img/a.png`) are not
//! touched: the browser already resolves them against the proxied page URL.
//! URLs assembled at runtime by scripts are out of reach.

use std::{borrow::Cow, sync::LazyLock};

use regex::bytes::{Captures, Regex};
use url::Url;

/// HTML attributes that carry URLs
static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(\s(?:xlink:)?(href|src|action|formaction|poster|data|data-src|data-href|data-srcset|background|cite|srcset|content)\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#,
    )
    .expect("attribute pattern is valid")
});

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]+))\s*\)"#)
        .expect("css url pattern is valid")
});

static CSS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("css import pattern is valid")
});

/// Body formats the rewriter understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Json,
    Xml,
    /// Images, fonts, scripts, media: passed through byte for byte
    Opaque,
}

impl ContentKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return ContentKind::Opaque;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "text/html" | "application/xhtml+xml" => ContentKind::Html,
            "text/css" => ContentKind::Css,
            "application/json" | "text/json" => ContentKind::Json,
            "application/xml" | "text/xml" => ContentKind::Xml,
            m if m.starts_with("image/") => ContentKind::Opaque,
            m if m.ends_with("+json") => ContentKind::Json,
            m if m.ends_with("+xml") => ContentKind::Xml,
            _ => ContentKind::Opaque,
        }
    }

    fn passes(self) -> &'static [Pass] {
        match self {
            ContentKind::Html => &[Pass::Attributes, Pass::Css, Pass::Absolute],
            ContentKind::Css => &[Pass::Css, Pass::Absolute],
            ContentKind::Json | ContentKind::Xml => &[Pass::Absolute],
            ContentKind::Opaque => &[],
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Attributes,
    Css,
    Absolute,
}

/// Origin identity and proxy prefix, derived once per target configuration
#[derive(Debug, Clone)]
pub struct RewriteRules {
    origin_scheme: String,
    /// Lowercased, without a leading "www."
    origin_host: String,
    origin_port: u16,
    default_port: bool,
    proxy_prefix: String,
    absolute: Regex,
}

impl RewriteRules {
    /// `origin` must be an absolute http(s) URL with a host.
    pub fn new(origin: &Url, proxy_prefix: &str) -> Result<Self, regex::Error> {
        let host = origin.host_str().unwrap_or_default().to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
        let absolute = Regex::new(&format!(
            r"(?i)(?:https?:)?(\\?/)\\?/(?:www\.)?{}(?::(\d{{1,5}}))?",
            regex::escape(&host)
        ))?;

        Ok(Self {
            origin_scheme: origin.scheme().to_string(),
            origin_host: host,
            origin_port: origin.port_or_known_default().unwrap_or(80),
            default_port: origin.port().is_none(),
            proxy_prefix: proxy_prefix.to_string(),
            absolute,
        })
    }

    pub fn origin_scheme(&self) -> &str {
        &self.origin_scheme
    }

    pub fn origin_host(&self) -> &str {
        &self.origin_host
    }

    pub fn proxy_prefix(&self) -> &str {
        &self.proxy_prefix
    }

    /// Map an origin path (plus query/fragment) to its proxy path.
    pub fn proxy_path(&self, origin_path: &str) -> String {
        match origin_path.strip_prefix('/') {
            Some(rest) => format!("{}{}", self.proxy_prefix, rest),
            None => format!("{}{}", self.proxy_prefix, origin_path),
        }
    }

    /// True when a root-relative path already points into the proxy.
    pub fn is_proxied(&self, path: &str) -> bool {
        path.starts_with(&self.proxy_prefix) || path == self.proxy_prefix.trim_end_matches('/')
    }

    /// Rewrite one URL reference, or `None` when it must stay as it is
    /// (third-party, document-relative, already proxied, non-http).
    pub fn rewrite_url(&self, value: &str) -> Option<String> {
        let value = value.trim();
        let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();

        let after_scheme = if let Some(rest) = value.strip_prefix("//") {
            rest
        } else if lower.starts_with("https://") {
            &value[8..]
        } else if lower.starts_with("http://") {
            &value[7..]
        } else if value.starts_with('/') {
            return (!self.is_proxied(value)).then(|| self.proxy_path(value));
        } else {
            return None;
        };

        let end = after_scheme
            .find(|c| matches!(c, '/' | '?' | '#' | '\\'))
            .unwrap_or(after_scheme.len());
        let (authority, rest) = after_scheme.split_at(end);

        self.is_origin_authority(authority)
            .then(|| self.proxy_path(rest))
    }

    fn is_origin_authority(&self, authority: &str) -> bool {
        let host_port = authority.rsplit('@').next().unwrap_or(authority);
        let (host, port) = if host_port.starts_with('[') {
            match host_port.find(']') {
                Some(close) => (
                    &host_port[..=close],
                    host_port[close + 1..].strip_prefix(':'),
                ),
                None => return false,
            }
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (host_port, None),
            }
        };

        let host = host.to_ascii_lowercase();
        if host.strip_prefix("www.").unwrap_or(&host) != self.origin_host {
            return false;
        }
        match port {
            None => self.port_matches(None),
            Some(port) => port
                .parse::<u16>()
                .map(|p| self.port_matches(Some(p)))
                .unwrap_or(false),
        }
    }

    /// Either scheme is accepted for the origin host; an explicit port must
    /// name the origin's port.
    fn port_matches(&self, explicit: Option<u16>) -> bool {
        match explicit {
            None => self.default_port,
            Some(port) => {
                port == self.origin_port || (self.default_port && (port == 80 || port == 443))
            }
        }
    }

    fn apply<'a>(&self, pass: Pass, input: &'a [u8]) -> Cow<'a, [u8]> {
        match pass {
            Pass::Attributes => self.rewrite_attributes(input),
            Pass::Css => {
                let relocate = |_: &Captures<'_>, value: &str| self.rewrite_url(value);
                match replace_groups(input, &CSS_URL_RE, &[1, 2, 3], relocate) {
                    Cow::Borrowed(_) => replace_groups(input, &CSS_IMPORT_RE, &[1, 2], relocate),
                    Cow::Owned(buf) => Cow::Owned(
                        replace_groups(&buf, &CSS_IMPORT_RE, &[1, 2], relocate).into_owned(),
                    ),
                }
            }
            Pass::Absolute => self.rewrite_absolute(input),
        }
    }

    fn rewrite_attributes<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        replace_groups(input, &ATTRIBUTE_RE, &[3, 4, 5], |caps, value| {
            let name = caps
                .get(2)
                .map(|m| m.as_bytes().to_ascii_lowercase())
                .unwrap_or_default();
            match name.as_slice() {
                b"srcset" | b"data-srcset" => self.rewrite_srcset(value),
                b"content" => self.rewrite_refresh(value),
                _ => self.rewrite_url(value),
            }
        })
    }

    fn rewrite_srcset(&self, value: &str) -> Option<String> {
        let mut changed = false;
        let candidates: Vec<String> = value
            .split(',')
            .map(|candidate| {
                let lead = candidate.len() - candidate.trim_start().len();
                let body = &candidate[lead..];
                let url_end = body.find(char::is_whitespace).unwrap_or(body.len());
                match self.rewrite_url(&body[..url_end]) {
                    Some(url) => {
                        changed = true;
                        format!("{}{}{}", &candidate[..lead], url, &body[url_end..])
                    }
                    None => candidate.to_string(),
                }
            })
            .collect();
        changed.then(|| candidates.join(","))
    }

    /// `<meta http-equiv="refresh" content="5; url=/next">`
    fn rewrite_refresh(&self, value: &str) -> Option<String> {
        let lower = value.to_ascii_lowercase();
        let idx = lower.find("url=")?;
        if !lower[..idx].trim_end().ends_with(';') {
            return None;
        }
        let start = idx + 4;
        let tail = &value[start..];
        let quote = tail.chars().next().filter(|c| *c == '\'' || *c == '"');
        let inner = match quote {
            Some(q) => tail[1..].trim_end_matches(q),
            None => tail,
        };
        let rewritten = self.rewrite_url(inner)?;
        let quote = quote.map(String::from).unwrap_or_default();
        Some(format!("{}{}{}{}", &value[..start], quote, rewritten, quote))
    }

    fn rewrite_absolute<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        let mut out: Option<Vec<u8>> = None;
        let mut last = 0;

        for caps in self.absolute.captures_iter(input) {
            let Some(whole) = caps.get(0) else { continue };
            let next = &input[whole.end()..];
            // sharer.php?u=https://example.org/..., x.example.org
            if !starts_reference(whole.start().checked_sub(1).map(|i| input[i])) {
                continue;
            }
            // example.org.evil.com, example.org-cdn.net, example.org@evil.com
            if !ends_authority(next) {
                continue;
            }
            let explicit_port = match caps.get(2) {
                Some(port) => match std::str::from_utf8(port.as_bytes())
                    .ok()
                    .and_then(|p| p.parse::<u16>().ok())
                {
                    Some(port) => Some(port),
                    None => continue,
                },
                None => None,
            };
            if !self.port_matches(explicit_port) {
                continue;
            }

            let escaped = caps
                .get(1)
                .is_some_and(|slash| slash.as_bytes().starts_with(b"\\"));
            let continues_path = next.starts_with(b"/") || next.starts_with(b"\\/");
            let prefix = if continues_path {
                self.proxy_prefix.trim_end_matches('/')
            } else {
                self.proxy_prefix.as_str()
            };
            let replacement = if escaped {
                prefix.replace('/', "\\/")
            } else {
                prefix.to_string()
            };

            let buf = out.get_or_insert_with(|| Vec::with_capacity(input.len()));
            buf.extend_from_slice(&input[last..whole.start()]);
            buf.extend_from_slice(replacement.as_bytes());
            last = whole.end();
        }

        match out {
            Some(mut buf) => {
                buf.extend_from_slice(&input[last..]);
                Cow::Owned(buf)
            }
            None => Cow::Borrowed(input),
        }
    }
}

/// True when the byte before a match cannot belong to an enclosing URL.
fn starts_reference(before: Option<u8>) -> bool {
    before.map_or(true, |b| {
        b.is_ascii_whitespace() || b"\"'`()<>[]{},;|".contains(&b)
    })
}

/// True when the bytes after a matched host end the authority. A trailing
/// `.` or `:` counts as punctuation only when nothing URL-like follows it.
fn ends_authority(next: &[u8]) -> bool {
    match next.first() {
        None => true,
        Some(b'.' | b':') => next
            .get(1)
            .map_or(true, |b| b.is_ascii_whitespace() || b"\"'<)".contains(b)),
        Some(b) => !(b.is_ascii_alphanumeric() || b"-_@".contains(b)),
    }
}

/// Replace the first matching value group of every match with `f`'s output.
fn replace_groups<'a, F>(input: &'a [u8], re: &Regex, groups: &[usize], mut f: F) -> Cow<'a, [u8]>
where
    F: FnMut(&Captures<'_>, &str) -> Option<String>,
{
    let mut out: Option<Vec<u8>> = None;
    let mut last = 0;

    for caps in re.captures_iter(input) {
        let Some(span) = groups.iter().find_map(|&i| caps.get(i)) else {
            continue;
        };
        let Ok(value) = std::str::from_utf8(span.as_bytes()) else {
            continue;
        };
        if let Some(replacement) = f(&caps, value) {
            let buf = out.get_or_insert_with(|| Vec::with_capacity(input.len() + 64));
            buf.extend_from_slice(&input[last..span.start()]);
            buf.extend_from_slice(replacement.as_bytes());
            last = span.end();
        }
    }

    match out {
        Some(mut buf) => {
            buf.extend_from_slice(&input[last..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(input),
    }
}

/// Rewrite a response body according to its declared content type.
///
/// Opaque types come back borrowed and untouched.
pub fn rewrite<'a>(body: &'a [u8], content_type: Option<&str>, rules: &RewriteRules) -> Cow<'a, [u8]> {
    let mut out = Cow::Borrowed(body);
    for &pass in ContentKind::from_content_type(content_type).passes() {
        let next = match rules.apply(pass, &out) {
            Cow::Owned(buf) => Some(buf),
            Cow::Borrowed(_) => None,
        };
        if let Some(buf) = next {
            out = Cow::Owned(buf);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: Option<&str> = Some("text/html; charset=utf-8");
    const CSS: Option<&str> = Some("text/css");
    const JSON: Option<&str> = Some("application/json");

    fn rules() -> RewriteRules {
        RewriteRules::new(&Url::parse("https://example.org").unwrap(), "/proxy/").unwrap()
    }

    fn run(body: &str, content_type: Option<&str>) -> String {
        String::from_utf8(rewrite(body.as_bytes(), content_type, &rules()).into_owned()).unwrap()
    }

    #[test]
    fn test_content_kind_detection() {
        assert_eq!(ContentKind::from_content_type(HTML), ContentKind::Html);
        assert_eq!(ContentKind::from_content_type(Some("TEXT/CSS")), ContentKind::Css);
        assert_eq!(
            ContentKind::from_content_type(Some("application/ld+json")),
            ContentKind::Json
        );
        assert_eq!(
            ContentKind::from_content_type(Some("application/rss+xml")),
            ContentKind::Xml
        );
        assert_eq!(
            ContentKind::from_content_type(Some("image/svg+xml")),
            ContentKind::Opaque
        );
        assert_eq!(
            ContentKind::from_content_type(Some("application/javascript")),
            ContentKind::Opaque
        );
        assert_eq!(ContentKind::from_content_type(None), ContentKind::Opaque);
    }

    #[test]
    fn test_root_relative_href() {
        assert_eq!(run(r#"<a href="/about">"#, HTML), r#"<a href="/proxy/about">"#);
    }

    #[test]
    fn test_absolute_and_scheme_relative_origin_refs() {
        let out = run(
            r#"<a href="https://example.org/a?x=1#f"><img src='//example.org/i.png'><a href=http://www.example.org/b>"#,
            HTML,
        );
        assert_eq!(
            out,
            r#"<a href="/proxy/a?x=1#f"><img src='/proxy/i.png'><a href=/proxy/b>"#
        );
    }

    #[test]
    fn test_bare_origin_maps_to_prefix_root() {
        assert_eq!(run(r#"<a href="https://example.org">"#, HTML), r#"<a href="/proxy/">"#);
    }

    #[test]
    fn test_third_party_and_relative_untouched() {
        let body = r##"<a href="https://other.net/x"><img src="//cdn.other.net/y.png"><a href="about.html"><a href="#top"><a href="mailto:a@example.org">"##;
        assert_eq!(run(body, HTML), body);
    }

    #[test]
    fn test_lookalike_hosts_untouched() {
        let body = r#"<a href="https://example.org.evil.com/x">https://example.org-cdn.net/y https://notexample.org/z"#;
        assert_eq!(run(body, HTML), body);
    }

    #[test]
    fn test_port_must_match() {
        let body = r#"<a href="https://example.org:8443/x">"#;
        assert_eq!(run(body, HTML), body);
        assert_eq!(
            run(r#"<a href="https://example.org:443/x">"#, HTML),
            r#"<a href="/proxy/x">"#
        );
    }

    #[test]
    fn test_no_origin_reference_survives() {
        let body = r#"<html><head><link rel="canonical" href="https://example.org/page">
<meta property="og:url" content="https://example.org/page">
<style>.hero { background: url("https://example.org/hero.jpg") }</style></head>
<body><form action="/search"><a href="//example.org/x">x</a>
<p>Visit https://example.org. or https://example.org/contact.</p>
<p>Ports end sentences too: https://example.org:</p>
<script>var api = "https://example.org/api/v1";</script></body></html>"#;
        let out = run(body, HTML);
        assert!(!out.contains("//example.org"), "{}", out);
        assert!(out.contains(r#"href="/proxy/page""#));
        assert!(out.contains(r#"action="/proxy/search""#));
        assert!(out.contains(r#"url("/proxy/hero.jpg")"#));
        assert!(out.contains(r#""/proxy/api/v1""#));
        assert!(out.contains("<p>Visit /proxy/. or /proxy/contact.</p>"));
        assert!(out.contains("too: /proxy/:</p>"));
    }

    #[test]
    fn test_origin_inside_third_party_url_untouched() {
        let body = r#"<a href="https://www.facebook.com/sharer.php?u=https://example.org/page">share</a>
<p>https://twitter.com/intent/tweet?url=https://example.org/page&text=hi</p>
<p>https://t.co/r?to=//example.org/y</p>"#;
        assert_eq!(run(body, HTML), body);
        assert_eq!(
            run(r#"{"share":"https://x.com/share?u=https://example.org/a"}"#, JSON),
            r#"{"share":"https://x.com/share?u=https://example.org/a"}"#
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let body = r#"<a href="/about"><a href="https://example.org/x"><img srcset="/a.png 1x, https://example.org/b.png 2x">
<style>@import "/base.css"; div { background: url(/bg.png) }</style>
<meta http-equiv="refresh" content="0; url=/next"><a href="/proxy">home</a>"#;
        let once = run(body, HTML);
        let twice = run(&once, HTML);
        assert_eq!(once, twice);
        assert!(once.contains(r#"href="/proxy">home"#));
    }

    #[test]
    fn test_second_pass_borrows() {
        let once = rewrite(br#"<a href="/about">"#, HTML, &rules()).into_owned();
        assert!(matches!(rewrite(&once, HTML, &rules()), Cow::Borrowed(_)));
    }

    #[test]
    fn test_css_url_and_import() {
        let css = r#"@import "/theme.css"; @import 'https://fonts.other.net/f.css';
body { background: url( '/img/bg.png' ) } .x { background-image: url(//example.org/y.svg) }"#;
        let out = run(css, CSS);
        assert!(out.contains(r#"@import "/proxy/theme.css""#));
        assert!(out.contains("@import 'https://fonts.other.net/f.css'"));
        assert!(out.contains("url( '/proxy/img/bg.png' )"));
        assert!(out.contains("url(/proxy/y.svg)"));
    }

    #[test]
    fn test_srcset_candidates() {
        let out = run(
            r#"<img srcset="/small.png 480w, https://cdn.other.net/m.png 800w,https://example.org/l.png 1200w">"#,
            HTML,
        );
        assert_eq!(
            out,
            r#"<img srcset="/proxy/small.png 480w, https://cdn.other.net/m.png 800w,/proxy/l.png 1200w">"#
        );
    }

    #[test]
    fn test_meta_refresh() {
        assert_eq!(
            run(r#"<meta http-equiv="refresh" content="5; URL='/next'">"#, HTML),
            r#"<meta http-equiv="refresh" content="5; URL='/proxy/next'">"#
        );
        let plain = r#"<meta name="description" content="/not/a/url">"#;
        assert_eq!(run(plain, HTML), plain);
    }

    #[test]
    fn test_json_including_escaped_slashes() {
        let out = run(
            r#"{"next":"https://example.org/page/2","alt":"https:\/\/example.org\/page\/3","home":"https://example.org","path":"/kept"}"#,
            JSON,
        );
        assert_eq!(
            out,
            r#"{"next":"/proxy/page/2","alt":"\/proxy\/page\/3","home":"/proxy/","path":"/kept"}"#
        );
    }

    #[test]
    fn test_opaque_bodies_untouched() {
        let bytes = b"\x89PNG https://example.org/x \xff\xfe";
        let out = rewrite(bytes, Some("image/png"), &rules());
        assert!(matches!(out, Cow::Borrowed(_)));
        let script = b"location.href = '/about'";
        assert_eq!(
            rewrite(script, Some("application/javascript"), &rules()).as_ref(),
            script
        );
    }

    #[test]
    fn test_non_utf8_bytes_preserved() {
        let body = b"<p>caf\xe9</p><a href=\"/menu\">";
        let out = rewrite(body, Some("text/html; charset=iso-8859-1"), &rules());
        assert_eq!(out.as_ref(), b"<p>caf\xe9</p><a href=\"/proxy/menu\">");
    }

    #[test]
    fn test_rewrite_url_cases() {
        let rules = rules();
        assert_eq!(rules.rewrite_url("/a/b?c"), Some("/proxy/a/b?c".to_string()));
        assert_eq!(rules.rewrite_url("https://EXAMPLE.org/x"), Some("/proxy/x".to_string()));
        assert_eq!(rules.rewrite_url("https://example.org?q=1"), Some("/proxy/?q=1".to_string()));
        assert_eq!(rules.rewrite_url("/proxy/a"), None);
        assert_eq!(rules.rewrite_url("https://other.net/"), None);
        assert_eq!(rules.rewrite_url("relative/path"), None);
        assert_eq!(rules.rewrite_url("data:image/png;base64,AAAA"), None);
    }

    #[test]
    fn test_non_default_origin_port() {
        let rules =
            RewriteRules::new(&Url::parse("http://127.0.0.1:3000/").unwrap(), "/proxy/").unwrap();
        assert_eq!(
            rules.rewrite_url("http://127.0.0.1:3000/x"),
            Some("/proxy/x".to_string())
        );
        assert_eq!(rules.rewrite_url("http://127.0.0.1/x"), None);
        let out = rewrite(
            b"<a href=\"http://127.0.0.1:3000/y\">",
            Some("text/html"),
            &rules,
        );
        assert_eq!(out.as_ref(), b"<a href=\"/proxy/y\">");
    }
}
