//! Cross-instance reference rewriting for free-text fields.
//!
//! [`rewrite_references`] is a pure function: it finds absolute links to
//! objects under the entity's source path on the source instance and points
//! them at the same object under the destination path. Anything it cannot
//! match or resolve is left byte-for-byte unchanged.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'()\[\]{}]+"#).expect("valid url regex")
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

/// Object-route segments (the part after `/-/`) mapped to the destination
/// relation that holds the referenced objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
}

impl RouteTable {
    #[must_use]
    pub fn new<I, S, R>(routes: I) -> Self
    where
        I: IntoIterator<Item = (S, R)>,
        S: Into<String>,
        R: Into<String>,
    {
        Self {
            routes: routes
                .into_iter()
                .map(|(segment, relation)| (segment.into(), relation.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn relation_for(&self, segment: &str) -> Option<&str> {
        self.routes.get(segment).map(String::as_str)
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new([
            ("issues", "issues"),
            ("work_items", "issues"),
            ("merge_requests", "merge_requests"),
            ("snippets", "snippets"),
        ])
    }
}

/// Everything needed to rewrite one entity's references.
#[derive(Debug, Clone, Copy)]
pub struct RewriteRule<'a> {
    pub source_base: &'a Url,
    pub destination_base: &'a Url,
    pub source_path: &'a str,
    pub destination_path: &'a str,
    pub routes: &'a RouteTable,
}

struct ObjectLink<'u> {
    segment: &'u str,
    id: &'u str,
    rest: &'u str,
}

fn base_prefix(base: &Url) -> &str {
    base.path().trim_matches('/')
}

fn strip_prefix_ignore_case<'s>(text: &'s str, prefix: &str) -> Option<&'s str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

fn same_origin(candidate: &Url, base: &Url) -> bool {
    candidate.host_str().map(str::to_ascii_lowercase)
        == base.host_str().map(str::to_ascii_lowercase)
        && candidate.port_or_known_default() == base.port_or_known_default()
}

fn parse_link<'u>(candidate: &'u Url, rule: &RewriteRule<'_>) -> Option<ObjectLink<'u>> {
    if !same_origin(candidate, rule.source_base) {
        return None;
    }

    let mut expected = String::from("/");
    let base = base_prefix(rule.source_base);
    if !base.is_empty() {
        expected.push_str(base);
        expected.push('/');
    }
    expected.push_str(rule.source_path.trim_matches('/'));
    expected.push_str("/-/");

    let tail = strip_prefix_ignore_case(candidate.path(), &expected)?;
    let (segment, after_segment) = tail.split_once('/')?;
    let id_end = after_segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_segment.len());
    if id_end == 0 {
        return None;
    }
    let (id, rest) = after_segment.split_at(id_end);
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(ObjectLink { segment, id, rest })
}

fn destination_link(candidate: &Url, link: &ObjectLink<'_>, rule: &RewriteRule<'_>) -> String {
    let mut path = String::from("/");
    let base = base_prefix(rule.destination_base);
    if !base.is_empty() {
        path.push_str(base);
        path.push('/');
    }
    let _ = write!(
        path,
        "{}/-/{}/{}{}",
        rule.destination_path.trim_matches('/'),
        link.segment,
        link.id,
        link.rest
    );

    let mut rewritten = rule.destination_base.clone();
    rewritten.set_path(&path);
    rewritten.set_query(candidate.query());
    rewritten.set_fragment(candidate.fragment());
    rewritten.to_string()
}

/// Rewrite links in `text` according to `rule`.
///
/// `exists(relation, id)` reports whether the referenced object is present
/// on the destination; links to missing objects are left alone. Returns
/// `Cow::Borrowed` when nothing changed.
pub fn rewrite_references<'t>(
    text: &'t str,
    rule: &RewriteRule<'_>,
    exists: impl Fn(&str, &str) -> bool,
) -> Cow<'t, str> {
    let mut output: Option<String> = None;
    let mut last = 0;

    for found in URL_RE.find_iter(text) {
        let raw = found.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        let Ok(candidate) = Url::parse(raw) else {
            continue;
        };
        let Some(link) = parse_link(&candidate, rule) else {
            continue;
        };
        let Some(relation) = rule.routes.relation_for(link.segment) else {
            continue;
        };
        if !exists(relation, link.id) {
            continue;
        }

        let out = output.get_or_insert_with(|| String::with_capacity(text.len()));
        out.push_str(&text[last..found.start()]);
        out.push_str(&destination_link(&candidate, &link, rule));
        last = found.start() + raw.len();
    }

    match output {
        Some(mut out) => {
            out.push_str(&text[last..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(text),
    }
}

fn escape_html(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

/// Render plain text as the cached HTML representation: escaped paragraphs
/// with absolute URLs turned into links.
#[must_use]
pub fn render_html(text: &str) -> String {
    let mut html = String::with_capacity(text.len() + 16);
    for paragraph in text.split("\n\n").filter(|p| !p.trim().is_empty()) {
        html.push_str("<p>");
        let mut last = 0;
        for found in URL_RE.find_iter(paragraph) {
            let link = found.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            escape_html(&paragraph[last..found.start()], &mut html);
            html.push_str("<a href=\"");
            escape_html(link, &mut html);
            html.push_str("\">");
            escape_html(link, &mut html);
            html.push_str("</a>");
            last = found.start() + link.len();
        }
        escape_html(&paragraph[last..], &mut html);
        html.push_str("</p>");
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        source: Url,
        destination: Url,
        routes: RouteTable,
    }

    impl Fixture {
        fn new(source: &str, destination: &str) -> Self {
            Self {
                source: Url::parse(source).unwrap(),
                destination: Url::parse(destination).unwrap(),
                routes: RouteTable::default(),
            }
        }

        fn rule(&self) -> RewriteRule<'_> {
            RewriteRule {
                source_base: &self.source,
                destination_base: &self.destination,
                source_path: "acme/widgets",
                destination_path: "imported/widgets",
                routes: &self.routes,
            }
        }
    }

    #[test]
    fn rewrites_issue_link() {
        let fx = Fixture::new("https://old.example.com", "https://new.example.com");
        let text = "See https://old.example.com/acme/widgets/-/issues/7 for details.";
        let out = rewrite_references(text, &fx.rule(), |_, _| true);
        assert_eq!(
            out,
            "See https://new.example.com/imported/widgets/-/issues/7 for details."
        );
        assert!(matches!(out, Cow::Owned(_)));
    }

    #[test]
    fn keeps_suffix_query_and_fragment() {
        let fx = Fixture::new("https://old.example.com", "http://new.example.com:8443");
        let text = "https://old.example.com/acme/widgets/-/merge_requests/12/diffs?view=inline#note_3";
        let out = rewrite_references(text, &fx.rule(), |_, _| true);
        assert_eq!(
            out,
            "http://new.example.com:8443/imported/widgets/-/merge_requests/12/diffs?view=inline#note_3"
        );
    }

    #[test]
    fn honours_relative_url_roots() {
        let fx = Fixture::new("https://old.example.com/gitlab/", "https://new.example.com/git");
        let text = "https://old.example.com/gitlab/acme/widgets/-/issues/1";
        let out = rewrite_references(text, &fx.rule(), |_, _| true);
        assert_eq!(out, "https://new.example.com/git/imported/widgets/-/issues/1");
    }

    #[test]
    fn missing_destination_object_is_left_unchanged() {
        let fx = Fixture::new("https://old.example.com", "https://new.example.com");
        let text = "https://old.example.com/acme/widgets/-/issues/7";
        let out = rewrite_references(text, &fx.rule(), |relation, id| {
            relation == "issues" && id == "8"
        });
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, text);
    }

    #[test]
    fn work_items_resolve_against_issues() {
        let fx = Fixture::new("https://old.example.com", "https://new.example.com");
        let text = "https://old.example.com/acme/widgets/-/work_items/3";
        let out = rewrite_references(text, &fx.rule(), |relation, _| relation == "issues");
        assert_eq!(out, "https://new.example.com/imported/widgets/-/work_items/3");
    }

    #[test]
    fn non_matching_urls_are_untouched() {
        let fx = Fixture::new("https://old.example.com", "https://new.example.com");
        for text in [
            "https://other.example.com/acme/widgets/-/issues/7",
            "https://old.example.com:8443/acme/widgets/-/issues/7",
            "https://old.example.com/acme/gadgets/-/issues/7",
            "https://old.example.com/acme/widgets/-/issues/abc",
            "https://old.example.com/acme/widgets/-/issues/7abc",
            "https://old.example.com/acme/widgets/-/pipelines/7",
            "https://old.example.com/acme/widgets/issues/7",
            "no links at all",
        ] {
            let out = rewrite_references(text, &fx.rule(), |_, _| true);
            assert!(matches!(out, Cow::Borrowed(_)), "{text}");
        }
    }

    #[test]
    fn rewrites_every_occurrence() {
        let fx = Fixture::new("https://old.example.com", "https://new.example.com");
        let text = "(https://old.example.com/acme/widgets/-/issues/1) and https://old.example.com/acme/widgets/-/issues/2.";
        let out = rewrite_references(text, &fx.rule(), |_, _| true);
        assert_eq!(
            out,
            "(https://new.example.com/imported/widgets/-/issues/1) and https://new.example.com/imported/widgets/-/issues/2."
        );
    }

    #[test]
    fn render_html_escapes_and_links() {
        let html = render_html("a <b> & https://x.test/p?a=1&b=2.\n\nsecond");
        assert_eq!(
            html,
            "<p>a &lt;b&gt; &amp; <a href=\"https://x.test/p?a=1&amp;b=2\">https://x.test/p?a=1&amp;b=2</a>.</p><p>second</p>"
        );
    }
}
