use std::collections::HashSet;

use ammonia::Builder as AmmoniaBuilder;
use comrak::options::Options;

pub(crate) fn default_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.footnotes = true;
    ext.description_lists = true;
    ext.front_matter_delimiter = Some("---".to_string());
    ext.alerts = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.tasklist_classes = true;
    // Raw HTML is passed through here and cleaned by the sanitizer.
    render.r#unsafe = true;

    options
}

const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "blockquote", "br", "code", "dd", "del", "details", "div", "dl", "dt", "em",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "img", "input", "kbd", "li", "ol", "p", "pre",
    "section", "span", "strong", "sub", "summary", "sup", "table", "tbody", "td", "th", "thead",
    "tr", "ul",
];

const GENERIC_ATTRIBUTES: &[&str] = &[
    "class",
    "id",
    "title",
    "lang",
    "dir",
    "aria-hidden",
    "aria-label",
    "role",
    "data-footnote-ref",
    "data-footnotes",
    "data-footnote-backref",
];

/// Fetched documents are untrusted: links open without a referrer and only
/// web and mail schemes survive.
pub(crate) fn build_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>())
        .generic_attributes(GENERIC_ATTRIBUTES.iter().copied().collect::<HashSet<_>>())
        .url_schemes(HashSet::from(["http", "https", "mailto"]))
        .link_rel(Some("nofollow noopener noreferrer"))
        .add_tag_attributes("img", &["alt", "width", "height", "loading"])
        .add_tag_attributes("pre", &["lang"])
        .add_tag_attributes("th", &["align", "colspan", "rowspan", "scope"])
        .add_tag_attributes("td", &["align", "colspan", "rowspan"])
        .add_tag_attributes("input", &["type", "checked", "disabled"]);
    builder
}
