//! Feed parsing: Atom, RSS 2.0, and an HTML index fallback.
//!
//! Turns a raw feed document into [`Post`]s, harvesting inline article HTML
//! when the feed carries it (Atom `<content type="html">`, RSS
//! `content:encoded`) so the pipeline can skip a second round-trip.
//!
//! The parser is tolerant by contract: entries missing a URL or title are
//! dropped silently, unparseable timestamps degrade to `None`, and a
//! syntactically broken feed yields the empty list rather than an error.
//! Input order is always preserved.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::html;
use crate::models::{post_id_for_url, Post};

/// Parse a feed document into posts.
///
/// Format detection is a cheap prefix inspection: an XML prolog or an early
/// `<feed>`/`<rss>` marker selects the XML path; anything else is treated as
/// an HTML index page. If the XML path produces nothing, the HTML fallback
/// runs anyway, so a mislabelled document still has a chance.
pub fn discover_posts(raw_feed: &str, default_source: &str) -> Vec<Post> {
    let trimmed = raw_feed.trim_start();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let head = &trimmed[..trimmed.len().min(256)];
    let looks_like_xml = trimmed.starts_with("<?xml")
        || trimmed.starts_with("<feed")
        || trimmed.starts_with("<rss")
        || head.contains("<feed")
        || head.contains("<rss");

    if looks_like_xml {
        let posts = parse_xml_feed(raw_feed, default_source);
        if !posts.is_empty() {
            return posts;
        }
        debug!("feed looked like XML but produced no entries; trying HTML fallback");
    }

    parse_html_index(raw_feed, default_source)
}

fn is_absolute_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Best-effort timestamp parsing. RFC 3339 and RFC 2822 first (Atom and RSS
/// wire formats), then the lenient date shapes feeds actually emit.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

/// Fields accumulated while walking one `<entry>` / `<item>`.
#[derive(Default)]
struct EntryDraft {
    url: Option<String>,
    /// Atom: a link without rel="alternate" kept as a fallback.
    fallback_url: Option<String>,
    title: String,
    published: Option<String>,
    updated: Option<String>,
    tags: Vec<String>,
    /// content:encoded / Atom content, the preferred inline body.
    content: Option<String>,
    /// RSS description, used only when no richer content exists.
    description: Option<String>,
}

impl EntryDraft {
    fn into_post(self, default_source: &str) -> Option<Post> {
        let url = self
            .url
            .or(self.fallback_url)
            .map(|u| u.trim().to_string())
            .filter(|u| is_absolute_url(u))?;

        let title = html::collapse_whitespace(&html::visible_text(&self.title));
        if title.is_empty() {
            return None;
        }

        let published_at = self
            .published
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.updated.as_deref().and_then(parse_timestamp));

        let tags = self
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let inline_content = self
            .content
            .or(self.description)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Some(Post {
            id: post_id_for_url(&url),
            url,
            title,
            published_at,
            tags,
            source: default_source.to_string(),
            inline_content,
        })
    }
}

/// Text-bearing elements captured inside an entry.
#[derive(Clone, Copy, PartialEq)]
enum Capture {
    Title,
    Link,
    Guid,
    Published,
    Updated,
    PubDate,
    Category,
    Content,
    Encoded,
    Description,
    Other,
}

fn parse_xml_feed(raw_feed: &str, default_source: &str) -> Vec<Post> {
    let mut reader = Reader::from_str(raw_feed);
    reader.config_mut().trim_text(true);

    let mut posts = Vec::new();
    let mut draft: Option<EntryDraft> = None;
    // (capture kind, element depth it started at, accumulated text)
    let mut capture: Option<(Capture, usize, String)> = None;
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                depth += 1;

                if name == "entry" || name == "item" {
                    draft = Some(EntryDraft::default());
                    continue;
                }

                let Some(entry) = draft.as_mut() else { continue };

                if capture.is_some() {
                    // Nested markup inside a captured field: keep collecting
                    // text, ignore the tags themselves.
                    continue;
                }

                match name.as_str() {
                    "link" => {
                        // Atom links carry href as an attribute; RSS links
                        // carry the URL as text.
                        match attr_value(&e, b"href") {
                            Some(href) => apply_atom_link(entry, &e, href),
                            None => capture = Some((Capture::Link, depth, String::new())),
                        }
                    }
                    "title" => capture = Some((Capture::Title, depth, String::new())),
                    "guid" => capture = Some((Capture::Guid, depth, String::new())),
                    "published" => capture = Some((Capture::Published, depth, String::new())),
                    "updated" => capture = Some((Capture::Updated, depth, String::new())),
                    "pubDate" => capture = Some((Capture::PubDate, depth, String::new())),
                    "category" => match attr_value(&e, b"term") {
                        Some(term) => {
                            if !term.trim().is_empty() {
                                entry.tags.push(term);
                            }
                        }
                        None => capture = Some((Capture::Category, depth, String::new())),
                    },
                    "content" => {
                        let content_type =
                            attr_value(&e, b"type").unwrap_or_else(|| "text".to_string());
                        if matches!(content_type.as_str(), "html" | "xhtml" | "text/html") {
                            capture = Some((Capture::Content, depth, String::new()));
                        } else {
                            capture = Some((Capture::Other, depth, String::new()));
                        }
                    }
                    "encoded" => capture = Some((Capture::Encoded, depth, String::new())),
                    "description" => capture = Some((Capture::Description, depth, String::new())),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if let Some(entry) = draft.as_mut() {
                    if capture.is_none() {
                        if name == "link" {
                            if let Some(href) = attr_value(&e, b"href") {
                                apply_atom_link(entry, &e, href);
                            }
                        } else if name == "category" {
                            if let Some(term) = attr_value(&e, b"term") {
                                if !term.trim().is_empty() {
                                    entry.tags.push(term);
                                }
                            }
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, _, buf)) = capture.as_mut() {
                    if let Ok(text) = t.unescape() {
                        buf.push_str(&text);
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, _, buf)) = capture.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();

                let capture_done = matches!(capture.as_ref(), Some((_, start_depth, _)) if depth == *start_depth);
                if capture_done {
                    if let Some((kind, _, text)) = capture.take() {
                        if let Some(entry) = draft.as_mut() {
                            finish_capture(entry, kind, text);
                        }
                    }
                }
                depth = depth.saturating_sub(1);

                if name == "entry" || name == "item" {
                    if let Some(entry) = draft.take() {
                        if let Some(post) = entry.into_post(default_source) {
                            posts.push(post);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "feed XML parse aborted");
                return Vec::new();
            }
        }
    }

    posts
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == name {
            a.unescape_value()
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        } else {
            None
        }
    })
}

fn apply_atom_link(entry: &mut EntryDraft, e: &quick_xml::events::BytesStart<'_>, href: String) {
    let rel = attr_value(e, b"rel");
    match rel.as_deref() {
        Some("alternate") => entry.url = Some(href),
        None => {
            // Untagged links are alternates by Atom convention, but an
            // explicit rel="alternate" still wins.
            if entry.url.is_none() {
                entry.url = Some(href);
            }
        }
        Some(_) => {
            if entry.fallback_url.is_none() {
                entry.fallback_url = Some(href);
            }
        }
    }
}

fn finish_capture(entry: &mut EntryDraft, kind: Capture, text: String) {
    match kind {
        Capture::Title => {
            // First title wins: later ones belong to nested elements
            // such as Atom's <source>.
            if entry.title.is_empty() {
                entry.title = text;
            }
        }
        Capture::Link => {
            let trimmed = text.trim();
            if entry.url.is_none() && !trimmed.is_empty() {
                entry.url = Some(trimmed.to_string());
            }
        }
        Capture::Guid => {
            let trimmed = text.trim();
            if entry.url.is_none() && is_absolute_url(trimmed) {
                entry.url = Some(trimmed.to_string());
            }
        }
        Capture::Published => entry.published = Some(text),
        Capture::Updated => entry.updated = Some(text),
        Capture::PubDate => entry.published = Some(text),
        Capture::Category => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                entry.tags.push(trimmed.to_string());
            }
        }
        Capture::Content | Capture::Encoded => {
            if !text.trim().is_empty() {
                entry.content = Some(text);
            }
        }
        Capture::Description => {
            if entry.content.is_none() && !text.trim().is_empty() {
                entry.description = Some(text);
            }
        }
        Capture::Other => {}
    }
}

/// HTML index fallback: walk plausible post containers in priority order
/// (`<article>`, `div.post`, then any `<div>` holding a link) and take the
/// first anchor with an absolute URL and non-empty text from each.
fn parse_html_index(raw_feed: &str, default_source: &str) -> Vec<Post> {
    let mut containers = html::find_elements(raw_feed, |t| t.name == "article");
    if containers.is_empty() {
        containers = html::find_elements(raw_feed, |t| {
            t.name == "div"
                && html::attr(&t.attrs, "class")
                    .map(|c| c.split_whitespace().any(|cls| cls == "post"))
                    .unwrap_or(false)
        });
    }
    if containers.is_empty() {
        containers = html::find_elements(raw_feed, |t| t.name == "div");
    }

    let mut posts = Vec::new();
    let mut seen_urls = std::collections::HashSet::new();

    for (_, inner) in containers {
        let Some((url, title)) = first_anchor(inner) else {
            continue;
        };
        if !seen_urls.insert(url.clone()) {
            continue;
        }

        let published_at = html::find_element(inner, |t| t.name == "time")
            .and_then(|(tag, _)| html::attr(&tag.attrs, "datetime"))
            .and_then(|value| parse_timestamp(&value));

        posts.push(Post {
            id: post_id_for_url(&url),
            url,
            title,
            published_at,
            tags: Vec::new(),
            source: default_source.to_string(),
            inline_content: None,
        });
    }

    posts
}

fn first_anchor(container: &str) -> Option<(String, String)> {
    for (tag, inner) in html::find_elements(container, |t| t.name == "a") {
        let Some(href) = html::attr(&tag.attrs, "href") else {
            continue;
        };
        if !is_absolute_url(&href) {
            continue;
        }
        let text = html::visible_text(inner);
        if text.is_empty() {
            continue;
        }
        return Some((href, text));
    }
    None
}
