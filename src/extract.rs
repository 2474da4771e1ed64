//! Article content extraction.
//!
//! Pure transformation from fetched HTML to [`RawContent`]: pick the most
//! plausible article root, strip non-content subtrees, collapse whitespace,
//! and cut heading-delimited sections. Extraction never fails; an empty or
//! hopeless document degrades to the post title so downstream stages never
//! see empty text.

use crate::html::{self, Tag, Token, Tokenizer};
use crate::models::{Post, RawContent};

/// Class fragments that mark a `<div>` as a plausible article container.
const ARTICLE_CLASS_HINTS: &[&str] = &[
    "post",
    "article",
    "blog-article",
    "blog-post",
    "content",
    "main-content",
];

/// Extract cleaned text and sections from an article page.
///
/// The returned `html` field is the input unchanged. `text` is always
/// non-empty: when the document yields nothing, the post title stands in.
pub fn extract(post: &Post, page_html: &str) -> RawContent {
    let root = select_article_root(page_html);

    let visible = html::visible_text(root);
    let text = if visible.is_empty() {
        post.title.clone()
    } else {
        visible.clone()
    };

    let mut sections = extract_sections(root);
    if sections.is_empty() && !visible.is_empty() {
        sections = vec![text.clone()];
    }

    RawContent {
        post_id: post.id.clone(),
        url: post.url.clone(),
        title: post.title.clone(),
        html: page_html.to_string(),
        text,
        sections,
    }
}

/// Root selection cascade: `<article>`, then a `<div>` whose class contains
/// a known article hint, then `<main>`, then `<body>`, then the whole input.
fn select_article_root(page_html: &str) -> &str {
    if let Some((_, inner)) = html::find_element(page_html, |t| t.name == "article") {
        return inner;
    }

    for hint in ARTICLE_CLASS_HINTS {
        if let Some((_, inner)) = html::find_element(page_html, |t| {
            t.name == "div" && div_class_contains(t, hint)
        }) {
            return inner;
        }
    }

    if let Some((_, inner)) = html::find_element(page_html, |t| t.name == "main") {
        return inner;
    }

    if let Some((_, inner)) = html::find_element(page_html, |t| t.name == "body") {
        return inner;
    }

    page_html
}

fn div_class_contains(tag: &Tag, hint: &str) -> bool {
    html::attr(&tag.attrs, "class")
        .map(|classes| classes.to_lowercase().contains(hint))
        .unwrap_or(false)
}

/// Cut the root into heading-delimited sections: each `h1..h6` heading plus
/// the paragraphs that follow it, up to the next heading. Paragraphs before
/// the first heading are not part of any section.
fn extract_sections(root: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current_heading: Option<String> = None;
    let mut current_paragraphs: Vec<String> = Vec::new();

    let mut tokenizer = Tokenizer::new(root);
    // Name and accumulated text of the heading/paragraph being read.
    let mut reading: Option<(String, String, usize)> = None;
    let mut depth: usize = 0;

    while let Some((token, _)) = tokenizer.next_token() {
        match token {
            Token::Open(tag) => {
                if tag.self_closing {
                    continue;
                }
                depth += 1;
                if reading.is_none() && (is_heading(&tag.name) || tag.name == "p") {
                    reading = Some((tag.name.clone(), String::new(), depth));
                }
            }
            Token::Text(text) => {
                if let Some((_, buf, _)) = reading.as_mut() {
                    buf.push_str(&html::decode_entities(text));
                    buf.push(' ');
                }
            }
            Token::Close(name) => {
                let finished = matches!(
                    reading.as_ref(),
                    Some((reading_name, _, start_depth))
                        if name == *reading_name && depth == *start_depth
                );
                if finished {
                    if let Some((element, buf, _)) = reading.take() {
                        let text = html::collapse_whitespace(&buf);
                        if is_heading(&element) {
                            flush_section(
                                &mut sections,
                                &mut current_heading,
                                &mut current_paragraphs,
                            );
                            if !text.is_empty() {
                                current_heading = Some(text);
                            }
                        } else if !text.is_empty() && current_heading.is_some() {
                            current_paragraphs.push(text);
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
        }
    }

    flush_section(&mut sections, &mut current_heading, &mut current_paragraphs);
    sections
}

fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn flush_section(
    sections: &mut Vec<String>,
    heading: &mut Option<String>,
    paragraphs: &mut Vec<String>,
) {
    if let Some(h) = heading.take() {
        if !paragraphs.is_empty() {
            sections.push(format!("{}\n\n{}", h, paragraphs.join("\n\n")));
        }
    }
    paragraphs.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Post;

    fn post() -> Post {
        Post::new("https://example.org/post", "Fallback Title", "blog")
    }

    #[test]
    fn prefers_article_root() {
        let html = r#"<html><body>
            <nav>Navigation junk</nav>
            <article><p>Real content here.</p></article>
        </body></html>"#;
        let raw = extract(&post(), html);
        assert_eq!(raw.text, "Real content here.");
        assert_eq!(raw.html, html);
    }

    #[test]
    fn falls_back_to_classed_div() {
        let html = r#"<body><div class="sidebar">aside</div>
            <div class="blog-post"><p>Div content.</p></div></body>"#;
        let raw = extract(&post(), html);
        assert_eq!(raw.text, "Div content.");
    }

    #[test]
    fn falls_back_to_main_then_body() {
        let html = "<body><main><p>Main content.</p></main></body>";
        assert_eq!(extract(&post(), html).text, "Main content.");

        let html = "<body><p>Body content.</p></body>";
        assert_eq!(extract(&post(), html).text, "Body content.");
    }

    #[test]
    fn strips_scripts_and_styles() {
        let html = r#"<article><script>alert(1)</script><style>p{}</style>
            <noscript>enable js</noscript><p>Visible.</p></article>"#;
        assert_eq!(extract(&post(), html).text, "Visible.");
    }

    #[test]
    fn whitespace_collapsed_across_newlines() {
        let html = "<article><p>line one\n\n   line\ttwo</p></article>";
        assert_eq!(extract(&post(), html).text, "line one line two");
    }

    #[test]
    fn empty_document_substitutes_title() {
        let raw = extract(&post(), "");
        assert_eq!(raw.text, "Fallback Title");
        assert!(raw.sections.is_empty());

        let raw = extract(&post(), "<article><script>only code</script></article>");
        assert_eq!(raw.text, "Fallback Title");
    }

    #[test]
    fn inline_paragraph_fragment_extracts_text() {
        // The shape inline feed content arrives in: no article/body wrapper.
        let raw = extract(&post(), "<p>hello</p>");
        assert_eq!(raw.text, "hello");
        assert_eq!(raw.sections, vec!["hello"]);
    }

    #[test]
    fn sections_follow_headings() {
        let html = r#"<article>
            <p>Intro paragraph before any heading.</p>
            <h2>Setup</h2>
            <p>Install the driver.</p>
            <p>Configure the runtime.</p>
            <h2>Results</h2>
            <p>Throughput doubled.</p>
        </article>"#;
        let raw = extract(&post(), html);
        assert_eq!(raw.sections.len(), 2);
        assert_eq!(
            raw.sections[0],
            "Setup\n\nInstall the driver.\n\nConfigure the runtime."
        );
        assert_eq!(raw.sections[1], "Results\n\nThroughput doubled.");
    }

    #[test]
    fn no_headings_yields_single_full_text_section() {
        let html = "<article><p>Just one paragraph.</p></article>";
        let raw = extract(&post(), html);
        assert_eq!(raw.sections, vec!["Just one paragraph."]);
    }

    #[test]
    fn heading_without_paragraphs_emits_nothing() {
        let html = "<article><h2>Lonely heading</h2></article>";
        let raw = extract(&post(), html);
        // Text exists (the heading) so the whole-text section stands in.
        assert_eq!(raw.sections, vec!["Lonely heading"]);
    }
}
