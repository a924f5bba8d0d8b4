//! Plain text and lead image extraction from feed item markup.

use scraper::{Html, Node, Selector};

/// Elements that start a new line of text when rendered.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre",
    "section", "table", "td", "th", "tr", "ul",
];

/// Elements whose text is never shown.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extracted {
    /// Tag-free text with whitespace collapsed.
    pub text: String,
    pub image_url: Option<String>,
    /// Set when there was no markup to read and the teaser is empty.
    pub degraded: bool,
}

/// Render `markup` to text and pick its image.
///
/// The image is the `src` of the first `<img>` in the markup, falling back to
/// `media_url` (the item's structured media descriptor). Never fails; broken
/// markup is read as far as the HTML parser recovers it.
pub fn extract(markup: Option<&str>, media_url: Option<&str>) -> Extracted {
    let markup = markup.unwrap_or_default();
    let fragment = Html::parse_fragment(markup);

    let text = render_text(&fragment);
    let image_url = first_image(&fragment).or_else(|| {
        media_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    });

    Extracted {
        text,
        image_url,
        degraded: markup.trim().is_empty(),
    }
}

fn render_text(fragment: &Html) -> String {
    let mut raw = String::new();
    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(text) => {
                let hidden = node
                    .parent()
                    .and_then(|parent| parent.value().as_element())
                    .map(|el| HIDDEN_ELEMENTS.contains(&el.name()))
                    .unwrap_or(false);
                if !hidden {
                    raw.push_str(text);
                }
            }
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => raw.push(' '),
            _ => {}
        }
    }

    raw.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn first_image(fragment: &Html) -> Option<String> {
    let selector = Selector::parse("img[src]").ok()?;
    fragment
        .select(&selector)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .find(|src| !src.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_and_text_from_html_document() {
        let result = extract(Some(r#"<html><img src="http://x/a.png"/>text</html>"#), None);
        assert_eq!(result.text, "text");
        assert_eq!(result.image_url, Some("http://x/a.png".to_string()));
        assert!(!result.degraded);
    }

    #[test]
    fn test_first_image_wins() {
        let result = extract(
            Some(r#"<p><img src="one.jpg"> and <img src="two.jpg"></p>"#),
            Some("media.jpg"),
        );
        assert_eq!(result.image_url, Some("one.jpg".to_string()));
    }

    #[test]
    fn test_media_fallback_when_no_img() {
        let result = extract(Some("<p>Council meets tonight</p>"), Some("https://cdn/m.jpg"));
        assert_eq!(result.text, "Council meets tonight");
        assert_eq!(result.image_url, Some("https://cdn/m.jpg".to_string()));
    }

    #[test]
    fn test_no_image_anywhere() {
        let result = extract(Some("plain words"), None);
        assert_eq!(result.text, "plain words");
        assert_eq!(result.image_url, None);
    }

    #[test]
    fn test_img_without_src_is_ignored() {
        let result = extract(Some(r#"<img alt="x"><img src="real.png">"#), None);
        assert_eq!(result.image_url, Some("real.png".to_string()));
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        let result = extract(Some("  line one\n\n\t line   two  "), None);
        assert_eq!(result.text, "line one line two");
    }

    #[test]
    fn test_block_elements_separate_words() {
        let markup = "<p>first</p><p>second</p><ul><li>a</li><li>b</li></ul>";
        let result = extract(Some(markup), None);
        assert_eq!(result.text, "first second a b");
    }

    #[test]
    fn test_inline_elements_do_not_split_words() {
        let result = extract(Some("re<b>mark</b>able"), None);
        assert_eq!(result.text, "remarkable");
    }

    #[test]
    fn test_entities_are_decoded() {
        let result = extract(Some("Fish &amp; chips &lt;3"), None);
        assert_eq!(result.text, "Fish & chips <3");
    }

    #[test]
    fn test_scripts_are_dropped() {
        let result = extract(Some("<script>var x = 1;</script>visible"), None);
        assert_eq!(result.text, "visible");
    }

    #[test]
    fn test_malformed_markup_degrades_gracefully() {
        let result = extract(Some("<div><p>unclosed <b>bold <img src=\"a.png\""), None);
        assert!(result.text.contains("unclosed"));
        assert!(result.text.contains("bold"));
    }

    #[test]
    fn test_missing_content_is_degraded() {
        let result = extract(None, Some("https://cdn/m.jpg"));
        assert!(result.degraded);
        assert_eq!(result.text, "");
        assert_eq!(result.image_url, Some("https://cdn/m.jpg".to_string()));
    }

    #[test]
    fn test_blank_media_url_is_ignored() {
        let result = extract(Some("x"), Some("   "));
        assert_eq!(result.image_url, None);
    }
}
