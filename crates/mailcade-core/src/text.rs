//! Plain-text fallback derivation
//!
//! The transport envelope carries a text alternative derived from the
//! HTML body: tags stripped, then a fixed minimal entity set decoded.

/// Strip tags and decode `&nbsp; &amp; &lt; &gt; &quot;`.
pub fn html_to_text(html: &str) -> String {
    let mut stripped = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags() {
        assert_eq!(
            html_to_text("<p>Hello <b>world</b></p>"),
            "Hello world"
        );
    }

    #[test]
    fn test_decodes_entities() {
        assert_eq!(
            html_to_text("a&nbsp;&lt;b&gt;&nbsp;&quot;c&quot;&nbsp;&amp;&nbsp;d"),
            "a <b> \"c\" & d"
        );
    }

    #[test]
    fn test_amp_decoded_last() {
        // "&amp;lt;" must become "&lt;", not "<"
        assert_eq!(html_to_text("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_unknown_entities_left_alone() {
        assert_eq!(html_to_text("&copy; 2025"), "&copy; 2025");
    }

    #[test]
    fn test_trims_surrounding_whitespace() {
        assert_eq!(html_to_text("<div>  hi  </div>"), "hi");
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(html_to_text("just text"), "just text");
    }
}
