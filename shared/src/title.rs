use percent_encoding::percent_decode_str;
use url::Url;

pub const TITLE_PLACEHOLDER: &str = "Title unavailable";

const PAGE_EXTENSIONS: &[&str] = &[".html", ".htm", ".shtml", ".php", ".aspx", ".asp", ".cms"];

/// Best-effort article title from a source URL's last path segment.
///
/// `-` and `_` become spaces, the segment is percent-decoded and each word is
/// capitalized. Anything that cannot be parsed yields [`TITLE_PLACEHOLDER`].
pub fn title_from_url(url: Option<&str>) -> String {
    url.and_then(derive_title)
        .unwrap_or_else(|| TITLE_PLACEHOLDER.to_owned())
}

fn derive_title(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = strip_page_extension(segment);

    let spaced: String = stem
        .chars()
        .map(|c| if matches!(c, '-' | '_') { ' ' } else { c })
        .collect();
    let decoded = percent_decode_str(&spaced).decode_utf8().ok()?;

    let title = capitalize_words(&decoded);
    if title.is_empty() { None } else { Some(title) }
}

fn strip_page_extension(segment: &str) -> &str {
    let lower = segment.to_ascii_lowercase();
    PAGE_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext) && lower.len() > ext.len())
        .map_or(segment, |ext| &segment[..segment.len() - ext.len()])
}

fn capitalize_words(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(url: &str) -> String {
        title_from_url(Some(url))
    }

    #[test]
    fn derives_title_from_last_segment() {
        assert_eq!(
            title("https://example.com/a/My-Article_Title"),
            "My Article Title"
        );
    }

    #[test]
    fn capitalizes_lowercase_slugs_and_ignores_query() {
        assert_eq!(
            title("https://news.example.org/world/protesters-gather-in-the-capital/?utm=x"),
            "Protesters Gather In The Capital"
        );
    }

    #[test]
    fn percent_decodes_after_separator_replacement() {
        assert_eq!(
            title("https://example.com/caf%C3%A9-owners_speak%20out"),
            "Café Owners Speak Out"
        );
    }

    #[test]
    fn strips_page_extensions() {
        assert_eq!(
            title("https://example.com/2025/06/01/floods-hit-region.html"),
            "Floods Hit Region"
        );
    }

    #[test]
    fn falls_back_to_placeholder() {
        assert_eq!(title(""), TITLE_PLACEHOLDER);
        assert_eq!(title("not a url"), TITLE_PLACEHOLDER);
        assert_eq!(title("https://example.com/"), TITLE_PLACEHOLDER);
        assert_eq!(title("https://example.com/%FF%FE"), TITLE_PLACEHOLDER);
        assert_eq!(title("https://example.com/---"), TITLE_PLACEHOLDER);
        assert_eq!(title("mailto:someone@example.com"), TITLE_PLACEHOLDER);
        assert_eq!(title_from_url(None), TITLE_PLACEHOLDER);
    }
}
