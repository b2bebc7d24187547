//! Markup rendering for outbound bodies.

use std::sync::Arc;

use crate::error::RenderError;

/// Converts markup into the target chat dialect.
pub trait Renderer: Send + Sync {
    fn render(&self, markup: &str) -> Result<String, RenderError>;
}

impl<F> Renderer for F
where
    F: Fn(&str) -> Result<String, RenderError> + Send + Sync,
{
    fn render(&self, markup: &str) -> Result<String, RenderError> {
        self(markup)
    }
}

/// A shared, type-erased renderer.
pub type BoxedRenderer = Arc<dyn Renderer>;

/// Passes bodies through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbatim;

impl Renderer for Verbatim {
    fn render(&self, markup: &str) -> Result<String, RenderError> {
        Ok(markup.to_owned())
    }
}

/// Strips common Markdown so bodies read well on plain-text networks.
///
/// Handles headers, bold/italic markers, inline code, code fences and
/// `[label](url)` links.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl Renderer for PlainText {
    fn render(&self, markup: &str) -> Result<String, RenderError> {
        let mut out = Vec::new();
        let mut fenced = false;
        for line in markup.lines() {
            if line.trim_start().starts_with("```") {
                fenced = !fenced;
                continue;
            }
            if fenced {
                out.push(line.to_owned());
                continue;
            }
            let line = line.trim_start_matches('#').trim_start_matches(' ');
            let line = strip_links(line);
            out.push(line.replace("**", "").replace("__", "").replace('`', ""));
        }
        if fenced {
            return Err(RenderError::new("unterminated code fence"));
        }
        Ok(out.join("\n"))
    }
}

fn strip_links(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find("](").map(|i| open + i) else {
            break;
        };
        let Some(end) = rest[close..].find(')').map(|i| close + i) else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&rest[open + 1..close]);
        out.push_str(" (");
        out.push_str(&rest[close + 2..end]);
        out.push(')');
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_strips_markdown() {
        let rendered = PlainText
            .render("## Title\n**bold** and `code`, see [docs](https://example.org)")
            .unwrap();
        assert_eq!(
            rendered,
            "Title\nbold and code, see docs (https://example.org)"
        );
    }

    #[test]
    fn test_plain_text_keeps_fenced_blocks() {
        let rendered = PlainText.render("```\n**raw**\n```").unwrap();
        assert_eq!(rendered, "**raw**");
        assert!(PlainText.render("```\nopen").is_err());
    }

    #[test]
    fn test_closure_renderer() {
        let upper = |s: &str| Ok::<_, RenderError>(s.to_uppercase());
        assert_eq!(upper.render("hi").unwrap(), "HI");
        assert_eq!(Verbatim.render("**x**").unwrap(), "**x**");
    }
}
