//! Caret-annotated source excerpts for diagnostics.

use crate::parse::Span;

/// Reprint `source[excerpt]` line by line and underline `caret` on the line
/// where it starts, followed by `message`.
///
/// ```text
/// grep -x foo
///      ^^
/// unknown option -x
/// ```
pub fn render(source: &str, excerpt: Span, caret: Span, message: &str) -> String {
    let start = floor_boundary(source, excerpt.start.min(source.len()));
    let end = floor_boundary(source, excerpt.end.clamp(start, source.len()));
    let caret_start = floor_boundary(source, caret.start.clamp(start, end));

    let mut out = String::new();
    let mut offset = start;
    for line in source[start..end].split('\n') {
        let line_end = offset + line.len();
        out.push_str(line);
        out.push('\n');
        if (offset..=line_end).contains(&caret_start) {
            // Mirror tabs so the caret lines up under the offending text.
            let pad: String = source[offset..caret_start]
                .chars()
                .map(|c| if c == '\t' { '\t' } else { ' ' })
                .collect();
            let caret_end = floor_boundary(source, caret.end.clamp(caret_start, line_end));
            let width = source[caret_start..caret_end].chars().count().max(1);
            out.push_str(&pad);
            out.push_str(&"^".repeat(width));
            out.push('\n');
        }
        offset = line_end + 1;
    }
    out.push_str(message);
    out.push('\n');
    out
}

/// Like [`render`], with the excerpt widened to the whole lines around `caret`.
pub fn render_lines(source: &str, caret: Span, message: &str) -> String {
    let at = floor_boundary(source, caret.start.min(source.len()));
    let line_start = source[..at].rfind('\n').map_or(0, |i| i + 1);
    let until = floor_boundary(source, caret.end.clamp(at, source.len()));
    let line_end = source[until..].find('\n').map_or(source.len(), |i| until + i);
    render(source, Span::new(line_start, line_end), caret, message)
}

fn floor_boundary(source: &str, mut at: usize) -> usize {
    while at > 0 && !source.is_char_boundary(at) {
        at -= 1;
    }
    at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_under_token() {
        let source = "echo a ; grep -x foo";
        let out = render(source, Span::new(9, 20), Span::new(14, 16), "unknown option -x");
        assert_eq!(out, "grep -x foo\n     ^^\nunknown option -x\n");
    }

    #[test]
    fn caret_on_second_line() {
        let source = "in db {\n  bogus\n}";
        let out = render(source, Span::new(10, 15), Span::new(10, 15), "bogus: not found");
        assert_eq!(out, "bogus\n^^^^^\nbogus: not found\n");

        let out = render(source, Span::new(0, 17), Span::new(10, 15), "x");
        assert_eq!(out, "in db {\n  bogus\n  ^^^^^\n}\nx\n");
    }

    #[test]
    fn empty_caret_still_points() {
        let out = render_lines("abc 'x", Span::new(4, 6), "unterminated quote");
        assert_eq!(out, "abc 'x\n    ^^\nunterminated quote\n");
        let out = render_lines("a {", Span::new(2, 3), "unpaired braces");
        assert_eq!(out, "a {\n  ^\nunpaired braces\n");
        let out = render_lines("x", Span::new(1, 1), "eol");
        assert_eq!(out, "x\n ^\neol\n");
    }
}
