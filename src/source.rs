use std::fs;
use std::io;
use std::path::Path;

/// A source file prepared for lexing: raw bytes with `//` comments blanked
/// out so every token span still points at the on-disk file.
pub struct SourceFile {
    pub name: String,
    text: String,
}

impl SourceFile {
    pub fn read(path: &Path) -> io::Result<SourceFile> {
        let raw = fs::read_to_string(path)?;
        Ok(SourceFile::from_str(&path.display().to_string(), &raw))
    }

    pub fn from_str(name: &str, raw: &str) -> SourceFile {
        SourceFile {
            name: name.to_string(),
            text: strip_comments(raw),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Slice of the source covered by a byte span.
    pub fn slice(&self, start: usize, end: usize) -> &str {
        &self.text[start..end]
    }

    /// 1-based line and column of a byte offset.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let mut line = 1;
        let mut col = 1;
        for b in self.text.bytes().take(offset) {
            if b == b'\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    /// Renders the source line containing `offset` with a caret under the
    /// offending column and tildes covering the remainder of the span.
    pub fn excerpt(&self, offset: usize, len: usize) -> String {
        let offset = offset.min(self.text.len().saturating_sub(1));
        let bytes = self.text.as_bytes();

        let mut line_start = offset;
        while line_start > 0 && bytes[line_start - 1] != b'\n' {
            line_start -= 1;
        }
        let mut line_end = offset;
        while line_end < bytes.len() && bytes[line_end] != b'\n' {
            line_end += 1;
        }

        let line = &self.text[line_start..line_end];
        let col = offset - line_start;

        let mut out = String::new();
        out.push_str(line);
        out.push('\n');
        for _ in 0..col {
            out.push(' ');
        }
        out.push('^');
        // underline the rest of the token, bounded by the line itself
        let avail = line.len().saturating_sub(col + 1);
        for _ in 0..len.saturating_sub(1).min(avail) {
            out.push('~');
        }
        out.push('\n');
        out
    }
}

/// Blanks `//` line comments with spaces. Newlines are preserved and every
/// surviving byte keeps its original offset.
fn strip_comments(raw: &str) -> String {
    enum State {
        Default,
        FirstSlash,
        Comment,
    }

    let mut out = String::with_capacity(raw.len());
    let mut state = State::Default;

    for c in raw.chars() {
        match state {
            State::Default => {
                if c == '/' {
                    state = State::FirstSlash;
                } else if c != '\r' {
                    out.push(c);
                }
            }
            State::FirstSlash => {
                if c == '/' {
                    out.push_str("  ");
                    state = State::Comment;
                } else {
                    out.push('/');
                    if c != '\r' {
                        out.push(c);
                    }
                    state = State::Default;
                }
            }
            State::Comment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Default;
                } else {
                    out.push(' ');
                }
            }
        }
    }

    if let State::FirstSlash = state {
        out.push('/');
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments_preserves_offsets() {
        let src = SourceFile::from_str("t.chdl", "a = 1; // trailing\nb = 2;\n");
        let text = src.text();
        assert_eq!(&text[..6], "a = 1;");
        // comment bytes replaced by spaces, newline kept in place
        assert_eq!(text.as_bytes()[18], b'\n');
        assert_eq!(&text[19..25], "b = 2;");
    }

    #[test]
    fn test_strip_comments_keeps_single_slash() {
        let src = SourceFile::from_str("t.chdl", "a / b;\n");
        assert_eq!(&src.text()[..6], "a / b;");
    }

    #[test]
    fn test_line_col() {
        let src = SourceFile::from_str("t.chdl", "abc\ndef\n");
        assert_eq!(src.line_col(0), (1, 1));
        assert_eq!(src.line_col(2), (1, 3));
        assert_eq!(src.line_col(4), (2, 1));
        assert_eq!(src.line_col(6), (2, 3));
    }

    #[test]
    fn test_excerpt_caret_and_tildes() {
        let src = SourceFile::from_str("t.chdl", "local foo = 1;\n");
        let rendered = src.excerpt(6, 3);
        let mut lines = rendered.lines();
        assert_eq!(lines.next().unwrap(), "local foo = 1;");
        assert_eq!(lines.next().unwrap(), "      ^~~");
    }

    #[test]
    fn test_excerpt_single_byte_span() {
        let src = SourceFile::from_str("t.chdl", "x;\n");
        let rendered = src.excerpt(1, 1);
        assert!(rendered.ends_with("^\n"));
    }
}
