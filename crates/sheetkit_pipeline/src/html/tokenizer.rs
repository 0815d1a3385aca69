//! Tolerant HTML tokenizer.
//!
//! Emits start tags, end tags and raw text. Comments, declarations and the
//! bodies of `script`/`style` are skipped. Malformed markup never fails: an
//! unterminated tag is closed at end of input, and a stray `<` is text.

use sheetkit_io_fs::find_ascii_ci;

/// One lexical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumHtmlToken<'a> {
    /// `<name ...>`; `name` is lowercased.
    StartTag {
        /// Tag name.
        name: String,
        /// Written as `<name ... />`.
        if_self_closing: bool,
    },
    /// `</name>`; `name` is lowercased.
    EndTag {
        /// Tag name.
        name: String,
    },
    /// Text between tags, entities still encoded.
    Text(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumRawTextTag {
    Script,
    Style,
}

impl EnumRawTextTag {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "script" => Some(Self::Script),
            "style" => Some(Self::Style),
            _ => None,
        }
    }

    fn closing_needle(self) -> &'static [u8] {
        match self {
            Self::Script => b"</script",
            Self::Style => b"</style",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumTokenizerState {
    Text,
    TagOpen,
    InTag,
    InAttributeValue(u8),
    Comment,
    RawText(EnumRawTextTag),
}

#[derive(Debug)]
struct SpecTagPending {
    name: String,
    if_end: bool,
}

impl SpecTagPending {
    fn into_token<'a>(self, if_self_closing: bool) -> EnumHtmlToken<'a> {
        if self.if_end {
            EnumHtmlToken::EndTag { name: self.name }
        } else {
            EnumHtmlToken::StartTag {
                name: self.name,
                if_self_closing,
            }
        }
    }
}

/// Iterator of [`EnumHtmlToken`] over a borrowed document.
#[derive(Debug)]
pub struct HtmlTokenizer<'a> {
    text: &'a str,
    n_pos: usize,
    state: EnumTokenizerState,
    tag_pending: Option<SpecTagPending>,
}

impl<'a> HtmlTokenizer<'a> {
    /// Tokenizer positioned at the start of `text`.
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            n_pos: 0,
            state: EnumTokenizerState::Text,
            tag_pending: None,
        }
    }

    fn skip_past(&mut self, needle: &[u8]) {
        let v_bytes = &self.text.as_bytes()[self.n_pos..];
        self.n_pos = match find_ascii_ci(v_bytes, needle) {
            Some(n_off) => self.n_pos + n_off + needle.len(),
            None => self.text.len(),
        };
    }

    fn read_tag_name(&self, n_start: usize) -> (String, usize) {
        let v_bytes = self.text.as_bytes();
        let mut n_end = n_start;
        while n_end < v_bytes.len()
            && (v_bytes[n_end].is_ascii_alphanumeric() || matches!(v_bytes[n_end], b'-' | b':'))
        {
            n_end += 1;
        }
        (self.text[n_start..n_end].to_ascii_lowercase(), n_end)
    }

    fn step_tag_open(&mut self) -> Option<EnumHtmlToken<'a>> {
        let v_bytes = self.text.as_bytes();
        if v_bytes[self.n_pos..].starts_with(b"<!--") {
            self.n_pos += 4;
            self.state = EnumTokenizerState::Comment;
            return None;
        }
        match v_bytes.get(self.n_pos + 1).copied() {
            Some(b'!' | b'?') => {
                self.skip_past(b">");
                self.state = EnumTokenizerState::Text;
                None
            }
            Some(b'/') => {
                let (name, n_end) = self.read_tag_name(self.n_pos + 2);
                if name.is_empty() {
                    self.skip_past(b">");
                    self.state = EnumTokenizerState::Text;
                } else {
                    self.tag_pending = Some(SpecTagPending { name, if_end: true });
                    self.n_pos = n_end;
                    self.state = EnumTokenizerState::InTag;
                }
                None
            }
            Some(b) if b.is_ascii_alphabetic() => {
                let (name, n_end) = self.read_tag_name(self.n_pos + 1);
                self.tag_pending = Some(SpecTagPending {
                    name,
                    if_end: false,
                });
                self.n_pos = n_end;
                self.state = EnumTokenizerState::InTag;
                None
            }
            _ => {
                let n_start = self.n_pos;
                self.n_pos += 1;
                self.state = EnumTokenizerState::Text;
                Some(EnumHtmlToken::Text(&self.text[n_start..n_start + 1]))
            }
        }
    }

    fn step_in_tag(&mut self) -> Option<EnumHtmlToken<'a>> {
        let v_bytes = self.text.as_bytes();
        let Some(n_off) = v_bytes[self.n_pos..]
            .iter()
            .position(|&b| matches!(b, b'>' | b'"' | b'\''))
        else {
            self.n_pos = v_bytes.len();
            return None;
        };
        let n_idx = self.n_pos + n_off;

        if v_bytes[n_idx] != b'>' {
            // Quotes only open a value right after `=`.
            let if_after_equals = v_bytes[..n_idx]
                .iter()
                .rev()
                .find(|b| !b.is_ascii_whitespace())
                .is_some_and(|&b| b == b'=');
            self.n_pos = n_idx + 1;
            if if_after_equals {
                self.state = EnumTokenizerState::InAttributeValue(v_bytes[n_idx]);
            }
            return None;
        }

        let if_self_closing = n_idx > 0 && v_bytes[n_idx - 1] == b'/';
        self.n_pos = n_idx + 1;
        let tag = self.tag_pending.take()?;
        self.state = match EnumRawTextTag::from_name(&tag.name) {
            Some(raw_tag) if !tag.if_end && !if_self_closing => EnumTokenizerState::RawText(raw_tag),
            _ => EnumTokenizerState::Text,
        };
        Some(tag.into_token(if_self_closing))
    }
}

impl<'a> Iterator for HtmlTokenizer<'a> {
    type Item = EnumHtmlToken<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let v_bytes = self.text.as_bytes();
            if self.n_pos >= v_bytes.len() {
                return self.tag_pending.take().map(|tag| tag.into_token(false));
            }

            match self.state {
                EnumTokenizerState::Text => {
                    let n_start = self.n_pos;
                    match v_bytes[n_start..].iter().position(|&b| b == b'<') {
                        Some(0) => self.state = EnumTokenizerState::TagOpen,
                        Some(n_off) => {
                            self.n_pos = n_start + n_off;
                            self.state = EnumTokenizerState::TagOpen;
                            return Some(EnumHtmlToken::Text(&self.text[n_start..self.n_pos]));
                        }
                        None => {
                            self.n_pos = v_bytes.len();
                            return Some(EnumHtmlToken::Text(&self.text[n_start..]));
                        }
                    }
                }
                EnumTokenizerState::TagOpen => {
                    if let Some(token) = self.step_tag_open() {
                        return Some(token);
                    }
                }
                EnumTokenizerState::InTag => {
                    if let Some(token) = self.step_in_tag() {
                        return Some(token);
                    }
                }
                EnumTokenizerState::InAttributeValue(quote) => {
                    match v_bytes[self.n_pos..].iter().position(|&b| b == quote) {
                        Some(n_off) => {
                            self.n_pos += n_off + 1;
                            self.state = EnumTokenizerState::InTag;
                        }
                        None => self.n_pos = v_bytes.len(),
                    }
                }
                EnumTokenizerState::Comment => {
                    self.skip_past(b"-->");
                    self.state = EnumTokenizerState::Text;
                }
                EnumTokenizerState::RawText(raw_tag) => {
                    match find_ascii_ci(&v_bytes[self.n_pos..], raw_tag.closing_needle()) {
                        Some(n_off) => {
                            self.n_pos += n_off;
                            self.state = EnumTokenizerState::TagOpen;
                        }
                        None => self.n_pos = v_bytes.len(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(name: &str) -> EnumHtmlToken<'static> {
        EnumHtmlToken::StartTag {
            name: name.to_string(),
            if_self_closing: false,
        }
    }

    fn end(name: &str) -> EnumHtmlToken<'static> {
        EnumHtmlToken::EndTag {
            name: name.to_string(),
        }
    }

    #[test]
    fn tokenizer_skips_comments_scripts_and_quoted_gt() {
        let html = concat!(
            "<!DOCTYPE html><!-- <tr><td>hidden</td></tr> -->",
            "<TD class=\"a>b\" title='x'>v1</td>",
            "<script>if (a < b) { document.write('<td>x</td>'); }</SCRIPT>",
            "<br/>z"
        );
        let l_tokens = HtmlTokenizer::new(html).collect::<Vec<_>>();
        assert_eq!(
            l_tokens,
            vec![
                start("td"),
                EnumHtmlToken::Text("v1"),
                end("td"),
                start("script"),
                end("script"),
                EnumHtmlToken::StartTag {
                    name: "br".to_string(),
                    if_self_closing: true
                },
                EnumHtmlToken::Text("z"),
            ]
        );
    }

    #[test]
    fn tokenizer_tolerates_malformed_markup() {
        let l_tokens = HtmlTokenizer::new("a < b <td>x<td o=\"unterminated").collect::<Vec<_>>();
        assert_eq!(
            l_tokens,
            vec![
                EnumHtmlToken::Text("a "),
                EnumHtmlToken::Text("<"),
                EnumHtmlToken::Text(" b "),
                start("td"),
                EnumHtmlToken::Text("x"),
                start("td"),
            ]
        );
        assert_eq!(HtmlTokenizer::new("").count(), 0);
        assert_eq!(HtmlTokenizer::new("<!-- open comment").count(), 0);
        assert_eq!(
            HtmlTokenizer::new("x</>y").collect::<Vec<_>>(),
            vec![EnumHtmlToken::Text("x"), EnumHtmlToken::Text("y")]
        );
    }

    #[test]
    fn tokenizer_ignores_stray_quotes_outside_values() {
        let l_tokens = HtmlTokenizer::new("<td it's>ok</td>").collect::<Vec<_>>();
        assert_eq!(
            l_tokens,
            vec![start("td"), EnumHtmlToken::Text("ok"), end("td")]
        );
    }
}
