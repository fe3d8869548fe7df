/// Markup and script injection checks applied before a message is moderated
const SCRIPT_SCHEMES: &[&str] = &["javascript:", "vbscript:"];

const EVENT_HANDLERS: &[&str] = &[
    "onabort", "onblur", "onchange", "onclick", "ondblclick", "onerror", "onfocus", "oninput",
    "onkeydown", "onkeypress", "onkeyup", "onload", "onmousedown", "onmouseout", "onmouseover",
    "onmouseup", "onpointerdown", "onreset", "onresize", "onscroll", "onselect", "onsubmit",
    "onunload",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// `<tag ...>`, `</tag>` or `<!...>`
    Tag,
    ScriptScheme,
    /// `onload=` and friends
    EventHandler,
}

impl Markup {
    pub fn describe(&self) -> &'static str {
        match self {
            Markup::Tag => "an HTML tag",
            Markup::ScriptScheme => "a script URL",
            Markup::EventHandler => "an event handler attribute",
        }
    }
}

/// First kind of markup found in `text`, case-insensitive
pub fn find_markup(text: &str) -> Option<Markup> {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    if has_tag(bytes) {
        return Some(Markup::Tag);
    }
    if SCRIPT_SCHEMES.iter().any(|scheme| lower.contains(scheme)) {
        return Some(Markup::ScriptScheme);
    }
    if has_event_handler(bytes) {
        return Some(Markup::EventHandler);
    }
    None
}

fn has_tag(bytes: &[u8]) -> bool {
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'<'
            && bytes
                .get(i + 1)
                .is_some_and(|next| next.is_ascii_alphabetic() || *next == b'/' || *next == b'!')
            && bytes[i + 1..].contains(&b'>')
    })
}

fn has_event_handler(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_alphanumeric() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
            i += 1;
        }
        let word = &bytes[start..i];
        if EVENT_HANDLERS.iter().any(|h| h.as_bytes() == word) {
            let mut j = i;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if bytes.get(j) == Some(&b'=') {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(find_markup("<script>alert(1)</script>"), Some(Markup::Tag));
        assert_eq!(find_markup("look <IMG src=x>"), Some(Markup::Tag));
        assert_eq!(find_markup("close </div> it"), Some(Markup::Tag));
        assert_eq!(find_markup("<!-- hidden -->"), Some(Markup::Tag));
    }

    #[test]
    fn test_script_schemes_and_handlers() {
        assert_eq!(find_markup("click JavaScript:alert(1)"), Some(Markup::ScriptScheme));
        assert_eq!(find_markup("vbscript:msgbox"), Some(Markup::ScriptScheme));
        assert_eq!(find_markup("x onerror = steal()"), Some(Markup::EventHandler));
        assert_eq!(find_markup("OnLoad=go"), Some(Markup::EventHandler));
    }

    #[test]
    fn test_plain_chat_passes() {
        assert_eq!(find_markup("i <3 this"), None);
        assert_eq!(find_markup("2 < 3 and 5 > 4"), None);
        assert_eq!(find_markup("one = two"), None);
        assert_eq!(find_markup("the onload event fires late"), None);
        assert_eq!(find_markup("I wrote a script for javascript class"), None);
        assert_eq!(find_markup("buttononclick=1"), None);
    }
}
