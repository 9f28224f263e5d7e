//! Template Engine: compiles a string containing `$[[name]]` placeholders
//! into a sequence of segments once, then renders it many times against a
//! resolver callback.
//!
//! Grounded on the teacher's `scenario.rs` substitution helpers, generalized
//! from `${var}`/`$var` to the `$[[name]]` delimiter this tool uses.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A compiled template: ready to render repeatedly without re-parsing.
#[derive(Debug, Clone, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Compile `source`, splitting on `$[[` / `]]` delimiters. An unterminated
    /// `$[[` is treated as a literal (left verbatim), matching the "unknown
    /// placeholders are left untouched" edge case in spec.md §4.2.
    pub fn compile(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let bytes = source.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if source[i..].starts_with("$[[") {
                if let Some(end_rel) = source[i + 3..].find("]]") {
                    let name = &source[i + 3..i + 3 + end_rel];
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                    i += 3 + end_rel + 2;
                    continue;
                }
            }
            let ch = source[i..].chars().next().unwrap();
            literal.push(ch);
            i += ch.len_utf8();
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }

    /// True if this template contains no placeholders — callers can skip
    /// per-render resolution entirely.
    pub fn is_static(&self) -> bool {
        !self
            .segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(_)))
    }

    /// Render into `sink`, calling `resolve(name)` for each placeholder.
    /// Unresolved names (`resolve` returns `None`) render as the literal
    /// `not_found`, per spec.md §6.5.
    pub fn render_into(&self, sink: &mut String, mut resolve: impl FnMut(&str) -> Option<String>) {
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => sink.push_str(s),
                Segment::Placeholder(name) => match resolve(name) {
                    Some(value) => sink.push_str(&value),
                    None => sink.push_str("not_found"),
                },
            }
        }
    }

    pub fn render(&self, resolve: impl FnMut(&str) -> Option<String>) -> String {
        let mut sink = String::new();
        self.render_into(&mut sink, resolve);
        sink
    }
}
