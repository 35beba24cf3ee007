use std::collections::HashMap;
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;
use tera::{Filter, Value};

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

pub const SYNTAX_THEME: &str = "base16-ocean.dark";

/// Render a Markdown string to HTML, highlighting fenced code blocks.
pub fn render_markdown(source: &str) -> String {
    let mut events = Parser::new_ext(source, Options::all());
    let mut processed = Vec::new();

    while let Some(event) = events.next() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                let mut code = String::new();
                for inner in events.by_ref() {
                    match inner {
                        Event::End(TagEnd::CodeBlock) => break,
                        Event::Text(text) => code.push_str(&text),
                        _ => {}
                    }
                }
                processed.push(Event::Html(highlight(&code, &lang).into()));
            }
            other => processed.push(other),
        }
    }

    let mut out = String::new();
    html::push_html(&mut out, processed.into_iter());
    out
}

fn highlight(code: &str, lang: &str) -> String {
    let plain = || format!("<pre><code>{}</code></pre>", html_escape::encode_text(code));

    let Some(syntax) = SYNTAX_SET.find_syntax_by_token(lang) else {
        return plain();
    };
    let Some(theme) = THEME_SET.themes.get(SYNTAX_THEME) else {
        return plain();
    };

    highlighted_html_for_string(code, &SYNTAX_SET, syntax, theme).unwrap_or_else(|_| plain())
}

/// Tera filter: `{{ about.bio | markdown }}`.
///
/// Strings are rendered, arrays of strings are rendered as consecutive
/// paragraphs. Output is marked safe so it is not escaped again.
pub struct MarkdownFilter;

impl Filter for MarkdownFilter {
    fn filter(&self, value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
        match value {
            Value::String(s) => Ok(Value::String(render_markdown(s))),
            Value::Array(items) => {
                let mut out = String::new();
                for item in items {
                    let Value::String(s) = item else {
                        return Err(tera::Error::msg(
                            "markdown filter expects a string or an array of strings",
                        ));
                    };
                    out.push_str(&render_markdown(s));
                }
                Ok(Value::String(out))
            }
            Value::Null => Ok(Value::String(String::new())),
            _ => Err(tera::Error::msg(
                "markdown filter expects a string or an array of strings",
            )),
        }
    }

    fn is_safe(&self) -> bool {
        true
    }
}
