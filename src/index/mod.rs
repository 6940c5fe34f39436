//! Rendering of the static "simple" index pages that installers read.

use eyre::Result;
use handlebars::Handlebars;
use indoc::indoc;
use serde::Serialize;

pub const INDEX_HTML: &str = "index.html";
pub const ROOT_INDEX_TITLE: &str = "Private Index";

const INDEX_TEMPLATE: &str = indoc! {r#"
    <!DOCTYPE html>
    <html>
    <head>
        <meta charset="UTF-8">
        <title>{{title}}</title>
    </head>
    <body>{{#if heading}}
        <h1>{{title}}</h1>{{/if}}{{#each items}}
        <a href="{{href}}">{{name}}</a><br>{{/each}}
    </body>
    </html>
"#};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Lists every package in the index.
    Root,
    /// Lists every file of one package, under a heading.
    Package,
}

/// One link on an index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexItem {
    pub name: String,
    pub sha256: Option<String>,
}

impl IndexItem {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            sha256: None,
        }
    }

    pub fn with_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    pub fn href(&self) -> String {
        match &self.sha256 {
            Some(digest) => format!("{}#sha256={digest}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Serialize)]
struct LinkView {
    href: String,
    name: String,
}

#[derive(Serialize)]
struct PageView<'a> {
    title: &'a str,
    heading: bool,
    items: Vec<LinkView>,
}

pub fn package_index_title(name: &str) -> String {
    format!("Links for {name}")
}

/// Render an index page listing `items` in the order given.
pub fn build_index(title: &str, items: &[IndexItem], kind: IndexKind) -> Result<String> {
    let mut handlebars = Handlebars::new();
    // The stock escaper also encodes `=`, which would mangle hash fragments.
    handlebars.register_escape_fn(escape_html);
    handlebars.register_template_string("index", INDEX_TEMPLATE)?;

    let view = PageView {
        title,
        heading: kind == IndexKind::Package,
        items: items
            .iter()
            .map(|item| LinkView {
                href: item.href(),
                name: item.name.clone(),
            })
            .collect(),
    };

    Ok(handlebars.render("index", &view)?)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
