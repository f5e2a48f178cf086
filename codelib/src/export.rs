//! Export of a snippet selection to another library file or a standalone
//! HTML page. The target type is chosen by the output file's extension.

use std::borrow::Borrow;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::info;

use crate::content_detection::file_extension;
use crate::interface::{CodeLibError, CodeLibResult};
use crate::models::{Snippet, DEFAULT_CHARSET};
use crate::persistence::{self, LIBRARY_EXTENSION};

const HTML_EXTENSION: &str = "html";

const HTML_STYLE: &str = "#itemlist ul { list-style: none; margin: 0; padding: 0; font-family: Arial; font-size: 13px; } \
#itemlist li { cursor: pointer; margin: 1px 0px; background-color: #EDF2F8; border: 1px solid #EDF5FD; color: #376BAD; } \
#itemlist li div:hover { background-color: #BBCEE6; } \
.hideDiv { display: none; }";

const HTML_SCRIPT: &str = "function show(index, li) { \
document.getElementById('keywords').value = li.textContent; \
document.getElementById('text').value = document.getElementById('i' + index).textContent; }";

/// Export formats, by output extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Library,
    Html,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> CodeLibResult<Self> {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let ext = file_extension(&name).unwrap_or_default();
        match ext.as_str() {
            LIBRARY_EXTENSION => Ok(ExportFormat::Library),
            HTML_EXTENSION => Ok(ExportFormat::Html),
            other => Err(CodeLibError::Configuration(format!(
                "unsupported export type: '{other}'"
            ))),
        }
    }
}

/// Export the live (non-deleted) snippets of `snippets` to `path`.
pub fn export<S: Borrow<Snippet>>(path: impl AsRef<Path>, title: &str, snippets: &[S]) -> CodeLibResult<usize> {
    let path = path.as_ref();
    let format = ExportFormat::from_path(path)?;
    let live: Vec<&Snippet> = snippets
        .iter()
        .map(Borrow::borrow)
        .filter(|s| !s.is_deleted())
        .collect();

    match format {
        ExportFormat::Library => persistence::save(path, &live)?,
        ExportFormat::Html => fs::write(path, render_html(title, &live))?,
    }

    info!(
        "event=export module=export status=ok format={:?} snippets={} path={}",
        format,
        live.len(),
        path.display()
    );
    Ok(live.len())
}

/// A self-contained page: keyword list on the left, content viewer on the
/// right, every content block embedded hidden.
pub fn render_html(title: &str, snippets: &[&Snippet]) -> String {
    let title = escape_html(title);
    let mut html = String::with_capacity(4096 + snippets.iter().map(|s| s.size()).sum::<usize>());

    let _ = write!(
        html,
        "<!DOCTYPE html><html><head><meta charset='{DEFAULT_CHARSET}'/><title>{title}</title>\
         <style type='text/css'>{HTML_STYLE}</style>\
         <script type='text/javascript'>{HTML_SCRIPT}</script></head><body>\
         <h1 style='text-align: center'>{title}</h1>\
         <div id='itemlist' style='float: left; width: 30%; overflow-y: auto;'><ul>"
    );
    for (i, snippet) in snippets.iter().enumerate() {
        let _ = write!(
            html,
            "<li onclick='show({}, this)'><div>{}</div></li>",
            i + 1,
            escape_html(snippet.keywords())
        );
    }
    html.push_str(
        "</ul></div><div style='float: right; width: 65%;'>\
         <input id='keywords' readonly='readonly' style='width: 100%'/>\
         <textarea id='text' readonly='readonly' style='width: 100%; height: 80vh;'></textarea></div>",
    );
    for (i, snippet) in snippets.iter().enumerate() {
        let _ = write!(
            html,
            "<div id='i{}' class='hideDiv'>{}</div>",
            i + 1,
            escape_html(&String::from_utf8_lossy(snippet.content()))
        );
    }
    html.push_str("</body></html>");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Snippet> {
        let mut gone = Snippet::with_text("old", "removed");
        gone.delete();
        vec![
            Snippet::with_text("html, escape", "if (a < b && c > d) {}"),
            gone,
            Snippet::with_text("rust", "fn main() {}"),
        ]
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a/b.zcl2")).unwrap(), ExportFormat::Library);
        assert_eq!(ExportFormat::from_path(Path::new("out.HTML")).unwrap(), ExportFormat::Html);
        assert!(matches!(
            ExportFormat::from_path(Path::new("out.pdf")),
            Err(CodeLibError::Configuration(_))
        ));
        assert!(ExportFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_html_escapes_and_skips_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.html");
        assert_eq!(export(&path, "My <Lib>", &sample()).unwrap(), 2);

        let html = fs::read_to_string(&path).unwrap();
        assert!(html.contains("<title>My &lt;Lib&gt;</title>"));
        assert!(html.contains("if (a &lt; b &amp;&amp; c &gt; d) {}"));
        assert!(html.contains("<div id='i2' class='hideDiv'>fn main() {}</div>"));
        assert!(!html.contains("removed"));
    }

    #[test]
    fn test_library_export_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.zcl2");
        export(&path, "ignored", &sample()).unwrap();

        let loaded = persistence::load(&path).unwrap();
        let keywords: Vec<&str> = loaded.snippets.iter().map(|s| s.keywords()).collect();
        assert_eq!(keywords, vec!["html, escape", "rust"]);
    }
}
