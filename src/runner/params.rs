//! Parameter extraction from free-text task descriptions.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>`]+"#).expect("valid url regex"));

static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("valid quote regex"));

static FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s`'\(])(/?[A-Za-z0-9_./-]+\.[A-Za-z0-9]+)").expect("valid file regex")
});

/// Lower-cased alphanumeric words of the task, in order.
pub fn words(task: &str) -> Vec<String> {
    task.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn has_word(task: &str, candidates: &[&str]) -> bool {
    let words = words(task);
    words.iter().any(|w| candidates.contains(&w.as_str()))
}

pub fn contains_any(lower: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| lower.contains(n))
}

/// First http(s) URL in the task, with trailing sentence punctuation removed.
pub fn first_url(task: &str) -> Option<String> {
    URL_RE.find(task).map(|m| {
        m.as_str()
            .trim_end_matches(['.', ',', ';', ':', ')', '!', '?'])
            .to_string()
    })
}

pub fn quoted(task: &str) -> Vec<String> {
    QUOTED_RE
        .captures_iter(task)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// File references in the task whose extension is one of `extensions`,
/// returned relative to the working directory. `/data/x.csv`, `data/x.csv`
/// and `x.csv` all become `x.csv`; `public_prefix` is stripped as well.
pub fn file_refs(task: &str, extensions: &[&str], public_prefix: &str) -> Vec<String> {
    let urls: Vec<&str> = URL_RE.find_iter(task).map(|m| m.as_str()).collect();
    FILE_RE
        .captures_iter(task)
        .filter_map(|c| c.get(1))
        .filter(|m| !urls.iter().any(|u| u.contains(m.as_str())))
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']))
        .filter(|path| {
            let lower = path.to_lowercase();
            extensions
                .iter()
                .any(|ext| lower.ends_with(&format!(".{ext}")))
        })
        .map(|path| to_workspace_relative(path, public_prefix))
        .filter(|path| !path.is_empty())
        .collect()
}

pub fn first_file_ref(task: &str, extensions: &[&str], public_prefix: &str) -> Option<String> {
    file_refs(task, extensions, public_prefix).into_iter().next()
}

pub fn to_workspace_relative(path: &str, public_prefix: &str) -> String {
    let stripped = path
        .strip_prefix(public_prefix)
        .or_else(|| path.strip_prefix("/data/"))
        .or_else(|| path.strip_prefix("data/"))
        .or_else(|| path.strip_prefix("./"))
        .unwrap_or(path);
    stripped.trim_start_matches('/').to_string()
}
