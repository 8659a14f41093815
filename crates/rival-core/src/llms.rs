//! llms.txt rendering from a traversal report.
//!
//! Pages are grouped into categories by their title (blog and news pages by
//! URL), sorted by title within each section, and rendered in the
//! [llmstxt.org](https://llmstxt.org) layout: an H1 name, a blockquote
//! summary, then one H2 section per category with `- [title](url): notes`
//! entries. Uncategorised pages go in the trailing `Optional` section.

use serde::Serialize;

use crate::models::{TraversalReport, TraversedPage};

/// Characters of page text quoted after each link.
const DESCRIPTION_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Category {
    ApiReference,
    Guides,
    Examples,
    Setup,
    Help,
    Blog,
    Optional,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::ApiReference,
        Category::Guides,
        Category::Examples,
        Category::Setup,
        Category::Help,
        Category::Blog,
        Category::Optional,
    ];

    pub fn heading(self) -> &'static str {
        match self {
            Category::ApiReference => "API Reference",
            Category::Guides => "Guides & Tutorials",
            Category::Examples => "Examples & Demos",
            Category::Setup => "Installation & Setup",
            Category::Help => "Help & Support",
            Category::Blog => "Blog & News",
            Category::Optional => "Optional",
        }
    }
}

const TITLE_RULES: &[(Category, &[&str])] = &[
    (Category::ApiReference, &["api", "reference", "docs", "documentation"]),
    (Category::Guides, &["guide", "tutorial", "how to", "getting started"]),
    (Category::Examples, &["example", "examples", "sample", "samples", "demo"]),
    (Category::Setup, &["install", "installation", "setup", "configuration"]),
    (Category::Help, &["faq", "help", "support", "troubleshooting"]),
];

const BLOG_URL_MARKERS: &[&str] = &["blog", "news", "announcement"];

/// Whole-word match on the title; blog markers anywhere in the URL.
pub fn categorize(title: &str, url: &str) -> Category {
    let words: Vec<String> = title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let padded = format!(" {} ", words.join(" "));

    TITLE_RULES
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|p| padded.contains(&format!(" {p} "))))
        .map(|(category, _)| *category)
        .unwrap_or_else(|| {
            let url = url.to_ascii_lowercase();
            if BLOG_URL_MARKERS.iter().any(|m| url.contains(m)) {
                Category::Blog
            } else {
                Category::Optional
            }
        })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmsEntry {
    pub title: String,
    pub url: String,
    pub description: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmsSection {
    pub category: Category,
    pub entries: Vec<LlmsEntry>,
}

/// A categorised site summary, renderable as `llms.txt`, `llms-full.txt`
/// or the XML-ish `llms-ctx.txt` context file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmsDocument {
    pub name: String,
    pub summary: String,
    pub sections: Vec<LlmsSection>,
}

impl LlmsDocument {
    /// Pages with no text are left out.
    pub fn from_report(report: &TraversalReport, name: &str, summary: &str) -> Self {
        let mut entries: Vec<(Category, LlmsEntry)> = report
            .pages
            .iter()
            .filter(|page| !page.content.text.trim().is_empty())
            .map(|page| {
                let entry = entry_for(page);
                (categorize(&entry.title, &entry.url), entry)
            })
            .collect();
        entries.sort_by(|a, b| (a.0, &a.1.title, &a.1.url).cmp(&(b.0, &b.1.title, &b.1.url)));

        let sections = Category::ALL
            .iter()
            .filter_map(|category| {
                let members: Vec<LlmsEntry> = entries
                    .iter()
                    .filter(|(c, _)| c == category)
                    .map(|(_, e)| e.clone())
                    .collect();
                (!members.is_empty()).then_some(LlmsSection {
                    category: *category,
                    entries: members,
                })
            })
            .collect();

        tracing::debug!(root = %report.root_url, pages = entries.len(), "Built llms document");
        Self {
            name: name.to_string(),
            summary: summary.to_string(),
            sections,
        }
    }

    pub fn page_count(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    /// The `llms.txt` index: links and short descriptions only.
    pub fn render_index(&self) -> String {
        let mut out = self.header();
        for section in &self.sections {
            out.push_str(&format!("## {}\n\n", section.category.heading()));
            for entry in &section.entries {
                out.push_str(&link_line(entry));
                out.push('\n');
            }
            out.push('\n');
        }
        finish(out)
    }

    /// `llms-full.txt`: every entry followed by its full Markdown.
    pub fn render_full(&self) -> String {
        let mut out = self.header();
        for section in &self.sections {
            out.push_str(&format!("## {}\n\n", section.category.heading()));
            for entry in &section.entries {
                out.push_str(&link_line(entry));
                out.push_str("\n\n");
                out.push_str(entry.content.trim());
                out.push_str("\n\n---\n\n");
            }
        }
        finish(out)
    }

    /// `llms-ctx.txt`, or `llms-ctx-full.txt` with the Optional section.
    pub fn render_ctx(&self, include_optional: bool) -> String {
        let mut out = format!(
            "<project title=\"{}\" summary=\"{}\">\n",
            escape_attr(&self.name),
            escape_attr(&self.summary)
        );
        for section in &self.sections {
            if section.category == Category::Optional && !include_optional {
                continue;
            }
            out.push_str(&format!("<section name=\"{}\">\n", escape_attr(section.category.heading())));
            for entry in &section.entries {
                out.push_str(&format!(
                    "<page title=\"{}\" url=\"{}\">\n<content>{}</content>\n</page>\n",
                    escape_attr(&entry.title),
                    escape_attr(&entry.url),
                    entry.content.trim()
                ));
            }
            out.push_str("</section>\n");
        }
        out.push_str("</project>\n");
        out
    }

    fn header(&self) -> String {
        let mut out = format!("# {}\n\n", self.name.trim());
        if !self.summary.trim().is_empty() {
            out.push_str(&format!("> {}\n\n", self.summary.trim()));
        }
        out
    }
}

fn entry_for(page: &TraversedPage) -> LlmsEntry {
    let text = page.content.text.trim();
    let description = match text.char_indices().nth(DESCRIPTION_CHARS) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    };
    let content = if page.content.markdown.trim().is_empty() {
        text.to_string()
    } else {
        page.content.markdown.clone()
    };
    LlmsEntry {
        title: page
            .content
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        url: page.url.clone(),
        description,
        content,
    }
}

fn link_line(entry: &LlmsEntry) -> String {
    let title = entry.title.replace('[', "\\[").replace(']', "\\]");
    if entry.description.is_empty() {
        format!("- [{title}]({})", entry.url)
    } else {
        format!("- [{title}]({}): {}", entry.url, entry.description)
    }
}

fn escape_attr(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

fn finish(out: String) -> String {
    format!("{}\n", out.trim_end())
}
