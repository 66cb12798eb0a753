use crate::error::IngestError;
use lopdf::Document;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait DocumentSource {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

impl<T: DocumentSource + ?Sized> DocumentSource for Box<T> {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        (**self).extract(path)
    }
}

#[derive(Debug, Clone)]
pub struct TextCleaner {
    // Lines with fewer characters are dropped. `None` keeps every line,
    // since a low threshold also removes real headings.
    pub min_line_chars: Option<usize>,
    page_number_line: Regex,
    trailing_space: Regex,
    blank_runs: Regex,
}

impl TextCleaner {
    pub fn new(min_line_chars: Option<usize>) -> Result<Self, IngestError> {
        Ok(Self {
            min_line_chars,
            page_number_line: Regex::new(r"(?m)^[ \t]*\d+[ \t]*$")?,
            trailing_space: Regex::new(r"[ \t]+\n")?,
            blank_runs: Regex::new(r"\n{3,}")?,
        })
    }

    pub fn clean(&self, raw: &str) -> String {
        let text = raw.replace("\r\n", "\n").replace('\u{a0}', " ");
        let text = self.page_number_line.replace_all(&text, "");
        let text = self.trailing_space.replace_all(&text, "\n");

        let text = match self.min_line_chars {
            Some(min) => text
                .lines()
                .filter(|line| line.trim().is_empty() || line.trim().chars().count() >= min)
                .collect::<Vec<_>>()
                .join("\n"),
            None => text.into_owned(),
        };

        self.blank_runs.replace_all(&text, "\n\n").trim().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct LopdfSource {
    cleaner: TextCleaner,
}

impl LopdfSource {
    pub fn new(cleaner: TextCleaner) -> Self {
        Self { cleaner }
    }
}

impl DocumentSource for LopdfSource {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let raw = match document.extract_text(&[page_no]) {
                Ok(raw) => raw,
                Err(error) => {
                    warn!(path = %path.display(), page = page_no, error = %error, "page text extraction failed");
                    continue;
                }
            };

            let text = self.cleaner.clean(&raw);
            if text.is_empty() {
                warn!(path = %path.display(), page = page_no, "no text on page");
                continue;
            }
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.is_empty() {
            return Err(IngestError::Extraction(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub fn write_clean_text(
    source: &dyn DocumentSource,
    pdf: &Path,
    output_dir: &Path,
) -> Result<PathBuf, IngestError> {
    let stem = pdf
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IngestError::MissingFileName(pdf.display().to_string()))?;

    let pages = source.extract(pdf)?;
    let text = pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    fs::create_dir_all(output_dir)?;
    let output = output_dir.join(format!("{stem}.txt"));
    fs::write(&output, text)?;
    info!(pdf = %pdf.display(), output = %output.display(), "saved cleaned text");
    Ok(output)
}
