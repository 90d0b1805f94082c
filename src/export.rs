//! Marketplace CSV export.
//!
//! Each stock site expects its own column layout. The header row is written
//! bare; every data field is double-quoted with embedded quotes doubled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{GenerationError, Result};
use crate::types::{GeneratedFields, GenerationMode, ResultRecord};

const SHUTTERSTOCK_MAX_KEYWORDS: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockSite {
    #[default]
    General,
    #[serde(rename = "adobe-stock")]
    AdobeStock,
    #[serde(rename = "shutterstock")]
    Shutterstock,
    #[serde(rename = "freepik")]
    Freepik,
    #[serde(rename = "getty")]
    Getty,
    #[serde(rename = "istock")]
    IStock,
    #[serde(rename = "dreamstime")]
    Dreamstime,
    #[serde(rename = "vecteezy")]
    Vecteezy,
}

impl StockSite {
    pub const ALL: [StockSite; 8] = [
        StockSite::General,
        StockSite::AdobeStock,
        StockSite::Shutterstock,
        StockSite::Freepik,
        StockSite::Getty,
        StockSite::IStock,
        StockSite::Dreamstime,
        StockSite::Vecteezy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StockSite::General => "General",
            StockSite::AdobeStock => "adobe-stock",
            StockSite::Shutterstock => "shutterstock",
            StockSite::Freepik => "freepik",
            StockSite::Getty => "getty",
            StockSite::IStock => "istock",
            StockSite::Dreamstime => "dreamstime",
            StockSite::Vecteezy => "vecteezy",
        }
    }

    fn headers(&self) -> &'static [&'static str] {
        match self {
            StockSite::AdobeStock => &["Filename", "Title", "Keywords", "Category"],
            StockSite::Shutterstock => &["Filename", "Description", "Keywords", "Categorie"],
            StockSite::Freepik => &["File name", "Title", "Keywords", "Prompt", "Category"],
            StockSite::Getty => &["Filename", "Title", "Description", "Keywords", "Category"],
            StockSite::IStock => &["filename", "title", "keywords", "category", "release"],
            StockSite::Dreamstime => &[
                "filename",
                "title",
                "keywords",
                "category",
                "exclusive",
                "editorial",
                "model_releases",
                "property_releases",
                "image_id",
                "mr_ids",
            ],
            StockSite::Vecteezy => &["Filename", "Title", "Description", "Keywords"],
            StockSite::General => &["Filename", "Title", "Description", "Keywords", "Category"],
        }
    }

    fn row(&self, filename: String, fields: &GeneratedFields) -> Vec<String> {
        let title = fields.title().unwrap_or_default().to_string();
        let description = fields.description().to_string();
        let category = fields.category().unwrap_or_default().to_string();
        let keywords = fields.keywords().join(", ");

        match self {
            StockSite::AdobeStock => vec![filename, title, keywords, category],
            StockSite::Shutterstock => {
                let capped = fields
                    .keywords()
                    .iter()
                    .take(SHUTTERSTOCK_MAX_KEYWORDS)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                vec![filename, title, capped, category]
            }
            StockSite::Freepik => vec![filename, title, keywords, String::new(), category],
            StockSite::Getty | StockSite::General => {
                vec![filename, title, description, keywords, category]
            }
            StockSite::IStock => vec![filename, title, keywords, category, String::new()],
            StockSite::Dreamstime => {
                let mut row = vec![filename, title, keywords, category];
                row.resize(10, String::new());
                row
            }
            StockSite::Vecteezy => vec![filename, title, description, keywords],
        }
    }
}

impl fmt::Display for StockSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockSite {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self> {
        StockSite::ALL
            .into_iter()
            .find(|site| site.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GenerationError::InvalidConfig(format!("unknown stock site: {}", s)))
    }
}

fn escape(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Swap the extension of `filename` for `extension`. `"default"` or an
/// empty string leaves the name untouched.
pub fn with_extension(filename: &str, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() || extension == "default" {
        return filename.to_string();
    }
    match filename.rfind('.') {
        Some(dot) => format!("{}.{}", &filename[..dot], extension),
        None => format!("{}.{}", filename, extension),
    }
}

/// Export mode: that of the first record, metadata when there is none.
pub fn export_mode(records: &[ResultRecord]) -> GenerationMode {
    records.first().map(|r| r.mode()).unwrap_or_default()
}

/// `{site}_metadata.csv` or `{site}_prompts.csv`.
pub fn default_filename(site: StockSite, mode: GenerationMode) -> String {
    match mode {
        GenerationMode::Metadata => format!("{}_metadata.csv", site.as_str()),
        GenerationMode::Prompt => format!("{}_prompts.csv", site.as_str()),
    }
}

/// Render `records` as CSV for `site`.
///
/// Only records in the export mode are included. Fails with
/// [`GenerationError::NothingToProcess`] when no row would be written.
pub fn render_csv(records: &[ResultRecord], site: StockSite, extension: &str) -> Result<String> {
    let mode = export_mode(records);
    let selected = records.iter().filter(|r| r.mode() == mode);

    let (headers, rows): (Vec<&str>, Vec<Vec<String>>) = match mode {
        GenerationMode::Prompt => (
            vec!["serial number", "Description"],
            selected
                .enumerate()
                .map(|(i, r)| vec![(i + 1).to_string(), r.fields.description().to_string()])
                .collect(),
        ),
        GenerationMode::Metadata => (
            site.headers().to_vec(),
            selected
                .map(|r| site.row(with_extension(&r.filename, extension), &r.fields))
                .collect(),
        ),
    };

    if rows.is_empty() {
        return Err(GenerationError::NothingToProcess(
            "No metadata available to export.".to_string(),
        ));
    }

    let mut csv = headers.join(",");
    for row in rows {
        csv.push('\n');
        csv.push_str(
            &row.iter()
                .map(|field| escape(field))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    Ok(csv)
}

/// Render and write the CSV. When `out` is a directory (or `None`, meaning
/// the working directory) the default file name is used inside it.
pub fn write_csv(
    records: &[ResultRecord],
    site: StockSite,
    extension: &str,
    out: Option<&Path>,
) -> Result<PathBuf> {
    let csv = render_csv(records, site, extension)?;
    let filename = default_filename(site, export_mode(records));
    let path = match out {
        Some(p) if p.is_dir() => p.join(filename),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(filename),
    };
    std::fs::write(&path, csv)?;
    tracing::info!(path = %path.display(), site = %site, records = records.len(), "CSV exported");
    Ok(path)
}
