use std::path::Path;

use url::Url;

use crate::error::InputError;

/// One unit of work: a page to harvest and the folder its files go into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub url: Url,
    pub folder_name: String,
}

/// Read and validate the whole site list. Nothing is returned unless every row is usable.
/// Truly empty lines are dropped by the reader; a row of empty cells is malformed.
pub fn load_sites(path: &Path) -> Result<Vec<Site>, InputError> {
    if !path.is_file() {
        return Err(InputError::NotFound(path.to_path_buf()));
    }
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| InputError::Read { path: path.to_path_buf(), source })?;
    parse_sites(reader).map_err(|e| match e {
        ParseFailure::Csv(source) => InputError::Read { path: path.to_path_buf(), source },
        ParseFailure::Input(e) => e,
    })
}

enum ParseFailure {
    Csv(csv::Error),
    Input(InputError),
}

impl From<InputError> for ParseFailure {
    fn from(e: InputError) -> Self {
        ParseFailure::Input(e)
    }
}

fn parse_sites<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<Site>, ParseFailure> {
    let headers = reader.headers().map_err(ParseFailure::Csv)?.clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or(InputError::MissingColumn(name))
    };
    let url_idx = column("url")?;
    let folder_idx = column("folder_name")?;

    let mut sites = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(ParseFailure::Csv)?;
        let row = i + 1;

        let url = record.get(url_idx).filter(|s| !s.is_empty());
        let folder = record.get(folder_idx).filter(|s| !s.is_empty());
        let (url, folder) = match (url, folder) {
            (None, _) => return Err(InputError::MissingField { row, field: "url" }.into()),
            (_, None) => return Err(InputError::MissingField { row, field: "folder_name" }.into()),
            (Some(u), Some(f)) => (u, f),
        };

        let parsed = Url::parse(url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| InputError::InvalidUrl { row, url: url.to_string() })?;

        sites.push(Site {
            url: parsed,
            folder_name: folder.to_string(),
        });
    }

    if sites.is_empty() {
        return Err(InputError::Empty.into());
    }
    Ok(sites)
}
