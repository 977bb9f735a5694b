use crate::config::RouterConfig;
use crate::error::{IngestError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Spreadsheet,
    Pdf,
}

/// One uploaded statement as received from the caller.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            declared_mime: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime = Some(mime.into());
        self
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IngestError::UnsupportedFormat {
                filename: path.display().to_string(),
                detail: "invalid file name".to_string(),
            })?
            .to_string();
        let bytes = std::fs::read(path)?;
        Ok(Self::new(filename, bytes))
    }
}

pub struct FormatRouter {
    limits: RouterConfig,
}

impl FormatRouter {
    pub fn new(limits: RouterConfig) -> Self {
        Self { limits }
    }

    /// Decides which extractor handles the file; never inspects content beyond its size.
    pub fn route(&self, file: &UploadedFile) -> Result<FileFormat> {
        let size = file.bytes.len();
        if size < self.limits.min_file_bytes || size > self.limits.max_file_bytes {
            return Err(IngestError::SizeOutOfBounds {
                filename: file.filename.clone(),
                size,
                min: self.limits.min_file_bytes,
                max: self.limits.max_file_bytes,
            });
        }

        let by_extension = format_for_extension(&file.filename).or_else(|| {
            mime_guess::from_path(&file.filename)
                .first()
                .and_then(|mime| format_for_mime(mime.essence_str()))
        });

        if let Some(format) = by_extension {
            debug!("Routing '{}' to {:?} by extension", file.filename, format);
            return Ok(format);
        }

        if let Some(declared) = &file.declared_mime {
            if let Some(format) = format_for_mime(declared) {
                debug!(
                    "Routing '{}' to {:?} by declared MIME type {}",
                    file.filename, format, declared
                );
                return Ok(format);
            }
        }

        Err(IngestError::UnsupportedFormat {
            filename: file.filename.clone(),
            detail: match &file.declared_mime {
                Some(mime) => format!("unrecognised extension and MIME type '{}'", mime),
                None => "unrecognised extension and no MIME type declared".to_string(),
            },
        })
    }
}

impl Default for FormatRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

fn format_for_extension(filename: &str) -> Option<FileFormat> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();
    match extension.as_str() {
        "csv" | "tsv" | "txt" => Some(FileFormat::Csv),
        "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(FileFormat::Spreadsheet),
        "pdf" => Some(FileFormat::Pdf),
        _ => None,
    }
}

fn format_for_mime(mime: &str) -> Option<FileFormat> {
    let essence = mime.split(';').next().unwrap_or(mime).trim().to_lowercase();
    match essence.as_str() {
        "text/csv" | "application/csv" | "text/tab-separated-values" | "text/plain" => {
            Some(FileFormat::Csv)
        }
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.ms-excel.sheet.macroenabled.12"
        | "application/vnd.ms-excel.sheet.binary.macroenabled.12"
        | "application/vnd.oasis.opendocument.spreadsheet" => Some(FileFormat::Spreadsheet),
        "application/pdf" | "application/x-pdf" => Some(FileFormat::Pdf),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: usize) -> UploadedFile {
        UploadedFile::new(name, vec![b'a'; size])
    }

    #[test]
    fn test_routes_by_extension() {
        let router = FormatRouter::default();
        assert_eq!(router.route(&file("holdings.CSV", 64)).unwrap(), FileFormat::Csv);
        assert_eq!(router.route(&file("cams.xlsx", 64)).unwrap(), FileFormat::Spreadsheet);
        assert_eq!(router.route(&file("old.xls", 64)).unwrap(), FileFormat::Spreadsheet);
        assert_eq!(router.route(&file("statement.pdf", 64)).unwrap(), FileFormat::Pdf);
    }

    #[test]
    fn test_falls_back_to_declared_mime() {
        let router = FormatRouter::default();
        let upload = file("download", 64).with_mime("application/pdf");
        assert_eq!(router.route(&upload).unwrap(), FileFormat::Pdf);

        let upload = file("export.dat", 64).with_mime("text/csv; charset=utf-8");
        assert_eq!(router.route(&upload).unwrap(), FileFormat::Csv);
    }

    #[test]
    fn test_rejects_unknown_format() {
        let router = FormatRouter::default();
        let err = router.route(&file("photo.heic", 64)).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat { .. }));

        let err = router
            .route(&file("blob", 64).with_mime("application/octet-stream"))
            .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_rejects_sizes_out_of_bounds() {
        let router = FormatRouter::new(RouterConfig {
            min_file_bytes: 10,
            max_file_bytes: 100,
        });
        assert!(matches!(
            router.route(&file("empty.csv", 3)),
            Err(IngestError::SizeOutOfBounds { size: 3, .. })
        ));
        assert!(matches!(
            router.route(&file("huge.csv", 101)),
            Err(IngestError::SizeOutOfBounds { size: 101, .. })
        ));
        assert!(router.route(&file("ok.csv", 100)).is_ok());
    }
}
