//! Classification job output archives
//!
//! A finished job leaves a gzip-compressed tar in the output bucket. Each regular member
//! ending in `.out` describes one document:
//!
//! ```json
//! {"File": "doc1.pdf", "Classes": [{"Name": "invoice", "Score": 0.95}]}
//! ```
//!
//! Some engines write one such record per line instead of a single object; both are read.

use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::error::{Error, Result};
use crate::types::ClassificationResult;

/// Per-document record inside an output archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    #[serde(rename = "File")]
    pub file: String,
    #[serde(rename = "Classes", default)]
    pub classes: Vec<ClassScore>,
}

/// One candidate label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Score")]
    pub score: f64,
}

impl ResultFile {
    /// Flatten into results, keeping candidate order
    pub fn into_results(self) -> Vec<ClassificationResult> {
        let file = self.file;
        self.classes
            .into_iter()
            .map(|c| ClassificationResult::new(file.clone(), c.name, c.score))
            .collect()
    }
}

fn parse_member(content: &str) -> std::result::Result<Vec<ResultFile>, serde_json::Error> {
    match serde_json::from_str::<ResultFile>(content) {
        Ok(record) => Ok(vec![record]),
        Err(whole_err) => {
            let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            if lines.len() < 2 {
                return Err(whole_err);
            }
            lines
                .into_iter()
                .map(serde_json::from_str::<ResultFile>)
                .collect()
        }
    }
}

/// Read every per-document result out of an output archive.
///
/// Returns all candidates, qualifying or not; filtering is the caller's job. A member that
/// cannot be decoded is logged and skipped so one bad document does not sink its siblings.
/// A corrupt archive is an error.
pub fn extract_results(archive_bytes: &[u8], result_suffix: &str) -> Result<Vec<ClassificationResult>> {
    let gz = flate2::read::GzDecoder::new(archive_bytes);
    let mut archive = tar::Archive::new(gz);

    let entries = archive
        .entries()
        .map_err(|e| Error::archive(format!("Failed to read archive: {}", e)))?;

    let mut results = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::archive(format!("Corrupt archive entry: {}", e)))?;

        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map(|p| p.to_string_lossy().to_string())
            .map_err(|e| Error::archive(format!("Invalid member path: {}", e)))?;
        if !name.ends_with(result_suffix) {
            continue;
        }

        let mut content = String::new();
        if let Err(e) = entry.read_to_string(&mut content) {
            tracing::error!("[{}] Unreadable result member skipped: {}", name, e);
            continue;
        }

        match parse_member(&content) {
            Ok(records) => {
                for record in records {
                    results.extend(record.into_results());
                }
            }
            Err(e) => {
                tracing::error!("[{}] Malformed result member skipped: {}", name, e);
            }
        }
    }

    Ok(results)
}

/// Build an output archive in memory
pub fn build_archive(members: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut tar_bytes = Vec::new();
    {
        let gz = flate2::write::GzEncoder::new(&mut tar_bytes, flate2::Compression::default());
        let mut tar = tar::Builder::new(gz);

        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, name, *data)?;
        }

        tar.into_inner()?.finish()?;
    }
    Ok(tar_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(file: &str, classes: &[(&str, f64)]) -> Vec<u8> {
        serde_json::to_vec(&ResultFile {
            file: file.to_string(),
            classes: classes
                .iter()
                .map(|(n, s)| ClassScore {
                    name: n.to_string(),
                    score: *s,
                })
                .collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_extracts_out_members_only() {
        let doc1 = record("doc1.pdf", &[("invoice", 0.95), ("receipt", 0.03)]);
        let doc2 = record("doc2.pdf", &[("contract", 0.81)]);
        let bytes = build_archive(&[
            ("output/doc1.pdf.out", doc1.as_slice()),
            ("output/doc2.pdf.out", doc2.as_slice()),
            ("output/manifest.json", b"{}".as_slice()),
        ])
        .unwrap();

        let results = extract_results(&bytes, ".out").unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ClassificationResult::new("doc1.pdf", "invoice", 0.95));
        assert_eq!(results[1].classification, "receipt");
        assert_eq!(results[2].file_name, "doc2.pdf");
    }

    #[test]
    fn test_json_lines_member() {
        let mut lines = record("a.pdf", &[("invoice", 0.9)]);
        lines.push(b'\n');
        lines.extend(record("b.pdf", &[("memo", 0.7)]));
        let bytes = build_archive(&[("predictions.out", lines.as_slice())]).unwrap();

        let results = extract_results(&bytes, ".out").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].file_name, "b.pdf");
    }

    #[test]
    fn test_bad_member_does_not_sink_siblings() {
        let good = record("good.pdf", &[("invoice", 0.99)]);
        let bytes = build_archive(&[
            ("bad.pdf.out", b"not json".as_slice()),
            ("good.pdf.out", good.as_slice()),
        ])
        .unwrap();

        let results = extract_results(&bytes, ".out").unwrap();
        assert_eq!(results, vec![ClassificationResult::new("good.pdf", "invoice", 0.99)]);
    }

    #[test]
    fn test_corrupt_archive_is_error() {
        let err = extract_results(b"definitely not gzip", ".out").unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }
}
