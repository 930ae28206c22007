//! On-disk artifacts of a project corpus and the helpers that read and write
//! them. Every write lands in a temp file beside its destination and is renamed
//! into place, so readers see either the old or the new file, never a partial one.

use crate::error::IngestError;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const MERGED_CHUNKS_FILE: &str = "merged_chunks.json";
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
pub const EMBEDDED_CHUNKS_FILE: &str = "embedded_chunks.json";
pub const INDEX_FILE: &str = "faiss_index.index";
pub const FILE_INDEX_FILE: &str = "file_index.json";
pub const CHUNKS_DIR: &str = "chunks";
pub const DEFAULT_PDF_DIR: &str = "pdfs";
pub const GLOBAL_PROJECT: &str = "global";

/// Resolves artifact paths for projects below a shared root directory.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub pdf_dir_name: String,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pdf_dir_name: DEFAULT_PDF_DIR.to_string(),
        }
    }

    pub fn with_pdf_dir(mut self, name: impl Into<String>) -> Self {
        self.pdf_dir_name = name.into();
        self
    }

    pub fn project(&self, name: &str) -> ProjectPaths {
        let dir = self.root.join(name);
        ProjectPaths {
            name: name.to_string(),
            pdfs: dir.join(&self.pdf_dir_name),
            chunks: dir.join(CHUNKS_DIR),
            merged_chunks: dir.join(MERGED_CHUNKS_FILE),
            embeddings: dir.join(EMBEDDINGS_FILE),
            embedded_chunks: dir.join(EMBEDDED_CHUNKS_FILE),
            index: dir.join(INDEX_FILE),
            dir,
        }
    }

    pub fn file_index(&self) -> PathBuf {
        self.root.join(FILE_INDEX_FILE)
    }

    /// Project directory names, sorted.
    pub fn list_projects(&self) -> Result<Vec<String>, IngestError> {
        let entries =
            fs::read_dir(&self.root).map_err(|error| IngestError::io(&self.root, error))?;

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| IngestError::io(&self.root, error))?;
            let is_dir = entry
                .file_type()
                .map_err(|error| IngestError::io(entry.path(), error))?
                .is_dir();
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    projects.push(name.to_string());
                }
            }
        }

        projects.sort();
        Ok(projects)
    }
}

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub name: String,
    pub dir: PathBuf,
    pub pdfs: PathBuf,
    pub chunks: PathBuf,
    pub merged_chunks: PathBuf,
    pub embeddings: PathBuf,
    pub embedded_chunks: PathBuf,
    pub index: PathBuf,
}

/// A fully written, synced temp file next to its destination, not yet renamed
/// into place. Dropping it without [`StagedFile::commit`] removes the temp file.
pub struct StagedFile {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    pub fn commit(self) -> Result<(), IngestError> {
        let target = self.target;
        self.file
            .persist(&target)
            .map_err(|error| IngestError::io(&target, error.error))?;
        Ok(())
    }
}

/// Writes `bytes` into a temp file in the destination directory of `path`.
pub fn stage(path: &Path, bytes: &[u8]) -> Result<StagedFile, IngestError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|error| IngestError::io(parent, error))?;

    let mut file = NamedTempFile::new_in(parent).map_err(|error| IngestError::io(parent, error))?;
    file.write_all(bytes)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|error| IngestError::io(path, error))?;
    Ok(StagedFile {
        file,
        target: path.to_path_buf(),
    })
}

/// Writes `bytes` to `path` through a sibling temp file and an atomic rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IngestError> {
    stage(path, bytes)?.commit()
}

pub fn encode_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<Vec<u8>, IngestError> {
    serde_json::to_vec_pretty(value).map_err(|error| IngestError::json(path, error))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), IngestError> {
    write_atomic(path, &encode_json(path, value)?)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, IngestError> {
    let bytes = fs::read(path).map_err(|error| IngestError::io(path, error))?;
    serde_json::from_slice(&bytes).map_err(|error| IngestError::json(path, error))
}

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Serializes a row-major `f32` matrix as NumPy `.npy` v1.0 (`<f4`, C order).
pub fn encode_npy_matrix(rows: &[Vec<f32>]) -> Result<Vec<u8>, IngestError> {
    let columns = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(position) = rows.iter().position(|row| row.len() != columns) {
        return Err(IngestError::InvalidArgument(format!(
            "row {position} has {} columns, expected {columns}",
            rows[position].len()
        )));
    }

    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows.len(),
        columns
    );
    // magic(6) + version(2) + header_len(2) + header + '\n' is padded to 64 bytes
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let header_len = u16::try_from(header.len()).map_err(|_| {
        IngestError::InvalidArgument("npy header does not fit a v1.0 file".to_string())
    })?;

    let mut bytes = Vec::with_capacity(unpadded + padding + rows.len() * columns * 4);
    bytes.extend_from_slice(NPY_MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&header_len.to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for row in rows {
        for value in row {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(bytes)
}

pub fn write_npy_matrix(path: &Path, rows: &[Vec<f32>]) -> Result<(), IngestError> {
    let bytes = encode_npy_matrix(rows)?;
    write_atomic(path, &bytes)
}

/// Reads a 2-D `<f4` C-order `.npy` file back into rows.
pub fn read_npy_matrix(path: &Path) -> Result<Vec<Vec<f32>>, IngestError> {
    let bytes = fs::read(path).map_err(|error| IngestError::io(path, error))?;
    decode_npy_matrix(&bytes).map_err(|details| IngestError::MalformedArtifact {
        path: path.to_path_buf(),
        details,
    })
}

fn decode_npy_matrix(bytes: &[u8]) -> Result<Vec<Vec<f32>>, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("missing npy magic".to_string());
    }

    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated npy header".to_string());
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        version => return Err(format!("unsupported npy version {version}")),
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| "truncated npy header".to_string())?;
    let header = std::str::from_utf8(header).map_err(|error| error.to_string())?;

    let descr = Regex::new(r"'descr':\s*'([^']+)'").map_err(|error| error.to_string())?;
    let order = Regex::new(r"'fortran_order':\s*(True|False)").map_err(|error| error.to_string())?;
    let shape = Regex::new(r"'shape':\s*\(\s*(\d+)\s*,\s*(\d+)\s*,?\s*\)")
        .map_err(|error| error.to_string())?;

    match descr.captures(header).and_then(|capture| capture.get(1)) {
        Some(found) if found.as_str() == "<f4" => {}
        Some(found) => return Err(format!("unsupported dtype {}", found.as_str())),
        None => return Err("npy header has no descr".to_string()),
    }
    if order
        .captures(header)
        .and_then(|capture| capture.get(1))
        .is_some_and(|found| found.as_str() == "True")
    {
        return Err("fortran-ordered arrays are not supported".to_string());
    }

    let captures = shape
        .captures(header)
        .ok_or_else(|| "npy header is not a 2-d shape".to_string())?;
    let rows: usize = captures[1].parse().map_err(|_| "bad row count".to_string())?;
    let columns: usize = captures[2].parse().map_err(|_| "bad column count".to_string())?;

    let data = &bytes[data_start..];
    let expected = rows
        .checked_mul(columns)
        .and_then(|cells| cells.checked_mul(4))
        .ok_or_else(|| "npy shape overflows".to_string())?;
    if data.len() != expected {
        return Err(format!(
            "npy payload has {} bytes, shape ({rows}, {columns}) needs {expected}",
            data.len()
        ));
    }

    let values = data
        .chunks_exact(4)
        .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .collect::<Vec<_>>();

    if columns == 0 {
        return Ok(vec![Vec::new(); rows]);
    }
    Ok(values.chunks(columns).map(<[f32]>::to_vec).collect())
}
