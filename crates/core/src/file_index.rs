use crate::artifacts::{read_json, write_json, ProjectLayout};
use crate::error::IngestError;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;

/// Project name to the files under it, relative to the projects root.
pub type FileIndex = BTreeMap<String, Vec<String>>;

const GENERATED_SUFFIXES: [&str; 3] = [".json", ".npy", ".index"];

fn is_listed(name: &str) -> bool {
    !name.starts_with('.') && !GENERATED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Lists source files of every project, skipping hidden files and generated
/// artifacts, and writes the listing to `file_index.json`.
pub fn build_file_index(layout: &ProjectLayout) -> Result<FileIndex, IngestError> {
    let mut index = FileIndex::new();

    for project in layout.list_projects()? {
        let project_dir = layout.root.join(&project);
        let mut files = Vec::new();

        for entry in WalkDir::new(&project_dir)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let listed = entry.file_name().to_str().is_some_and(is_listed);
            if !listed {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&layout.root) {
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }

        files.sort();
        index.insert(project, files);
    }

    let path = layout.file_index();
    write_json(&path, &index)?;
    info!(path = %path.display(), projects = index.len(), "file index written");
    Ok(index)
}

pub fn load_file_index(path: &Path) -> Result<FileIndex, IngestError> {
    if !path.is_file() {
        return Err(IngestError::InvalidArgument(format!(
            "file index not found at {}",
            path.display()
        )));
    }
    read_json(path)
}

/// Renders the `find_files` answer for one project.
pub fn format_file_listing(project: &str, files: &[String]) -> String {
    let mut listing = format!("Files in project {project}:\n");
    for file in files {
        listing.push_str(&format!("- {file}\n"));
    }
    listing.trim().to_string()
}
