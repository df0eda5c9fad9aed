//! Compress an output folder into `<folder>.zip`.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::error::PackageError;

/// The archive path for a folder: its own path with `.zip` appended.
///
/// `a/b/biorxiv-xml-dump` becomes `a/b/biorxiv-xml-dump.zip`. The name is
/// appended rather than substituted so folder names containing dots survive.
pub fn archive_path_for(folder: &Path) -> PathBuf {
    let mut name = OsString::from(folder.as_os_str());
    name.push(".zip");
    PathBuf::from(name)
}

/// Summary of a written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub path: PathBuf,
    pub entries: usize,
    pub bytes: u64,
}

/// Zip every file under `folder` (paths relative to it, `/` separated, walked in
/// file name order) into [`archive_path_for`]`(folder)`, replacing any previous
/// archive.
pub fn package_folder(folder: &Path) -> Result<PackagedArchive, PackageError> {
    if !folder.is_dir() {
        return Err(PackageError::MissingFolder(folder.to_path_buf()));
    }
    let archive_path = archive_path_for(folder);
    let file = fs::File::create(&archive_path)?;
    let mut zip = zip::ZipWriter::new(io::BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    let mut entries = 0usize;
    for entry in WalkDir::new(folder).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| PackageError::Walk {
            path: folder.to_path_buf(),
            source,
        })?;
        let relative = entry
            .path()
            .strip_prefix(folder)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name.as_str(), options)?;
            let mut source = fs::File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
            entries += 1;
            debug!(entry = %name, "Added file to archive");
        }
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    drop(writer);

    let bytes = fs::metadata(&archive_path)?.len();
    info!(
        folder = %folder.display(),
        archive = %archive_path.display(),
        entries,
        bytes,
        "Packaged output folder"
    );
    Ok(PackagedArchive {
        path: archive_path,
        entries,
        bytes,
    })
}

/// [`package_folder`] on the blocking pool.
pub async fn package_folder_async(folder: PathBuf) -> Result<PackagedArchive, PackageError> {
    tokio::task::spawn_blocking(move || package_folder(&folder))
        .await
        .map_err(|e| PackageError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Read;

    fn archive_names(path: &Path) -> BTreeSet<String> {
        let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .filter(|n| !n.ends_with('/'))
            .collect()
    }

    #[test]
    fn archive_name_appends_extension() {
        assert_eq!(
            archive_path_for(Path::new("work/Current_Content/September_2024/biorxiv-xml-dump")),
            PathBuf::from("work/Current_Content/September_2024/biorxiv-xml-dump.zip")
        );
        assert_eq!(
            archive_path_for(Path::new("dump.v2")),
            PathBuf::from("dump.v2.zip")
        );
    }

    #[test]
    fn repackaging_yields_same_file_set_and_content() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path().join("dump");
        fs::create_dir_all(folder.join("nested")).unwrap();
        fs::write(folder.join("a.xml"), "<a/>").unwrap();
        fs::write(folder.join("nested/b.xml"), "<b/>").unwrap();

        let first = package_folder(&folder).unwrap();
        let first_names = archive_names(&first.path);
        let second = package_folder(&folder).unwrap();
        let second_names = archive_names(&second.path);

        assert_eq!(first.path, second.path);
        assert_eq!(first.entries, 2);
        assert_eq!(first_names, second_names);
        assert_eq!(
            first_names,
            ["a.xml", "nested/b.xml"].iter().map(|s| s.to_string()).collect()
        );

        let mut archive = zip::ZipArchive::new(fs::File::open(&second.path).unwrap()).unwrap();
        let mut body = String::new();
        archive.by_name("nested/b.xml").unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "<b/>");
    }

    #[test]
    fn missing_folder_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = package_folder(&tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, PackageError::MissingFolder(_)));
    }
}
