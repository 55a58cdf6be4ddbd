//! Storage helpers for accepted images on disk.
//!
//! Each category owns one directory under the images root. Accepted images
//! are named `{counter:05}_{category}.{ext}` where the counter is one past the
//! number of images already in the directory, so a category with N images
//! receives N+1 next.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// File holding a category's processed-URL record set.
pub const RECORD_FILE_NAME: &str = "processed_urls.json";

/// Extensions counted as accepted images when scanning a category directory.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

/// Attempts at finding a free filename before giving up.
const MAX_NAME_ATTEMPTS: u64 = 1000;

/// Errors writing or scanning the image library.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No free filename for category '{0}'")]
    Exhausted(String),
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write bytes to `path` atomically.
///
/// Data goes to a temporary file in the same directory which is then renamed
/// over the destination, so readers see either the old or the new contents.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Map sniffed image bytes to a file extension, defaulting to `jpg`.
pub fn sniff_extension(bytes: &[u8]) -> &'static str {
    match infer::get(bytes).map(|t| t.mime_type()) {
        Some("image/jpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/bmp") => "bmp",
        Some("image/tiff") => "tiff",
        _ => "jpg",
    }
}

/// Filename for an accepted image.
pub fn image_filename(counter: u64, category: &str, extension: &str) -> String {
    format!("{:05}_{}.{}", counter, category, extension)
}

/// Parse the counter out of an accepted image filename for `category`.
pub fn parse_counter(file_name: &str, category: &str) -> Option<u64> {
    let (digits, rest) = file_name.split_once('_')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (name, extension) = rest.rsplit_once('.')?;
    if name != category || !is_image_extension(extension) {
        return None;
    }
    digits.parse().ok()
}

fn is_image_extension(extension: &str) -> bool {
    let extension = extension.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&extension.as_str())
}

/// Summary of one category directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryScan {
    /// Number of image files present.
    pub image_count: u64,
    /// Highest counter parsed from a conforming filename.
    pub max_counter: u64,
}

impl CategoryScan {
    /// The counter the next accepted image receives.
    pub fn next_counter(&self) -> u64 {
        self.image_count.max(self.max_counter) + 1
    }
}

/// Per-category collection of accepted images.
#[derive(Debug, Clone)]
pub struct ImageLibrary {
    root: PathBuf,
}

impl ImageLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory containing one subdirectory per category.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.root.join(category)
    }

    /// Count the images in a category directory and find the highest counter.
    ///
    /// A missing directory is an empty category.
    pub fn scan(&self, category: &str) -> Result<CategoryScan, StorageError> {
        let dir = self.category_dir(category);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CategoryScan::default()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut scan = CategoryScan::default();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let is_image = Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())
                .map(is_image_extension)
                .unwrap_or(false);
            if !is_image {
                continue;
            }

            scan.image_count += 1;
            if let Some(counter) = parse_counter(file_name, category) {
                scan.max_counter = scan.max_counter.max(counter);
            }
        }

        Ok(scan)
    }

    /// Number of accepted images currently stored for a category.
    pub fn count(&self, category: &str) -> Result<u64, StorageError> {
        Ok(self.scan(category)?.image_count)
    }

    /// The counter the next accepted image in `category` will receive.
    pub fn next_counter(&self, category: &str) -> Result<u64, StorageError> {
        Ok(self.scan(category)?.next_counter())
    }

    /// Persist an accepted image and return its counter and path.
    ///
    /// The file is written to a temporary name and moved into place without
    /// replacing an existing file, so a counter is never reused.
    pub fn save(&self, category: &str, bytes: &[u8]) -> Result<(u64, PathBuf), StorageError> {
        let dir = self.category_dir(category);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let extension = sniff_extension(bytes);
        let mut counter = self.next_counter(category)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&dir, e))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StorageError::io(tmp.path(), e))?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = dir.join(image_filename(counter, category, extension));
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    debug!("Saved {} ({} bytes)", path.display(), bytes.len());
                    return Ok((counter, path));
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    counter += 1;
                }
                Err(e) => return Err(StorageError::io(&path, e.error)),
            }
        }

        Err(StorageError::Exhausted(category.to_string()))
    }

    /// Category directories present on disk.
    pub fn categories_on_disk(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_image_filename_padding() {
        assert_eq!(image_filename(7, "apple", "jpg"), "00007_apple.jpg");
        assert_eq!(image_filename(123456, "fig", "png"), "123456_fig.png");
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("00042_apple.jpg", "apple"), Some(42));
        assert_eq!(parse_counter("00042_dragon_fruit.png", "dragon_fruit"), Some(42));
        assert_eq!(parse_counter("00042_pear.jpg", "apple"), None);
        assert_eq!(parse_counter("processed_urls.json", "apple"), None);
        assert_eq!(parse_counter("abc_apple.jpg", "apple"), None);
    }

    #[test]
    fn test_sniff_extension() {
        assert_eq!(sniff_extension(PNG_MAGIC), "png");
        assert_eq!(sniff_extension(b"not an image"), "jpg");
    }

    #[test]
    fn test_counters_are_sequential() {
        let dir = tempdir().unwrap();
        let library = ImageLibrary::new(dir.path());

        let (first, path) = library.save("apple", b"one").unwrap();
        let (second, _) = library.save("apple", b"two").unwrap();
        let (other, _) = library.save("pear", b"three").unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(other, 1);
        assert_eq!(path.file_name().unwrap(), "00001_apple.jpg");
        assert_eq!(library.count("apple").unwrap(), 2);
    }

    #[test]
    fn test_next_counter_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let library = ImageLibrary::new(dir.path());
            for _ in 0..3 {
                library.save("kiwi", b"bytes").unwrap();
            }
        }

        // Record file and stray temp files do not count as images
        fs::write(dir.path().join("kiwi").join(RECORD_FILE_NAME), "[]").unwrap();

        let library = ImageLibrary::new(dir.path());
        assert_eq!(library.next_counter("kiwi").unwrap(), 4);
    }

    #[test]
    fn test_save_never_clobbers_after_manual_deletion() {
        let dir = tempdir().unwrap();
        let library = ImageLibrary::new(dir.path());
        for _ in 0..3 {
            library.save("lime", b"bytes").unwrap();
        }

        fs::remove_file(dir.path().join("lime").join("00001_lime.jpg")).unwrap();

        let (counter, _) = library.save("lime", b"new").unwrap();
        assert_eq!(counter, 4);
        assert_eq!(
            fs::read(dir.path().join("lime").join("00003_lime.jpg")).unwrap(),
            b"bytes"
        );
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("file.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_category_is_empty() {
        let dir = tempdir().unwrap();
        let library = ImageLibrary::new(dir.path().join("nope"));
        assert_eq!(library.scan("apple").unwrap(), CategoryScan::default());
        assert!(library.categories_on_disk().unwrap().is_empty());
    }
}
