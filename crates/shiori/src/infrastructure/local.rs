use std::{
    fs::{DirEntry, ReadDir},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use anyhow::{Result, anyhow};
use fancy_regex::Regex;
use mime_guess::mime;
use serde::{Deserialize, Serialize};
use shiori_lib::prelude::{ChapterInfo, Source, SourceInfo, SourceKind};

pub const LOCAL_SOURCE_ID: i64 = 0;

// archives a local chapter can be stored as, anything else is ignored
pub static SUPPORTED_FILES: phf::Set<&'static str> = phf::phf_set! {
    "zip",
    "cbz",
    "rar",
    "cbr",
    "epub",
};

/// How a local chapter is stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFormat {
    Directory(PathBuf),
    Zip(PathBuf),
    Rar(PathBuf),
    Epub(PathBuf),
}

impl LocalFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.is_dir() {
            return Some(Self::Directory(path.to_path_buf()));
        }

        let extension = path.extension()?.to_string_lossy().to_lowercase();
        match extension.as_str() {
            "zip" | "cbz" => Some(Self::Zip(path.to_path_buf())),
            "rar" | "cbr" => Some(Self::Rar(path.to_path_buf())),
            "epub" => Some(Self::Epub(path.to_path_buf())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalMangaInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<Vec<String>>,
    pub status: Option<i64>,
    pub description: Option<String>,
}

/// Manga stored under a folder of the local filesystem, one sub folder per
/// manga and one directory or archive per chapter.
pub struct LocalSource {
    path: PathBuf,
}

impl LocalSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = PathBuf::new().join(path);
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_chapters(&self, manga_url: &str) -> Result<Vec<ChapterInfo>> {
        let manga_path = self.path.join(manga_url);
        let read_dir = std::fs::read_dir(&manga_path).map_err(|e| anyhow!("{e}"))?;

        let mut data: Vec<ChapterInfo> = read_dir
            .into_iter()
            .filter_map(filter_supported_files_and_folders)
            .filter_map(|entry| map_entry_to_chapter(manga_url, &entry.path()))
            .collect();

        data.sort_by(|a, b| {
            b.chapter_number
                .partial_cmp(&a.chapter_number)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(data)
    }

    pub fn get_manga_details(&self, manga_url: &str) -> Option<LocalMangaInfo> {
        let data = std::fs::read(self.path.join(manga_url).join("details.json")).ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Resolves a chapter url to the way it is stored
    pub fn get_format(&self, chapter_url: &str) -> Result<LocalFormat> {
        let path = self.path.join(chapter_url);
        if !path.exists() {
            return Err(anyhow!("{} does not exist", path.display()));
        }
        LocalFormat::from_path(&path)
            .ok_or_else(|| anyhow!("unsupported local chapter {}", path.display()))
    }
}

impl Source for LocalSource {
    fn get_source_info(&self) -> SourceInfo {
        SourceInfo {
            id: LOCAL_SOURCE_ID,
            name: "Local source".to_string(),
            lang: String::new(),
            kind: SourceKind::Local,
        }
    }
}

pub fn is_image(path: &str) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|m| m.type_() == mime::IMAGE)
}

fn filter_supported_files_and_folders(entry: Result<DirEntry, std::io::Error>) -> Option<DirEntry> {
    let entry = entry.ok()?;
    if entry.path().is_dir()
        || SUPPORTED_FILES.contains(
            entry
                .path()
                .extension()?
                .to_string_lossy()
                .to_lowercase()
                .as_str(),
        )
    {
        Some(entry)
    } else {
        None
    }
}

pub fn sort_dir(dir: ReadDir) -> Vec<DirEntry> {
    let mut dir: Vec<DirEntry> = dir.into_iter().filter_map(Result::ok).collect();
    dir.sort_by(|a, b| {
        human_sort::compare(
            a.path().display().to_string().as_str(),
            b.path().display().to_string().as_str(),
        )
    });
    dir
}

fn map_entry_to_chapter(manga_url: &str, path: &Path) -> Option<ChapterInfo> {
    let modified = path
        .metadata()
        .ok()
        .and_then(|metadata| metadata.modified().ok())
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())?
        .as_millis();
    let Ok(number_re) = Regex::new(
        r"(?i)(?<=ch\.)\s*(\d+(\.\d+)?)|(?<=chapter)\s*(\d+(\.\d+)?)|(?<=\s)(\d+(\.\d+)?)|(\d+(\.\d+)?)",
    ) else {
        return None;
    };
    let file_name = if path.is_dir() {
        path.file_name()?.to_string_lossy().to_string()
    } else {
        path.file_stem()?.to_string_lossy().to_string()
    };
    let chapter_number = match number_re.find(&file_name).ok().flatten() {
        Some(mat) => mat.as_str().trim().parse().unwrap_or(-1_f64),
        None => -1_f64,
    };
    let entry_name = path.file_name()?.to_string_lossy().to_string();

    Some(ChapterInfo {
        url: format!("{manga_url}/{entry_name}"),
        name: file_name,
        scanlator: None,
        chapter_number,
        date_upload: modified as i64,
    })
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn write_cbz(path: &Path, names: &[&str]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for name in names {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"image").unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_get_chapters_sorted_by_number() {
        let dir = tempfile::tempdir().unwrap();
        let manga = dir.path().join("Space Adventures");
        std::fs::create_dir_all(manga.join("Chapter 1")).unwrap();
        write_cbz(&manga.join("Chapter 2.cbz"), &["001.jpg"]);
        std::fs::write(manga.join("notes.txt"), b"ignored").unwrap();

        let local = LocalSource::new(dir.path());
        let chapters = local.get_chapters("Space Adventures").unwrap();

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].name, "Chapter 2");
        assert_eq!(chapters[0].chapter_number, 2.0);
        assert_eq!(chapters[0].url, "Space Adventures/Chapter 2.cbz");
        assert_eq!(chapters[1].name, "Chapter 1");
        assert_eq!(chapters[1].chapter_number, 1.0);
    }

    #[test]
    fn test_get_chapters_missing_manga() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSource::new(dir.path());

        assert!(local.get_chapters("not_manga").is_err());
    }

    #[test]
    fn test_get_format() {
        let dir = tempfile::tempdir().unwrap();
        let manga = dir.path().join("Super Duck");
        std::fs::create_dir_all(manga.join("ch1")).unwrap();
        write_cbz(&manga.join("ch2.CBZ"), &["001.jpg"]);
        std::fs::write(manga.join("ch3.cbr"), b"rar").unwrap();
        std::fs::write(manga.join("ch4.epub"), b"epub").unwrap();
        std::fs::write(manga.join("ch5.pdf"), b"pdf").unwrap();

        let local = LocalSource::new(dir.path());
        assert_eq!(
            local.get_format("Super Duck/ch1").unwrap(),
            LocalFormat::Directory(manga.join("ch1"))
        );
        assert_eq!(
            local.get_format("Super Duck/ch2.CBZ").unwrap(),
            LocalFormat::Zip(manga.join("ch2.CBZ"))
        );
        assert_eq!(
            local.get_format("Super Duck/ch3.cbr").unwrap(),
            LocalFormat::Rar(manga.join("ch3.cbr"))
        );
        assert_eq!(
            local.get_format("Super Duck/ch4.epub").unwrap(),
            LocalFormat::Epub(manga.join("ch4.epub"))
        );
        assert!(local.get_format("Super Duck/ch5.pdf").is_err());
        assert!(local.get_format("Super Duck/ch6").is_err());
    }

    #[test]
    fn test_details_json() {
        let dir = tempfile::tempdir().unwrap();
        let manga = dir.path().join("Super Duck");
        std::fs::create_dir_all(&manga).unwrap();
        std::fs::write(
            manga.join("details.json"),
            br#"{"title": "Super Duck", "author": "Ian Flynn", "genre": ["Comedy"]}"#,
        )
        .unwrap();

        let local = LocalSource::new(dir.path());
        let details = local.get_manga_details("Super Duck").unwrap();

        assert_eq!(details.title.as_deref(), Some("Super Duck"));
        assert_eq!(details.author.as_deref(), Some("Ian Flynn"));
        assert_eq!(details.genre, Some(vec!["Comedy".to_string()]));
        assert!(local.get_manga_details("Space Adventures").is_none());
    }

    #[test]
    fn test_is_image() {
        assert!(is_image("SPA00401.JPG"));
        assert!(is_image("page.webp"));
        assert!(!is_image("ComicInfo.xml"));
    }
}
