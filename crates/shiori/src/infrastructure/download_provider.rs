use std::path::{Path, PathBuf};

use shiori_lib::prelude::SourceInfo;

use crate::domain::entities::chapter::Chapter;

const MAX_FILE_NAME_LEN: usize = 240;

pub const TMP_DIR_SUFFIX: &str = "_tmp";
pub const CBZ_EXTENSION: &str = "cbz";

/// Mutates a string so it is a valid file name on FAT filesystems.
pub fn build_valid_filename(name: &str) -> String {
    let name = name.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if name.is_empty() {
        return "(invalid)".to_string();
    }

    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if is_valid_fat_char(c) {
            out.push(c);
        } else {
            out.push('_');
        }
        if out.len() >= MAX_FILE_NAME_LEN {
            break;
        }
    }

    // the cap may land in the middle of a name, do not end with a dot
    while out.ends_with('.') {
        out.pop();
    }
    if out.is_empty() {
        "(invalid)".to_string()
    } else {
        out
    }
}

fn is_valid_fat_char(c: char) -> bool {
    !(c.is_control() || matches!(c, '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|'))
}

/// Knows where chapters are downloaded:
/// `<root>/<source>/<manga>/<chapter>` or `<chapter>.cbz`
#[derive(Debug, Clone)]
pub struct DownloadProvider {
    root: PathBuf,
}

impl DownloadProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir_name(source: &SourceInfo) -> String {
        build_valid_filename(&source.display_name())
    }

    pub fn manga_dir_name(title: &str) -> String {
        build_valid_filename(title)
    }

    pub fn chapter_dir_name(name: &str, scanlator: Option<&str>) -> String {
        let name = if name.trim().is_empty() { "Chapter" } else { name };
        match scanlator.filter(|s| !s.trim().is_empty()) {
            Some(scanlator) => build_valid_filename(&format!("{scanlator}_{name}")),
            None => build_valid_filename(name),
        }
    }

    /// Every directory or archive name a downloaded chapter may have,
    /// including names produced before the scanlator prefix existed
    pub fn valid_chapter_dir_names(name: &str, scanlator: Option<&str>) -> Vec<String> {
        let current = Self::chapter_dir_name(name, scanlator);
        let mut names = vec![current.clone(), format!("{current}.{CBZ_EXTENSION}")];
        let legacy = Self::chapter_dir_name(name, None);
        if legacy != current {
            names.push(format!("{legacy}.{CBZ_EXTENSION}"));
            names.push(legacy);
        }
        names
    }

    pub fn source_dir(&self, source: &SourceInfo) -> PathBuf {
        self.root.join(Self::source_dir_name(source))
    }

    pub fn manga_dir(&self, source: &SourceInfo, manga_title: &str) -> PathBuf {
        self.source_dir(source).join(Self::manga_dir_name(manga_title))
    }

    pub fn get_or_create_manga_dir(
        &self,
        source: &SourceInfo,
        manga_title: &str,
    ) -> std::io::Result<PathBuf> {
        let dir = self.manga_dir(source, manga_title);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Directory or archive of a downloaded chapter, if any
    pub fn find_chapter_dir(
        &self,
        source: &SourceInfo,
        manga_title: &str,
        chapter: &Chapter,
    ) -> Option<PathBuf> {
        let manga_dir = self.manga_dir(source, manga_title);
        Self::valid_chapter_dir_names(&chapter.name, chapter.scanlator.as_deref())
            .into_iter()
            .map(|name| manga_dir.join(name))
            .find(|path| path.exists())
    }

    pub fn delete_chapters(
        &self,
        source: &SourceInfo,
        manga_title: &str,
        chapters: &[Chapter],
    ) -> Vec<PathBuf> {
        let mut deleted = vec![];
        for chapter in chapters {
            let Some(path) = self.find_chapter_dir(source, manga_title, chapter) else {
                continue;
            };
            let res = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match res {
                Ok(_) => deleted.push(path),
                Err(e) => error!("failed to delete {}: {e}", path.display()),
            }
        }

        let manga_dir = self.manga_dir(source, manga_title);
        if manga_dir
            .read_dir()
            .is_ok_and(|mut entries| entries.next().is_none())
        {
            let _ = std::fs::remove_dir(&manga_dir);
        }

        deleted
    }

    /// Renames a downloaded chapter after the source renamed it
    pub fn rename_chapter(
        &self,
        source: &SourceInfo,
        manga_title: &str,
        old: &Chapter,
        new: &Chapter,
    ) -> std::io::Result<()> {
        let Some(old_path) = self.find_chapter_dir(source, manga_title, old) else {
            return Ok(());
        };
        let mut new_name = Self::chapter_dir_name(&new.name, new.scanlator.as_deref());
        if old_path.is_file() {
            new_name = format!("{new_name}.{CBZ_EXTENSION}");
        }
        let new_path = self.manga_dir(source, manga_title).join(new_name);
        if new_path != old_path {
            std::fs::rename(old_path, new_path)?;
        }
        Ok(())
    }
}
