use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use rand::{Rng, distr::Alphanumeric};
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter, write::FileOptions};

use super::local::is_image;

pub mod comic_info;

const MAX_IMAGE_PADDING: usize = 1024;

/// Upper bound for the buffer reserved from the size an entry declares
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Random filler for the `PaddingShort` field of `ComicInfo.xml`
pub fn comic_info_padding() -> String {
    let mut rng = rand::rng();
    let len = rng.random_range(16..=256);
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = dir
        .read_dir()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort_by(|a, b| {
        human_sort::compare(
            a.file_name().unwrap_or_default().to_string_lossy().as_ref(),
            b.file_name().unwrap_or_default().to_string_lossy().as_ref(),
        )
    });
    Ok(files)
}

/// Zips every file of `dir` into `dest` with stored entries.
///
/// With a password every entry is AES-256 encrypted and images get random
/// trailing bytes so the archive size does not reveal the content.
pub fn create_cbz(dir: &Path, dest: &Path, password: Option<&str>) -> Result<()> {
    let tmp_path = dest.with_extension("cbz.tmp");

    if let Err(e) = write_cbz(dir, &tmp_path, password) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    std::fs::rename(&tmp_path, dest)?;

    Ok(())
}

fn write_cbz(dir: &Path, tmp_path: &Path, password: Option<&str>) -> Result<()> {
    let file = File::create(tmp_path)?;
    let mut zip = ZipWriter::new(file);

    let mut options: FileOptions<'_, ()> =
        FileOptions::default().compression_method(CompressionMethod::Stored);
    if let Some(password) = password {
        options = options.with_aes_encryption(AesMode::Aes256, password);
    }

    let mut rng = rand::rng();
    for path in sorted_files(dir)? {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("invalid file {}", path.display()))?;
        let mut data = std::fs::read(&path)?;
        if password.is_some() && is_image(&name) {
            let padding = rng.random_range(0..=MAX_IMAGE_PADDING);
            data.extend((0..padding).map(|_| rng.random::<u8>()));
        }

        zip.start_file(name, options)?;
        zip.write_all(&data)?;
    }
    zip.finish()?;

    Ok(())
}

pub fn is_encrypted(path: &Path) -> Result<bool> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    for i in 0..archive.len() {
        if archive.by_index_raw(i)?.encrypted() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Image entries of an archive in reading order
pub fn image_entries(path: &Path) -> Result<Vec<String>> {
    let archive = ZipArchive::new(File::open(path)?)?;
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/') && is_image(name))
        .map(ToString::to_string)
        .collect();
    names.sort_by(|a, b| human_sort::compare(a, b));
    Ok(names)
}

fn preallocation(declared_size: u64) -> usize {
    usize::try_from(declared_size).map_or(MAX_PREALLOCATION, |size| size.min(MAX_PREALLOCATION))
}

pub fn read_entry(path: &Path, name: &str, password: Option<&str>) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    // the password is ignored for entries that are not encrypted
    let mut entry = match password {
        Some(password) => archive.by_name_decrypt(name, password.as_bytes())?,
        None => archive.by_name(name)?,
    };

    let mut data = Vec::with_capacity(preallocation(entry.size()));
    entry.read_to_end(&mut data)?;
    Ok(data)
}
