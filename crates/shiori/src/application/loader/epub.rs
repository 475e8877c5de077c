use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::{Reader, events::Event};
use zip::ZipArchive;

use super::{LoaderError, PageLoader, ensure_active};
use crate::{
    domain::entities::page::Page,
    infrastructure::{archive::read_entry, local::is_image},
};

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Pages of an epub, the images referenced by its spine documents in order
pub struct EpubPageLoader {
    path: PathBuf,
    recycled: AtomicBool,
}

impl EpubPageLoader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            recycled: AtomicBool::new(false),
        }
    }
}

fn read_string(archive: &mut ZipArchive<File>, name: &str) -> Result<String> {
    let mut entry = archive.by_name(name)?;
    let mut data = String::new();
    entry.read_to_string(&mut data)?;
    Ok(data)
}

/// Joins `href` to the directory of `base`, resolving `..` segments
fn resolve(base: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or_default();
    let mut parts: Vec<&str> = base.split('/').collect();
    parts.pop();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            segment => parts.push(segment),
        }
    }
    parts.join("/")
}

/// Every value of the given attributes on the given elements, in document order
fn attribute_values(xml: &str, elements: &[&[u8]], attributes: &[&[u8]]) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut values = vec![];
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if elements.contains(&e.local_name().as_ref()) => {
                for attr in e.attributes() {
                    let attr = attr?;
                    if attributes.contains(&attr.key.local_name().as_ref()) {
                        values.push(attr.unescape_value()?.to_string());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(values)
}

fn package_path(archive: &mut ZipArchive<File>) -> Result<String> {
    let container = read_string(archive, CONTAINER_PATH)?;
    attribute_values(&container, &[b"rootfile"], &[b"full-path"])?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("epub has no package document"))
}

/// Spine documents of the package in reading order
fn spine_documents(package: &str, package_path: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(package);
    let mut manifest = HashMap::new();
    let mut spine = vec![];
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    let mut id = None;
                    let mut href = None;
                    for attr in e.attributes() {
                        let attr = attr?;
                        match attr.key.local_name().as_ref() {
                            b"id" => id = Some(attr.unescape_value()?.to_string()),
                            b"href" => href = Some(attr.unescape_value()?.to_string()),
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.insert(id, resolve(package_path, &href));
                    }
                }
                b"itemref" => {
                    if let Some(idref) = e.try_get_attribute("idref")? {
                        spine.push(idref.unescape_value()?.to_string());
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(spine
        .into_iter()
        .filter_map(|idref| manifest.remove(&idref))
        .collect())
}

fn list_images(path: &Path) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let package_path = package_path(&mut archive)?;
    let package = read_string(&mut archive, &package_path)?;

    let mut images = vec![];
    for document in spine_documents(&package, &package_path)? {
        let Ok(xhtml) = read_string(&mut archive, &document) else {
            warn!("missing epub document {document}");
            continue;
        };
        for src in attribute_values(&xhtml, &[b"img", b"image"], &[b"src", b"href"])? {
            let image = resolve(&document, &src);
            if is_image(&image) && !images.contains(&image) {
                images.push(image);
            }
        }
    }
    Ok(images)
}

#[async_trait]
impl PageLoader for EpubPageLoader {
    fn is_local(&self) -> bool {
        true
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>, LoaderError> {
        ensure_active(&self.recycled)?;

        let path = self.path.clone();
        let images = tokio::task::spawn_blocking(move || list_images(&path))
            .await
            .map_err(anyhow::Error::from)??;

        Ok(images
            .into_iter()
            .enumerate()
            .map(|(index, name)| Arc::new(Page::ready(index, name)))
            .collect())
    }

    async fn read_page(&self, page: &Page) -> Result<Bytes, LoaderError> {
        ensure_active(&self.recycled)?;

        let name = page.location().ok_or(LoaderError::NoPages)?;
        let path = self.path.clone();
        let data = tokio::task::spawn_blocking(move || read_entry(&path, &name, None))
            .await
            .map_err(anyhow::Error::from)??;

        Ok(Bytes::from(data))
    }

    fn recycle(&self) {
        self.recycled.store(true, Ordering::SeqCst);
    }

    fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("OEBPS/content.opf", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve("OEBPS/text/ch1.xhtml", "../images/1.jpg"), "OEBPS/images/1.jpg");
        assert_eq!(resolve("content.opf", "ch1.xhtml#top"), "ch1.xhtml");
    }

    #[tokio::test]
    async fn test_epub_images_in_spine_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        let files: [(&str, &[u8]); 7] = [
            (
                CONTAINER_PATH,
                br#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
            ),
            (
                "OEBPS/content.opf",
                br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="p1" href="text/p1.xhtml" media-type="application/xhtml+xml"/>
    <item id="p2" href="text/p2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="p2"/><itemref idref="p1"/></spine>
</package>"#,
            ),
            (
                "OEBPS/text/p1.xhtml",
                br#"<html xmlns="http://www.w3.org/1999/xhtml"><body><img src="../images/b.jpg"/></body></html>"#,
            ),
            (
                "OEBPS/text/p2.xhtml",
                br#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:xlink="http://www.w3.org/1999/xlink"><body>
<svg><image xlink:href="../images/a.jpg"/></svg></body></html>"#,
            ),
            ("OEBPS/images/a.jpg", b"a"),
            ("OEBPS/images/b.jpg", b"b"),
            ("OEBPS/images/unused.jpg", b"unused"),
        ];
        for (name, data) in files {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();

        let loader = EpubPageLoader::new(path);
        let pages = loader.get_pages().await.unwrap();
        let names: Vec<String> = pages.iter().map(|p| p.location().unwrap()).collect();
        assert_eq!(names, vec!["OEBPS/images/a.jpg", "OEBPS/images/b.jpg"]);
        assert_eq!(loader.read_page(&pages[1]).await.unwrap().as_ref(), b"b");
    }
}
