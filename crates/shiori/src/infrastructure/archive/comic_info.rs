use std::io::Cursor;

use anyhow::Result;
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::domain::entities::{chapter::Chapter, manga::Manga};

pub const COMIC_INFO_FILE: &str = "ComicInfo.xml";

/// Metadata written next to the pages of every downloaded chapter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComicInfo {
    pub title: String,
    pub series: String,
    pub number: Option<String>,
    pub web: Option<String>,
    pub summary: Option<String>,
    pub writer: Option<String>,
    pub penciller: Option<String>,
    pub translator: Option<String>,
    pub genre: Option<String>,
    pub publishing_status: Option<String>,
    pub source: Option<String>,
    /// random filler, only set for encrypted archives
    pub padding: Option<String>,
}

fn status_name(status: i64) -> &'static str {
    match status {
        1 => "Ongoing",
        2 => "Completed",
        3 => "Licensed",
        4 => "Publishing finished",
        5 => "Cancelled",
        6 => "On hiatus",
        _ => "Unknown",
    }
}

impl ComicInfo {
    pub fn new(manga: &Manga, chapter: &Chapter, source_name: &str) -> Self {
        Self {
            title: chapter.name.clone(),
            series: manga.title.clone(),
            number: chapter
                .is_recognized_number()
                .then(|| chapter.chapter_number.to_string()),
            web: Some(chapter.url.clone()),
            summary: manga.description.clone(),
            writer: manga.author.clone(),
            penciller: manga.artist.clone(),
            translator: chapter.scanlator.clone(),
            genre: (!manga.genre.is_empty()).then(|| manga.genre.join(", ")),
            publishing_status: Some(status_name(manga.status).to_string()),
            source: Some(source_name.to_string()),
            padding: None,
        }
    }

    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let root = BytesStart::new("ComicInfo").with_attributes([
            ("xmlns:xsd", "http://www.w3.org/2001/XMLSchema"),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
        ]);
        writer.write_event(Event::Start(root))?;

        write_element(&mut writer, "Title", Some(&self.title))?;
        write_element(&mut writer, "Series", Some(&self.series))?;
        write_element(&mut writer, "Number", self.number.as_deref())?;
        write_element(&mut writer, "Web", self.web.as_deref())?;
        write_element(&mut writer, "Summary", self.summary.as_deref())?;
        write_element(&mut writer, "Writer", self.writer.as_deref())?;
        write_element(&mut writer, "Penciller", self.penciller.as_deref())?;
        write_element(&mut writer, "Translator", self.translator.as_deref())?;
        write_element(&mut writer, "Genre", self.genre.as_deref())?;
        write_element(
            &mut writer,
            "PublishingStatusTachiyomi",
            self.publishing_status.as_deref(),
        )?;
        write_element(&mut writer, "SourceMihon", self.source.as_deref())?;
        write_element(&mut writer, "PaddingShort", self.padding.as_deref())?;

        writer.write_event(Event::End(BytesEnd::new("ComicInfo")))?;

        Ok(writer.into_inner().into_inner())
    }
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: Option<&str>) -> Result<()> {
    if let Some(text) = text {
        writer
            .create_element(tag)
            .write_text_content(BytesText::new(text))?;
    }
    Ok(())
}
