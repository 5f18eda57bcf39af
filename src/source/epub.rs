//! EPUB container reader.
//!
//! ```text
//! META-INF/container.xml ──▶ OPF ──▶ manifest + spine ──▶ content items
//!                                         └──▶ nav (EPUB 3) or NCX (EPUB 2) ──▶ TOC
//! ```
//!
//! Only the container index and the TOC are read when a book is opened.
//! Chapter files are decompressed on demand, so the quick pass never pays
//! for the parts of a large book it does not read.

use super::{ContentItem, DocumentSource, SourceOpener};
use crate::error::{DecodeError, ReaderError};
use crate::identity::DocumentIdentity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";
const MAX_SIZE_HINT: u64 = 1 << 20;

/// Opens `.epub` files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubOpener;

impl SourceOpener for EpubOpener {
    fn open(&self, identity: &DocumentIdentity) -> Result<Box<dyn DocumentSource>, ReaderError> {
        Ok(Box::new(EpubSource::open(&identity.path)?))
    }
}

/// An opened EPUB: the archive handle plus its reading order and TOC.
pub struct EpubSource {
    archive: Mutex<ZipArchive<BufReader<File>>>,
    spine: Vec<String>,
    toc: Vec<String>,
}

impl EpubSource {
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ReaderError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => container_error(path, e),
        })?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| container_error(path, e))?;

        let container = read_entry(&mut archive, CONTAINER_PATH)
            .map_err(|e| container_error(path, format!("{CONTAINER_PATH}: {e}")))?;
        let opf_path = find_opf_path(&container).ok_or_else(|| {
            container_error(path, "container.xml names no package document")
        })?;
        let opf_dir = parent_dir(&opf_path);

        let opf_text = read_entry(&mut archive, &opf_path)
            .map_err(|e| container_error(path, format!("{opf_path}: {e}")))?;
        let package = parse_package(&opf_text).map_err(|e| container_error(path, e))?;

        let spine: Vec<String> = package
            .spine
            .iter()
            .filter_map(|idref| package.manifest.get(idref))
            .filter(|item| is_document(&item.media_type))
            .map(|item| resolve_href(&opf_dir, &item.href))
            .collect();

        let toc = match package.toc_document() {
            Some(TocDocument::Nav(href)) => {
                read_toc(&mut archive, &resolve_href(&opf_dir, href), parse_nav_titles)
            }
            Some(TocDocument::Ncx(href)) => {
                read_toc(&mut archive, &resolve_href(&opf_dir, href), parse_ncx_titles)
            }
            None => Vec::new(),
        };

        debug!(
            "Opened {}: {} spine items, {} TOC entries",
            path.display(),
            spine.len(),
            toc.len()
        );

        Ok(Self {
            archive: Mutex::new(archive),
            spine,
            toc,
        })
    }
}

impl DocumentSource for EpubSource {
    fn item_count(&self) -> usize {
        self.spine.len()
    }

    fn item(&self, index: usize) -> Result<ContentItem, DecodeError> {
        let href = self
            .spine
            .get(index)
            .ok_or(DecodeError::OutOfRange { index })?;
        let mut archive = self.archive.lock();
        let markup = read_entry(&mut *archive, href).map_err(|e| match e {
            ZipError::FileNotFound => DecodeError::Missing {
                index,
                href: href.clone(),
            },
            other => DecodeError::Unreadable {
                index,
                href: href.clone(),
                detail: other.to_string(),
            },
        })?;
        Ok(ContentItem::new(href.clone(), markup))
    }

    fn table_of_contents(&self) -> Vec<String> {
        self.toc.clone()
    }
}

fn container_error(path: &Path, detail: impl ToString) -> ReaderError {
    ReaderError::Container {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Read an archive entry as text. Invalid UTF-8 is replaced, not rejected.
fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, ZipError> {
    let mut entry = archive.by_name(name)?;
    // Declared size is untrusted.
    let mut bytes = Vec::with_capacity(entry.size().min(MAX_SIZE_HINT) as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

fn read_toc<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    parse: fn(&str) -> Result<Vec<String>, roxmltree::Error>,
) -> Vec<String> {
    let text = match read_entry(archive, name) {
        Ok(t) => t,
        Err(e) => {
            warn!("TOC document '{name}' unreadable: {e}");
            return Vec::new();
        }
    };
    match parse(&text) {
        Ok(titles) => titles,
        Err(e) => {
            warn!("TOC document '{name}' is not well-formed: {e}");
            Vec::new()
        }
    }
}

// ── XML ──────────────────────────────────────────────────────────────────────

fn parse_xml(text: &str) -> Result<roxmltree::Document<'_>, roxmltree::Error> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    roxmltree::Document::parse_with_options(text, options)
}

fn find_opf_path(container: &str) -> Option<String> {
    let doc = parse_xml(container).ok()?;
    doc.descendants()
        .find(|n| n.tag_name().name() == "rootfile")
        .and_then(|n| n.attribute("full-path"))
        .map(str::to_string)
}

struct ManifestItem {
    href: String,
    media_type: String,
    properties: Option<String>,
}

struct Package {
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
    spine_toc: Option<String>,
}

enum TocDocument<'a> {
    Nav(&'a str),
    Ncx(&'a str),
}

impl Package {
    /// The EPUB 3 nav document if declared, else the NCX the spine points at.
    fn toc_document(&self) -> Option<TocDocument<'_>> {
        let nav = self.manifest.values().find(|item| {
            item.properties
                .as_deref()
                .is_some_and(|p| p.split_whitespace().any(|p| p == "nav"))
        });
        if let Some(item) = nav {
            return Some(TocDocument::Nav(&item.href));
        }
        self.spine_toc
            .as_deref()
            .and_then(|id| self.manifest.get(id))
            .map(|item| TocDocument::Ncx(&item.href))
    }
}

fn parse_package(opf: &str) -> Result<Package, roxmltree::Error> {
    let doc = parse_xml(opf)?;
    let mut manifest = HashMap::new();
    let mut spine = Vec::new();
    let mut spine_toc = None;

    for node in doc.descendants() {
        match node.tag_name().name() {
            "item" => {
                if let (Some(id), Some(href), Some(media_type)) = (
                    node.attribute("id"),
                    node.attribute("href"),
                    node.attribute("media-type"),
                ) {
                    manifest.insert(
                        id.to_string(),
                        ManifestItem {
                            href: href.to_string(),
                            media_type: media_type.to_string(),
                            properties: node.attribute("properties").map(str::to_string),
                        },
                    );
                }
            }
            "spine" => spine_toc = node.attribute("toc").map(str::to_string),
            "itemref" => {
                if let Some(idref) = node.attribute("idref") {
                    spine.push(idref.to_string());
                }
            }
            _ => {}
        }
    }

    Ok(Package {
        manifest,
        spine,
        spine_toc,
    })
}

fn is_document(media_type: &str) -> bool {
    matches!(media_type, "application/xhtml+xml" | "text/html")
}

/// Top-level `li` labels of the `<nav epub:type="toc">` list.
fn parse_nav_titles(text: &str) -> Result<Vec<String>, roxmltree::Error> {
    let doc = parse_xml(text)?;
    let navs: Vec<_> = doc
        .descendants()
        .filter(|n| n.tag_name().name() == "nav")
        .collect();
    let toc_nav = navs
        .iter()
        .find(|n| {
            n.attributes()
                .any(|a| a.name() == "type" && a.value().split_whitespace().any(|v| v == "toc"))
        })
        .or_else(|| navs.first());

    let Some(nav) = toc_nav else {
        return Ok(Vec::new());
    };
    let Some(ol) = nav.descendants().find(|n| n.tag_name().name() == "ol") else {
        return Ok(Vec::new());
    };

    Ok(ol
        .children()
        .filter(|li| li.tag_name().name() == "li")
        .filter_map(|li| {
            li.children()
                .find(|c| matches!(c.tag_name().name(), "a" | "span"))
                .map(|label| text_content(&label))
        })
        .filter(|t| !t.is_empty())
        .collect())
}

/// Top-level `navPoint` labels of the NCX `navMap`.
fn parse_ncx_titles(text: &str) -> Result<Vec<String>, roxmltree::Error> {
    let doc = parse_xml(text)?;
    let Some(nav_map) = doc.descendants().find(|n| n.tag_name().name() == "navMap") else {
        return Ok(Vec::new());
    };

    Ok(nav_map
        .children()
        .filter(|n| n.tag_name().name() == "navPoint")
        .filter_map(|point| {
            point
                .children()
                .find(|c| c.tag_name().name() == "navLabel")
                .and_then(|label| label.descendants().find(|d| d.tag_name().name() == "text"))
                .map(|t| text_content(&t))
        })
        .filter(|t| !t.is_empty())
        .collect())
}

fn text_content(node: &roxmltree::Node) -> String {
    let raw: String = node
        .descendants()
        .filter(|d| d.is_text())
        .filter_map(|d| d.text())
        .collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Paths ────────────────────────────────────────────────────────────────────

fn parent_dir(path: &str) -> String {
    path.rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .unwrap_or_default()
}

/// Resolve a manifest href against the package directory. Fragments are
/// dropped and `..` segments folded.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or_default();
    let href = urlencoding::decode(href).unwrap_or_else(|_| href.into());
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}
