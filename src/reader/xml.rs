//! Streaming extraction of repeating elements from large XML documents.
//!
//! The stream scans forward to a container element, then materializes each
//! matching direct child as a small owned [`XmlElement`] tree. Only one
//! record is held in memory at a time.

use std::io::{self, BufRead};
use std::marker::PhantomData;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use tracing::debug;

use super::open_source;
use crate::error::{ConvertError, Result};

/// Owned element subtree. Names are local names, namespace prefixes dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a chain of child names.
    pub fn path(&self, path: &[&str]) -> Option<&XmlElement> {
        path.iter().try_fold(self, |el, name| el.child(name))
    }

    /// Trimmed, non-empty text at `path`.
    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        self.path(path).and_then(XmlElement::text)
    }

    /// Trimmed text, `None` if empty.
    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    /// All descendants (depth first) with the given name.
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }
}

/// Typed record built from one element; `None` marks an invalid record.
pub trait FromElement: Sized {
    fn from_element(element: &XmlElement) -> Option<Self>;
}

/// Forward-only stream of the direct children of one container element.
pub struct ElementStream<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    records: &'static [&'static str],
    done: bool,
}

impl ElementStream<Box<dyn BufRead>> {
    /// Open `path` and scan to `container`. `Ok(None)` if it never appears.
    pub fn open(
        path: &Path,
        container: &str,
        records: &'static [&'static str],
    ) -> Result<Option<Self>> {
        Self::from_reader(open_source(path)?, container, records)
    }
}

impl<R: BufRead> ElementStream<R> {
    pub fn from_reader(
        inner: R,
        container: &str,
        records: &'static [&'static str],
    ) -> Result<Option<Self>> {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(true);

        let mut stream = Self {
            reader,
            buf: Vec::new(),
            records,
            done: false,
        };

        loop {
            stream.buf.clear();
            let event = stream
                .reader
                .read_event_into(&mut stream.buf)
                .map_err(|source| xml_error(source, &stream.reader))?;
            match event {
                Event::Start(e) if e.local_name().as_ref() == container.as_bytes() => {
                    return Ok(Some(stream));
                }
                Event::Empty(e) if e.local_name().as_ref() == container.as_bytes() => {
                    stream.done = true;
                    return Ok(Some(stream));
                }
                Event::Eof => {
                    debug!("Container <{}> not present", container);
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Map each element to a typed record, skipping invalid ones.
    pub fn typed<T: FromElement>(self) -> TypedRecords<T, R> {
        TypedRecords {
            inner: self,
            skipped: 0,
            _record: PhantomData,
        }
    }

    fn next_record(&mut self) -> Result<Option<XmlElement>> {
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|source| xml_error(source, &self.reader))?;
            match event {
                Event::Start(e) => {
                    let local = e.local_name();
                    if self.records.iter().any(|r| r.as_bytes() == local.as_ref()) {
                        let root = start_element(&e)?;
                        return self.read_subtree(root).map(Some);
                    }
                    let name = e.name().as_ref().to_vec();
                    let mut skip = Vec::new();
                    self.reader
                        .read_to_end_into(QName(&name), &mut skip)
                        .map_err(|source| xml_error(source, &self.reader))?;
                }
                Event::Empty(e) => {
                    let local = e.local_name();
                    if self.records.iter().any(|r| r.as_bytes() == local.as_ref()) {
                        return start_element(&e).map(Some);
                    }
                }
                Event::End(_) | Event::Eof => {
                    self.done = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    fn read_subtree(&mut self, root: XmlElement) -> Result<XmlElement> {
        let mut stack = vec![root];
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let event = self
                .reader
                .read_event_into(&mut buf)
                .map_err(|source| xml_error(source, &self.reader))?;
            match event {
                Event::Start(e) => stack.push(start_element(&e)?),
                Event::Empty(e) => {
                    let element = start_element(&e)?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|source| xml_error(source, &self.reader))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Event::CData(e) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::End(_) => {
                    let Some(finished) = stack.pop() else {
                        continue;
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(finished),
                        None => return Ok(finished),
                    }
                }
                Event::Eof => {
                    return Err(ConvertError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "document ended inside a record",
                    )));
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for ElementStream<R> {
    type Item = Result<XmlElement>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Typed view over an [`ElementStream`].
pub struct TypedRecords<T, R: BufRead> {
    inner: ElementStream<R>,
    skipped: usize,
    _record: PhantomData<T>,
}

impl<T, R: BufRead> TypedRecords<T, R> {
    /// Elements that did not form a valid record so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<T: FromElement, R: BufRead> Iterator for TypedRecords<T, R> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let element = match self.inner.next()? {
                Ok(element) => element,
                Err(e) => return Some(Err(e)),
            };
            match T::from_element(&element) {
                Some(record) => return Some(Ok(record)),
                None => {
                    self.skipped += 1;
                    debug!(
                        "Skipping invalid <{}> (id={:?})",
                        element.name,
                        element.attr("id")
                    );
                }
            }
        }
    }
}

fn start_element(e: &BytesStart<'_>) -> Result<XmlElement> {
    let mut element = XmlElement {
        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        ..XmlElement::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|source| ConvertError::Xml {
            source: source.into(),
            position: 0,
        })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|source| ConvertError::Xml {
            source,
            position: 0,
        })?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn xml_error<R>(source: quick_xml::Error, reader: &Reader<R>) -> ConvertError {
    ConvertError::Xml {
        source,
        position: reader.buffer_position() as u64,
    }
}
