use std::fmt;
use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};

use crate::config;
use crate::dtd::{EntityTable, parse_entity_declarations};
use crate::grow_buf::{GrowError, TextBuf};

#[derive(Debug)]
pub enum XmlError {
    Malformed { position: u64, message: String },
    UnexpectedElement { depth: usize, expected: &'static str, found: String },
    OutOfMemory(GrowError),
    Read(String),
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { position, message } => {
                write!(f, "Malformed document at byte {}: {}", position, message)
            }
            Self::UnexpectedElement {
                depth,
                expected,
                found,
            } => write!(
                f,
                "Invalid document: expected <{}> at depth {}, found <{}>",
                expected, depth, found
            ),
            Self::OutOfMemory(e) => write!(f, "{}", e),
            Self::Read(e) => write!(f, "Read error: {}", e),
        }
    }
}

impl std::error::Error for XmlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            XmlError::OutOfMemory(ref source) => Some(source),
            _ => None,
        }
    }
}

impl From<GrowError> for XmlError {
    fn from(err: GrowError) -> Self {
        Self::OutOfMemory(err)
    }
}

/// Callbacks invoked while the document is read. Returning `Err` stops the
/// read loop immediately and the error is returned from [`XmlCursor::parse`].
pub trait ElementHandler {
    type Error: From<XmlError>;

    fn start_element(&mut self, cursor: &XmlCursor) -> Result<(), Self::Error>;

    /// Called before the element is popped, so the cursor still reports its
    /// name, attributes and accumulated text.
    fn end_element(&mut self, cursor: &XmlCursor) -> Result<(), Self::Error>;
}

/// Expected names of the root element and of its children.
#[derive(Debug, Clone, Copy)]
pub struct DocumentShape {
    pub root: &'static str,
    pub record: &'static str,
}

impl Default for DocumentShape {
    fn default() -> Self {
        DocumentShape {
            root: config::ROOT_ELEMENT,
            record: config::ENTRY_ELEMENT,
        }
    }
}

#[derive(Debug)]
struct OpenElement {
    name: String,
    attributes: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct XmlCursor {
    shape: DocumentShape,
    open: Vec<OpenElement>,
    text: TextBuf,
    entities: EntityTable,
    seen_root: bool,
}

fn entity_resolver<'e>(entities: &'e EntityTable) -> impl FnMut(&str) -> Option<&'e str> + 'e {
    move |name: &str| {
        resolve_predefined_entity(name).or_else(|| entities.get(name).map(String::as_str))
    }
}

fn position_of<R>(reader: &Reader<R>) -> u64 {
    u64::try_from(reader.buffer_position()).unwrap_or(u64::MAX)
}

fn malformed<R>(reader: &Reader<R>, message: impl fmt::Display) -> XmlError {
    XmlError::Malformed {
        position: position_of(reader),
        message: message.to_string(),
    }
}

fn utf8<'b, R>(reader: &Reader<R>, bytes: &'b [u8]) -> Result<&'b str, XmlError> {
    std::str::from_utf8(bytes).map_err(|e| malformed(reader, e))
}

impl XmlCursor {
    pub fn new(shape: DocumentShape) -> Result<Self, XmlError> {
        Ok(XmlCursor {
            shape,
            open: vec![],
            text: TextBuf::new(config::TEXT_BUF_CAPACITY)?,
            entities: EntityTable::new(),
            seen_root: false,
        })
    }

    /// Number of currently open elements, 1 inside the root element.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Name of the innermost open element.
    pub fn name(&self) -> &str {
        self.open.last().map_or("", |e| e.name.as_str())
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.open.last().and_then(|e| {
            e.attributes
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.open
            .last()
            .into_iter()
            .flat_map(|e| e.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Character data accumulated since the innermost element was opened.
    pub fn text(&self) -> &str {
        self.text.as_str()
    }

    /// Read the whole document, dispatching element events to `handler`.
    pub fn parse<R: BufRead, H: ElementHandler>(
        &mut self,
        input: R,
        handler: &mut H,
    ) -> Result<(), H::Error> {
        let mut reader = Reader::from_reader(input);
        self.seen_root = false;
        let mut buf = Vec::with_capacity(config::XML_BUF_SIZE);
        loop {
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(quick_xml::Error::Io(e)) => return Err(XmlError::Read(e.to_string()).into()),
                Err(e) => return Err(malformed(&reader, e).into()),
            };
            match event {
                Event::DocType(e) => {
                    self.entities = parse_entity_declarations(utf8(&reader, &e)?);
                }
                Event::Start(e) => {
                    self.open_element(&reader, &e)?;
                    handler.start_element(self)?;
                }
                Event::Empty(e) => {
                    self.open_element(&reader, &e)?;
                    handler.start_element(self)?;
                    handler.end_element(self)?;
                    self.close_element();
                }
                Event::End(_) => {
                    handler.end_element(self)?;
                    self.close_element();
                }
                Event::Text(e) => {
                    let text = e
                        .unescape_with(entity_resolver(&self.entities))
                        .map_err(|err| malformed(&reader, err))?;
                    // indentation between elements
                    if !(text.contains('\n') && text.trim().is_empty()) {
                        self.text.push_str(&text).map_err(XmlError::from)?;
                    }
                }
                Event::CData(e) => {
                    let bytes = e.into_inner();
                    let text = utf8(&reader, &bytes)?;
                    self.text.push_str(text).map_err(XmlError::from)?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        if !self.seen_root {
            return Err(malformed(&reader, format!("no <{}> element found", self.shape.root)).into());
        }
        if !self.open.is_empty() {
            return Err(malformed(
                &reader,
                format!("unexpected end of document inside <{}>", self.name()),
            )
            .into());
        }
        Ok(())
    }

    fn open_element<R>(&mut self, reader: &Reader<R>, e: &BytesStart) -> Result<(), XmlError> {
        let name = utf8(reader, e.name().as_ref())?.to_owned();
        let depth = self.open.len() + 1;
        let expected = match depth {
            1 => Some(self.shape.root),
            2 => Some(self.shape.record),
            _ => None,
        };
        if let Some(expected) = expected {
            if name != expected {
                return Err(XmlError::UnexpectedElement {
                    depth,
                    expected,
                    found: name,
                });
            }
        }

        let mut attributes = vec![];
        for attr in e.attributes() {
            let attr = attr.map_err(|err| malformed(reader, err))?;
            let key = utf8(reader, attr.key.as_ref())?.to_owned();
            let value = attr
                .unescape_value_with(entity_resolver(&self.entities))
                .map_err(|err| malformed(reader, err))?
                .into_owned();
            attributes.push((key, value));
        }
        self.seen_root = true;
        self.open.push(OpenElement { name, attributes });
        self.text.clear();
        Ok(())
    }

    fn close_element(&mut self) {
        self.open.pop();
        self.text.clear();
    }
}
