use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{AppResult, IndiError};
use crate::property::BlobData;

/// A parsed wire element.
///
/// Text content is kept verbatim (only entity-decoded); callers trim where the
/// grammar allows surrounding whitespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    /// Tag name.
    pub name: String,
    /// Attributes in document order, unescaped.
    pub attrs: Vec<(String, String)>,
    /// Concatenated character data.
    pub text: String,
    /// Child elements in order.
    pub children: Vec<Element>,
    /// Payload received as a descriptor, for `oneBLOB attached='true'`.
    pub attachment: Option<BlobData>,
}

impl Element {
    /// Parse one complete message.
    pub fn parse(text: &str) -> AppResult<Element> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(Self::open(&e)?),
                Event::Empty(e) => {
                    let element = Self::open(&e)?;
                    Self::close(element, &mut stack, &mut root)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| IndiError::Malformed("unbalanced end tag".into()))?;
                    Self::close(element, &mut stack, &mut root)?;
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(IndiError::Malformed(format!("unclosed <{}>", stack[0].name)));
        }
        root.ok_or_else(|| IndiError::Malformed("no element".into()))
    }

    fn open(start: &BytesStart<'_>) -> AppResult<Element> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(Element {
            name,
            attrs,
            ..Default::default()
        })
    }

    fn close(element: Element, stack: &mut [Element], root: &mut Option<Element>) -> AppResult<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => *root = Some(element),
            None => {
                return Err(IndiError::Malformed(format!(
                    "second top-level element <{}>",
                    element.name
                )))
            }
        }
        Ok(())
    }

    /// Attribute value by name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, or `Malformed` if absent.
    pub fn require(&self, key: &str) -> AppResult<&str> {
        self.attr(key)
            .ok_or_else(|| IndiError::Malformed(format!("<{}> lacks '{}'", self.name, key)))
    }

    /// Children with the given tag name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text content with surrounding whitespace removed.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}
