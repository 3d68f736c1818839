use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use super::ManifestParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct XmlAttribute {
    /// Namespace URI, not the prefix
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum XmlEvent {
    Start {
        name: String,
        attributes: Vec<XmlAttribute>,
    },
    End,
}

/// A pull source of element events, implemented once per manifest encoding
pub(crate) trait XmlEventSource {
    /// Returns `None` at the end of the document
    fn next_event(&mut self) -> Result<Option<XmlEvent>, ManifestParseError>;
}

/// Plain text XML through quick-xml
pub(crate) struct TextEventSource<'a> {
    reader: NsReader<&'a [u8]>,
    buf: Vec<u8>,
    pending_end: bool,
}

impl<'a> TextEventSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: NsReader::from_reader(data),
            buf: Vec::new(),
            pending_end: false,
        }
    }

    fn start_event(&self, bs: &BytesStart) -> XmlEvent {
        let name = String::from_utf8_lossy(bs.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();

        for attr in bs.attributes() {
            let attr = match attr {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("skipping bad attribute on <{}>: {}", name, e);
                    continue;
                }
            };

            if attr.key.as_namespace_binding().is_some() {
                continue;
            }

            let (resolved, local) = self.reader.resolve_attribute(attr.key);
            let namespace = match resolved {
                ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
                _ => None,
            };
            let value = match attr.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(_) => match String::from_utf8_lossy(&attr.value) {
                    Cow::Owned(s) => s,
                    Cow::Borrowed(s) => String::from(s),
                },
            };

            attributes.push(XmlAttribute {
                namespace,
                name: String::from_utf8_lossy(local.as_ref()).into_owned(),
                value,
            });
        }

        XmlEvent::Start { name, attributes }
    }
}

impl XmlEventSource for TextEventSource<'_> {
    fn next_event(&mut self) -> Result<Option<XmlEvent>, ManifestParseError> {
        if self.pending_end {
            self.pending_end = false;
            return Ok(Some(XmlEvent::End));
        }

        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| ManifestParseError::Malformed(e.to_string()))?;

            match event {
                Event::Start(bs) => {
                    let bs = bs.into_owned();
                    return Ok(Some(self.start_event(&bs)));
                }
                Event::Empty(bs) => {
                    let bs = bs.into_owned();
                    self.pending_end = true;
                    return Ok(Some(self.start_event(&bs)));
                }
                Event::End(_) => return Ok(Some(XmlEvent::End)),
                Event::Eof => return Ok(None),
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn collect(xml: &str) -> Vec<XmlEvent> {
        let mut src = TextEventSource::new(xml.as_bytes());
        let mut events = Vec::new();
        while let Some(ev) = src.next_event().expect("valid xml") {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_namespaces_are_resolved() {
        let events = collect(
            r#"<manifest xmlns:a="http://schemas.android.com/apk/res/android" package="p">
                <uses-permission a:name="android.permission.INTERNET" other:name="x" />
            </manifest>"#,
        );
        assert_eq!(events.len(), 4);
        match &events[1] {
            XmlEvent::Start { name, attributes } => {
                assert_eq!(name, "uses-permission");
                assert_eq!(
                    attributes[0].namespace.as_deref(),
                    Some("http://schemas.android.com/apk/res/android")
                );
                assert_eq!(attributes[0].value, "android.permission.INTERNET");
                assert_eq!(attributes[1].namespace, None);
            }
            XmlEvent::End => panic!("expected start"),
        }
        assert_eq!(events[2], XmlEvent::End);
    }

    #[test]
    fn test_malformed_xml() {
        let mut src = TextEventSource::new(b"<manifest><application></manifest>");
        let mut result = Ok(None);
        for _ in 0..4 {
            result = src.next_event();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(ManifestParseError::Malformed(_))));
    }
}
