//! Pull parser for the compiled XML format used for `AndroidManifest.xml`
//! inside APK archives.

use super::events::{XmlAttribute, XmlEvent, XmlEventSource};
use super::{ManifestParseError, ANDROID_NS};

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;
const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
const RES_XML_CDATA_TYPE: u16 = 0x0104;

const NO_ENTRY_INDEX: u32 = 0xFFFF_FFFF;
const STRING_FLAG_UTF8: u32 = 0x0000_0100;
const STRING_POOL_HEADER_SIZE: u16 = 28;

const TYPE_NULL: u8 = 0x00;
const TYPE_REFERENCE: u8 = 0x01;
const TYPE_STRING: u8 = 0x03;
const TYPE_FLOAT: u8 = 0x04;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;
const TYPE_INT_BOOLEAN: u8 = 0x12;

/// Framework attribute ids for the handful of attributes the builder reads,
/// used when an obfuscated archive strips the attribute name strings
const KNOWN_ATTRIBUTE_IDS: &[(u32, &str)] = &[
    (0x0101_0003, "name"),
    (0x0101_0006, "permission"),
    (0x0101_000e, "enabled"),
    (0x0101_0010, "exported"),
    (0x0101_0011, "process"),
    (0x0101_0018, "authorities"),
    (0x0101_001c, "priority"),
    (0x0101_0024, "value"),
    (0x0101_0025, "resource"),
    (0x0101_020c, "minSdkVersion"),
    (0x0101_021b, "versionCode"),
    (0x0101_021c, "versionName"),
    (0x0101_0270, "targetSdkVersion"),
];

type Result<T> = std::result::Result<T, ManifestParseError>;

fn malformed<S: Into<String>>(msg: S) -> ManifestParseError {
    ManifestParseError::Malformed(msg.into())
}

/// Cheap check for the binary XML header
pub(crate) fn is_binary_xml(data: &[u8]) -> bool {
    data.len() >= 8 && u16::from_le_bytes([data[0], data[1]]) == RES_XML_TYPE
}

struct ChunkHeader {
    chunk_type: u16,
    header_size: u16,
    chunk_size: u32,
    start: usize,
}

impl ChunkHeader {
    fn end(&self) -> usize {
        self.start + self.chunk_size as usize
    }
}

struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self
            .pos
            .checked_add(N)
            .filter(|it| *it <= self.data.len())
            .ok_or_else(|| malformed("unexpected end of binary XML"))?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take::<2>()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(malformed("attempted to seek past end of document"));
        }
        self.pos = offset;
        Ok(())
    }

    fn read_chunk_header(&mut self) -> Result<ChunkHeader> {
        let start = self.pos;
        if self.remaining() < 8 {
            return Err(malformed("truncated chunk header"));
        }
        let chunk_type = self.read_u16()?;
        let header_size = self.read_u16()?;
        let chunk_size = self.read_u32()?;
        if chunk_size < u32::from(header_size) || header_size < 8 {
            return Err(malformed("invalid chunk sizing"));
        }
        let end = start
            .checked_add(chunk_size as usize)
            .ok_or_else(|| malformed("chunk size overflow"))?;
        if end > self.data.len() {
            return Err(malformed("chunk extends past end of document"));
        }
        Ok(ChunkHeader {
            chunk_type,
            header_size,
            chunk_size,
            start,
        })
    }
}

struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    fn parse(reader: &mut BinaryReader<'_>, header: &ChunkHeader) -> Result<Self> {
        if header.header_size < STRING_POOL_HEADER_SIZE {
            return Err(malformed("string pool header too small"));
        }
        let string_count = reader.read_u32()? as usize;
        let style_count = reader.read_u32()? as usize;
        let flags = reader.read_u32()?;
        let strings_start = reader.read_u32()? as usize;
        let _styles_start = reader.read_u32()?;

        let is_utf8 = (flags & STRING_FLAG_UTF8) != 0;
        let chunk_end = header.end();

        // Every offset takes 4 bytes, reject counts the chunk can't hold
        let room = chunk_end
            .checked_sub(header.start + header.header_size as usize)
            .ok_or_else(|| malformed("string pool header exceeds chunk"))?;
        if string_count.saturating_add(style_count).saturating_mul(4) > room {
            return Err(malformed("string pool counts exceed chunk"));
        }

        reader.seek(header.start + header.header_size as usize)?;
        let mut offsets = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            offsets.push(reader.read_u32()? as usize);
        }

        let base = header.start + strings_start;
        let mut strings = Vec::with_capacity(string_count);
        for offset in offsets {
            let at = base
                .checked_add(offset)
                .ok_or_else(|| malformed("string offset overflow"))?;
            strings.push(if is_utf8 {
                read_utf8_string(reader.data, at, chunk_end)?
            } else {
                read_utf16_string(reader.data, at, chunk_end)?
            });
        }

        Ok(Self { strings })
    }

    fn get(&self, idx: u32) -> Option<&str> {
        if idx == NO_ENTRY_INDEX {
            return None;
        }
        self.strings.get(idx as usize).map(|s| s.as_str())
    }
}

fn read_utf8_length(data: &[u8], offset: usize, limit: usize) -> Result<(usize, usize)> {
    if offset >= limit {
        return Err(malformed("invalid UTF-8 length offset"));
    }
    let first = data[offset];
    if (first & 0x80) == 0 {
        return Ok((first as usize, 1));
    }
    if offset + 1 >= limit {
        return Err(malformed("truncated UTF-8 length"));
    }
    let second = data[offset + 1];
    Ok(((((first & 0x7F) as usize) << 8) | second as usize, 2))
}

fn read_utf16_length(data: &[u8], offset: usize, limit: usize) -> Result<(usize, usize)> {
    if offset + 2 > limit {
        return Err(malformed("invalid UTF-16 length offset"));
    }
    let first = u16::from_le_bytes([data[offset], data[offset + 1]]);
    if (first & 0x8000) == 0 {
        return Ok((first as usize, 2));
    }
    if offset + 4 > limit {
        return Err(malformed("truncated UTF-16 length"));
    }
    let second = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
    Ok(((((first & 0x7FFF) as usize) << 16) | second as usize, 4))
}

fn read_utf8_string(data: &[u8], offset: usize, limit: usize) -> Result<String> {
    // UTF-8 pools store the UTF-16 length first, then the byte length
    let (_, char_len_size) = read_utf8_length(data, offset, limit)?;
    let mut cursor = offset + char_len_size;
    let (byte_len, byte_len_size) = read_utf8_length(data, cursor, limit)?;
    cursor += byte_len_size;
    if cursor + byte_len > limit {
        return Err(malformed("UTF-8 string exceeds chunk bounds"));
    }
    Ok(String::from_utf8_lossy(&data[cursor..cursor + byte_len]).into_owned())
}

fn read_utf16_string(data: &[u8], offset: usize, limit: usize) -> Result<String> {
    let (char_count, header_bytes) = read_utf16_length(data, offset, limit)?;
    let cursor = offset + header_bytes;
    let byte_len = char_count
        .checked_mul(2)
        .ok_or_else(|| malformed("UTF-16 length overflow"))?;
    if cursor + byte_len > limit {
        return Err(malformed("UTF-16 string exceeds chunk bounds"));
    }
    let units: Vec<u16> = data[cursor..cursor + byte_len]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// Render a typed attribute value the way the platform's string getter
/// would, leaving interpretation to the builder
fn decode_value(pool: &StringPool, raw_idx: u32, data_type: u8, data: u32) -> String {
    if let Some(raw) = pool.get(raw_idx) {
        return raw.to_string();
    }

    match data_type {
        TYPE_NULL => String::new(),
        TYPE_STRING => pool.get(data).map(String::from).unwrap_or_default(),
        TYPE_REFERENCE => format!("@0x{data:08x}"),
        TYPE_INT_BOOLEAN => String::from(if data != 0 { "true" } else { "false" }),
        TYPE_INT_DEC => (data as i32).to_string(),
        TYPE_INT_HEX => format!("0x{data:x}"),
        TYPE_FLOAT => f32::from_bits(data).to_string(),
        _ => format!("0x{data:x}"),
    }
}

pub(crate) struct BinaryEventSource<'a> {
    reader: BinaryReader<'a>,
    end: usize,
    pool: Option<StringPool>,
    resource_map: Vec<u32>,
}

impl<'a> BinaryEventSource<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        let header = reader.read_chunk_header()?;
        if header.chunk_type != RES_XML_TYPE {
            return Err(malformed("binary XML does not start with an XML chunk"));
        }
        reader.seek(header.start + header.header_size as usize)?;
        Ok(Self {
            end: header.end(),
            reader,
            pool: None,
            resource_map: Vec::new(),
        })
    }

    fn pool(&self) -> Result<&StringPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| malformed("element encountered before string pool"))
    }

    fn attribute_name(&self, name_idx: u32) -> Result<String> {
        let pool = self.pool()?;
        let name = pool.get(name_idx).unwrap_or_default();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
        let id = self.resource_map.get(name_idx as usize).copied();
        let known = id.and_then(|id| {
            KNOWN_ATTRIBUTE_IDS
                .iter()
                .find(|(known, _)| *known == id)
                .map(|(_, name)| *name)
        });
        Ok(known.unwrap_or_default().to_string())
    }

    /// Reads the attribute extension of a start element chunk, `ext_start`
    /// is the offset just past the chunk's node header
    fn read_start_element(&mut self, ext_start: usize) -> Result<XmlEvent> {
        self.reader.seek(ext_start)?;
        let _ns_idx = self.reader.read_u32()?;
        let name_idx = self.reader.read_u32()?;
        let attr_start = self.reader.read_u16()? as usize;
        let attr_size = self.reader.read_u16()? as usize;
        let attr_count = self.reader.read_u16()? as usize;

        let name = self
            .pool()?
            .get(name_idx)
            .ok_or_else(|| malformed("element references invalid string index"))?
            .to_string();

        if attr_size < 20 {
            return Err(malformed("attribute entries must be at least 20 bytes"));
        }

        let mut attributes = Vec::with_capacity(attr_count);
        for i in 0..attr_count {
            self.reader.seek(ext_start + attr_start + i * attr_size)?;
            let ns_idx = self.reader.read_u32()?;
            let name_idx = self.reader.read_u32()?;
            let raw_idx = self.reader.read_u32()?;
            let _size = self.reader.read_u16()?;
            let _res0 = self.reader.read_u8()?;
            let data_type = self.reader.read_u8()?;
            let data = self.reader.read_u32()?;

            let attr_name = self.attribute_name(name_idx)?;
            let pool = self.pool()?;
            let mut namespace = pool.get(ns_idx).map(String::from);
            // Stripped archives drop the namespace string along with the name
            if namespace.is_none() && pool.get(name_idx).unwrap_or_default().is_empty() {
                namespace = Some(ANDROID_NS.into());
            }

            attributes.push(XmlAttribute {
                namespace,
                name: attr_name,
                value: decode_value(pool, raw_idx, data_type, data),
            });
        }

        Ok(XmlEvent::Start { name, attributes })
    }
}

impl XmlEventSource for BinaryEventSource<'_> {
    fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        while self.reader.pos < self.end {
            let chunk = self.reader.read_chunk_header()?;
            let chunk_end = chunk.end();
            self.reader.seek(chunk.start + 8)?;

            let event = match chunk.chunk_type {
                RES_STRING_POOL_TYPE => {
                    self.pool = Some(StringPool::parse(&mut self.reader, &chunk)?);
                    None
                }
                RES_XML_RESOURCE_MAP_TYPE => {
                    self.reader.seek(chunk.start + chunk.header_size as usize)?;
                    let mut ids = Vec::new();
                    while self.reader.pos + 4 <= chunk_end {
                        ids.push(self.reader.read_u32()?);
                    }
                    self.resource_map = ids;
                    None
                }
                RES_XML_START_ELEMENT_TYPE => {
                    Some(self.read_start_element(chunk.start + chunk.header_size as usize)?)
                }
                RES_XML_END_ELEMENT_TYPE => Some(XmlEvent::End),
                RES_XML_START_NAMESPACE_TYPE | RES_XML_END_NAMESPACE_TYPE | RES_XML_CDATA_TYPE => {
                    None
                }
                other => {
                    log::trace!("skipping unknown binary XML chunk 0x{:04x}", other);
                    None
                }
            };

            if chunk.chunk_size == 0 {
                return Err(malformed("zero sized chunk"));
            }
            self.reader.seek(chunk_end)?;

            if event.is_some() {
                return Ok(event);
            }
        }
        Ok(None)
    }
}
