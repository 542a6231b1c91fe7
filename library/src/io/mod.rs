//! Chunked binary streams used to save and restore parts of a scene graph.
//!
//! A stream starts with a magic tag and a format version. Everything after that is a sequence
//! of values and chunks. A chunk is `id: u32`, `length: u32`, `length` payload bytes and an end
//! marker, all little endian. Values inside chunks are encoded with `bincode`.

pub mod registry;

pub use registry::{ClassRegistry, ModifierClass, ObjectClass};

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::LibraryError;
use crate::reference::ObjectId;

pub const STREAM_MAGIC: &[u8; 8] = b"SCNPIPE\0";
pub const FORMAT_VERSION: u32 = 1;
pub const CHUNK_END_MARKER: u32 = 0x454E_4443;

pub const OBJECT_CHUNK: u32 = 0x0100;
pub const PAYLOAD_CHUNK: u32 = 0x0101;
pub const MODIFIER_CHUNK: u32 = 0x0200;

pub struct ObjectSaveStream {
    // Innermost open chunk last; the first buffer is the stream body.
    chunks: Vec<(u32, Vec<u8>)>,
    pointers: HashMap<ObjectId, u64>,
}

impl ObjectSaveStream {
    pub fn new() -> Self {
        let mut body = Vec::with_capacity(64);
        body.extend_from_slice(STREAM_MAGIC);
        body.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        Self {
            chunks: vec![(0, body)],
            pointers: HashMap::new(),
        }
    }

    fn buffer(&mut self) -> &mut Vec<u8> {
        // The body buffer is never popped.
        let last = self.chunks.len() - 1;
        &mut self.chunks[last].1
    }

    pub fn begin_chunk(&mut self, id: u32) {
        self.chunks.push((id, Vec::new()));
    }

    pub fn end_chunk(&mut self) -> Result<(), LibraryError> {
        if self.chunks.len() < 2 {
            return Err(LibraryError::malformed("end_chunk without open chunk"));
        }
        let Some((id, payload)) = self.chunks.pop() else {
            return Err(LibraryError::malformed("end_chunk without open chunk"));
        };
        let length = u32::try_from(payload.len())
            .map_err(|_| LibraryError::malformed(format!("chunk {:#x} exceeds 4 GiB", id)))?;
        let out = self.buffer();
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&CHUNK_END_MARKER.to_le_bytes());
        Ok(())
    }

    pub fn write_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), LibraryError> {
        bincode::serialize_into(self.buffer(), value)?;
        Ok(())
    }

    /// Returns the pointer id of `object` and whether this is its first occurrence.
    pub(crate) fn pointer_for(&mut self, object: ObjectId) -> (u64, bool) {
        let next = self.pointers.len() as u64 + 1;
        match self.pointers.get(&object) {
            Some(id) => (*id, false),
            None => {
                self.pointers.insert(object, next);
                (next, true)
            }
        }
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>, LibraryError> {
        if self.chunks.len() != 1 {
            return Err(LibraryError::malformed(format!(
                "{} chunk(s) still open",
                self.chunks.len() - 1
            )));
        }
        Ok(std::mem::take(self.buffer()))
    }
}

impl Default for ObjectSaveStream {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ObjectLoadStream {
    data: Vec<u8>,
    pos: usize,
    // (chunk id, end offset of its payload)
    chunks: Vec<(u32, usize)>,
    pointers: HashMap<u64, ObjectId>,
    inserted: Vec<ObjectId>,
}

impl ObjectLoadStream {
    pub fn new(data: Vec<u8>) -> Result<Self, LibraryError> {
        let header_len = STREAM_MAGIC.len() + 4;
        if data.len() < header_len || &data[..STREAM_MAGIC.len()] != STREAM_MAGIC {
            return Err(LibraryError::malformed("not a scene stream"));
        }
        let mut stream = Self {
            data,
            pos: STREAM_MAGIC.len(),
            chunks: Vec::new(),
            pointers: HashMap::new(),
            inserted: Vec::new(),
        };
        let version = stream.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(LibraryError::malformed(format!(
                "unsupported format version {}",
                version
            )));
        }
        Ok(stream)
    }

    fn limit(&self) -> usize {
        self.chunks.last().map_or(self.data.len(), |(_, end)| *end)
    }

    fn read_u32(&mut self) -> Result<u32, LibraryError> {
        let end = self.pos + 4;
        if end > self.limit() {
            return Err(LibraryError::malformed("unexpected end of data"));
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Enters the next chunk and returns its id.
    pub fn open_chunk(&mut self) -> Result<u32, LibraryError> {
        let id = self.read_u32()?;
        let length = self.read_u32()? as usize;
        let end = self
            .pos
            .checked_add(length)
            .filter(|end| *end <= self.limit())
            .ok_or_else(|| LibraryError::malformed(format!("chunk {:#x} overruns its parent", id)))?;
        self.chunks.push((id, end));
        Ok(id)
    }

    pub fn expect_chunk(&mut self, expected: u32) -> Result<(), LibraryError> {
        let id = self.open_chunk()?;
        if id != expected {
            return Err(LibraryError::malformed(format!(
                "expected chunk {:#x}, found {:#x}",
                expected, id
            )));
        }
        Ok(())
    }

    /// Leaves the current chunk, skipping whatever part of it was not read.
    pub fn close_chunk(&mut self) -> Result<(), LibraryError> {
        let (id, end) = self
            .chunks
            .pop()
            .ok_or_else(|| LibraryError::malformed("close_chunk without open chunk"))?;
        self.pos = end;
        if self.read_u32()? != CHUNK_END_MARKER {
            return Err(LibraryError::malformed(format!("chunk {:#x} is not terminated", id)));
        }
        Ok(())
    }

    pub fn read_value<T: DeserializeOwned>(&mut self) -> Result<T, LibraryError> {
        let limit = self.limit();
        let mut slice = &self.data[self.pos..limit];
        let value = bincode::deserialize_from(&mut slice)?;
        self.pos = limit - slice.len();
        Ok(value)
    }

    pub(crate) fn resolve_pointer(&self, pointer: u64) -> Option<ObjectId> {
        self.pointers.get(&pointer).copied()
    }

    pub(crate) fn register_pointer(&mut self, pointer: u64, object: ObjectId) {
        self.pointers.insert(pointer, object);
    }

    pub(crate) fn record_inserted(&mut self, object: ObjectId) {
        self.inserted.push(object);
    }

    pub(crate) fn take_inserted(&mut self) -> Vec<ObjectId> {
        std::mem::take(&mut self.inserted)
    }

    pub fn is_at_end(&self) -> bool {
        self.chunks.is_empty() && self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_chunks_round_trip() {
        let mut out = ObjectSaveStream::new();
        out.begin_chunk(7);
        out.write_value("outer").unwrap();
        out.begin_chunk(8);
        out.write_value(&vec![1.5_f64, 2.5]).unwrap();
        out.end_chunk().unwrap();
        out.write_value(&42_u32).unwrap();
        out.end_chunk().unwrap();
        let bytes = out.into_bytes().unwrap();

        let mut input = ObjectLoadStream::new(bytes).unwrap();
        input.expect_chunk(7).unwrap();
        assert_eq!(input.read_value::<String>().unwrap(), "outer");
        input.expect_chunk(8).unwrap();
        assert_eq!(input.read_value::<Vec<f64>>().unwrap(), vec![1.5, 2.5]);
        input.close_chunk().unwrap();
        assert_eq!(input.read_value::<u32>().unwrap(), 42);
        input.close_chunk().unwrap();
        assert!(input.is_at_end());
    }

    #[test]
    fn close_chunk_skips_unread_data() {
        let mut out = ObjectSaveStream::new();
        out.begin_chunk(1);
        out.write_value(&[9_u8; 16]).unwrap();
        out.end_chunk().unwrap();
        out.write_value(&5_i32).unwrap();

        let mut input = ObjectLoadStream::new(out.into_bytes().unwrap()).unwrap();
        input.open_chunk().unwrap();
        input.close_chunk().unwrap();
        assert_eq!(input.read_value::<i32>().unwrap(), 5);
    }

    #[test]
    fn rejects_foreign_data() {
        assert!(matches!(
            ObjectLoadStream::new(b"not a stream at all".to_vec()),
            Err(LibraryError::MalformedStream(_))
        ));
    }

    #[test]
    fn detects_truncated_chunk() {
        let mut out = ObjectSaveStream::new();
        out.begin_chunk(1);
        out.write_value(&123_u64).unwrap();
        out.end_chunk().unwrap();
        let mut bytes = out.into_bytes().unwrap();
        bytes.truncate(bytes.len() - 6);

        let mut input = ObjectLoadStream::new(bytes).unwrap();
        assert!(input.open_chunk().is_err());
    }

    #[test]
    fn unbalanced_chunks_are_rejected() {
        let mut out = ObjectSaveStream::new();
        out.begin_chunk(1);
        assert!(out.into_bytes().is_err());
        assert!(ObjectSaveStream::new().end_chunk().is_err());
    }
}
