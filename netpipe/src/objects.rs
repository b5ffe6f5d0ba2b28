use crate::chunk::{ChunkReader, ChunkSink, ChunkWriter};

pub const OBJECT_TAG_BASE: u8 = 0;
pub const OBJECT_TAG_FRAME: u8 = 1;
pub const OBJECT_TAG_BUFFER: u8 = 2;

/// A media frame: opaque user properties plus separately-encoded video and audio payloads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub user_props: String,
    pub video_data: Vec<u8>,
    pub audio_data: Vec<u8>,
}

/// A flagged byte blob with no further structure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Buffer {
    pub flags: u32,
    pub data: Vec<u8>,
}

/// The polymorphic payload carried by a Data record: a tagged union dispatched by object type, so
/// a receiver can read the type tag before committing to a concrete shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeObject {
    Base,
    Frame(Frame),
    Buffer(Buffer),
}

impl PipeObject {
    pub fn object_tag(&self) -> u8 {
        match self {
            PipeObject::Base => OBJECT_TAG_BASE,
            PipeObject::Frame(_) => OBJECT_TAG_FRAME,
            PipeObject::Buffer(_) => OBJECT_TAG_BUFFER,
        }
    }

    /// Write the object-type tag followed by this variant's fields, each as its own chunk.
    pub fn write<S: ChunkSink>(&self, writer: &mut ChunkWriter<S>) -> bool {
        if !writer.write(&self.object_tag()) {
            return false;
        }

        match self {
            PipeObject::Base => true,
            PipeObject::Frame(frame) => {
                writer.write(&frame.user_props) && writer.write(&frame.video_data) && writer.write(&frame.audio_data)
            }
            PipeObject::Buffer(buffer) => writer.write(&buffer.flags) && writer.write(&buffer.data),
        }
    }

    /// Read the object-type tag and dispatch to the matching variant's fields. `None` on a
    /// truncated stream or an unrecognized object tag.
    pub fn read(reader: &mut ChunkReader) -> Option<PipeObject> {
        let tag = reader.read::<u8>()?;
        match tag {
            OBJECT_TAG_BASE => Some(PipeObject::Base),
            OBJECT_TAG_FRAME => {
                let user_props = reader.read::<String>()?;
                let video_data = reader.read::<Vec<u8>>()?;
                let audio_data = reader.read::<Vec<u8>>()?;
                Some(PipeObject::Frame(Frame {
                    user_props,
                    video_data,
                    audio_data,
                }))
            }
            OBJECT_TAG_BUFFER => {
                let flags = reader.read::<u32>()?;
                let data = reader.read::<Vec<u8>>()?;
                Some(PipeObject::Buffer(Buffer { flags, data }))
            }
            _ => None,
        }
    }
}
