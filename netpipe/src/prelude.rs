pub use crate::config::{Hints, PipeConfig};
pub use crate::error::{PipeError, PipeResult};
pub use crate::objects::{Buffer, Frame, PipeObject};
pub use crate::pipe::Pipe;
