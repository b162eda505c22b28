use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

pub const DEFAULT_PORT: u16 = 8889;

/// Largest element count a response frame may announce before we consider it garbage.
///
/// Real controllers report a little over a thousand parameters; anything far beyond that is a
/// desynchronized stream rather than a table.
pub const MAX_ELEMENTS: i32 = 0x10000;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::IntoStaticStr,
    num_derive::FromPrimitive,
    num_derive::ToPrimitive,
)]
#[strum(serialize_all = "kebab-case")]
#[repr(i32)]
pub enum CommandCode {
    ParametersWrite = 3002,
    ParametersRead = 3003,
    CalculationsRead = 3004,
    VisibilitiesRead = 3005,
}

impl CommandCode {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        num_traits::FromPrimitive::from_i32(code)
    }

    pub const fn is_write(self) -> bool {
        matches!(self, Self::ParametersWrite)
    }

    const fn response_shape(self) -> Shape {
        match self {
            Self::ParametersWrite => Shape::Acknowledgement,
            Self::ParametersRead => Shape::Table { status_word: false, width: ElementWidth::Word },
            Self::CalculationsRead => Shape::Table { status_word: true, width: ElementWidth::Word },
            Self::VisibilitiesRead => Shape::Table { status_word: false, width: ElementWidth::Flag },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementWidth {
    /// Big-endian signed 32-bit integer.
    Word,
    /// A single byte, 0 or 1.
    Flag,
}

impl ElementWidth {
    pub const fn bytes(self) -> usize {
        match self {
            Self::Word => 4,
            Self::Flag => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    /// `[echo][status]?[length][element; length]`
    Table { status_word: bool, width: ElementWidth },
    /// `[echo][value]`
    Acknowledgement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub code: CommandCode,
    pub payload: Vec<i32>,
}

impl Request {
    pub fn new(code: CommandCode, payload: Vec<i32>) -> Self {
        Self { code, payload }
    }

    /// A table read. The firmware expects a single zero argument word after the command.
    pub fn read(code: CommandCode) -> Self {
        Self { code, payload: vec![0] }
    }

    pub fn write_parameter(id: i32, value: i32) -> Self {
        Self::write_parameters(&[(id, value)])
    }

    /// One frame carrying every `(id, value)` pair, interleaved.
    pub fn write_parameters(pairs: &[(i32, i32)]) -> Self {
        let payload = pairs.iter().flat_map(|&(id, value)| [id, value]).collect();
        Self { code: CommandCode::ParametersWrite, payload }
    }

    pub fn encoded_len(&self) -> usize {
        4 * (1 + self.payload.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: CommandCode,
    /// Only calculation reads carry a status word. Nothing interprets it yet.
    pub status: Option<i32>,
    pub values: Vec<i32>,
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("controller answered with command {received} while {expected} was awaited")]
    CommandMismatch { expected: CommandCode, received: i32 },
    #[error("{0} response announces a negative element count ({1})")]
    NegativeLength(CommandCode, i32),
    #[error("{0} response announces {1} elements, more than the {max} we accept", max = MAX_ELEMENTS)]
    TooLong(CommandCode, i32),
    #[error("received {0} bytes while no response was awaited")]
    Unsolicited(usize),
    #[error("transport failure")]
    Io(#[from] std::io::Error),
}

/// Codec for the controller's framed command protocol.
///
/// Responses are not self-describing: their layout depends on the command that was sent. Call
/// [`LuxtronikCodec::await_response`] before sending a request so that the decoder knows which
/// shape to expect. The decoder leaves the buffer untouched until a whole frame has arrived, so
/// fragmented TCP reads are never misparsed.
#[derive(Debug, Default)]
pub struct LuxtronikCodec {
    awaiting: Option<CommandCode>,
}

impl LuxtronikCodec {
    pub fn await_response(&mut self, code: CommandCode) {
        self.awaiting = Some(code);
    }

    pub fn awaiting(&self) -> Option<CommandCode> {
        self.awaiting
    }
}

fn word_at(src: &[u8], offset: usize) -> Option<i32> {
    let (word, _) = src.get(offset..)?.split_first_chunk::<4>()?;
    Some(i32::from_be_bytes(*word))
}

fn words(mut bs: &[u8]) -> impl Iterator<Item = i32> {
    std::iter::from_fn(move || {
        let (v, remainder) = bs.split_first_chunk::<4>()?;
        bs = remainder;
        Some(i32::from_be_bytes(*v))
    })
}

impl Encoder<&Request> for LuxtronikCodec {
    type Error = FrameError;
    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(req.encoded_len());
        dst.extend(req.code.code().to_be_bytes());
        for value in &req.payload {
            dst.extend(value.to_be_bytes());
        }
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for LuxtronikCodec {
    type Item = Response;
    type Error = FrameError;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(code) = self.awaiting else {
            if src.is_empty() {
                return Ok(None);
            }
            return Err(FrameError::Unsolicited(src.len()));
        };
        trace!(message = "attempt at decoding", %code, buffer = ?src);
        let Some(echo) = word_at(src, 0) else {
            return Ok(None);
        };
        if echo != code.code() {
            return Err(FrameError::CommandMismatch { expected: code, received: echo });
        }
        let (status_word, width) = match code.response_shape() {
            Shape::Acknowledgement => {
                let Some(value) = word_at(src, 4) else {
                    return Ok(None);
                };
                src.advance(8);
                self.awaiting = None;
                return Ok(Some(Response { code, status: None, values: vec![value] }));
            }
            Shape::Table { status_word, width } => (status_word, width),
        };
        let mut offset = 4;
        let status = if status_word {
            let Some(status) = word_at(src, offset) else {
                return Ok(None);
            };
            offset += 4;
            Some(status)
        } else {
            None
        };
        let Some(length) = word_at(src, offset) else {
            return Ok(None);
        };
        offset += 4;
        if length > MAX_ELEMENTS {
            return Err(FrameError::TooLong(code, length));
        }
        let Ok(count) = usize::try_from(length) else {
            return Err(FrameError::NegativeLength(code, length));
        };
        let frame_len = offset + count * width.bytes();
        let Some(elements) = src.get(offset..frame_len) else {
            src.reserve(frame_len - src.len());
            return Ok(None);
        };
        let values: Vec<i32> = match width {
            ElementWidth::Word => words(elements).collect(),
            ElementWidth::Flag => elements.iter().map(|&flag| i32::from(flag)).collect(),
        };
        src.advance(frame_len);
        self.awaiting = None;
        trace!(message = "decoded a response", %code, ?status, count);
        Ok(Some(Response { code, status, values }))
    }
}
