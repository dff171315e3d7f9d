//! TraCI wire format.
//!
//! # Framing
//!
//! ```text
//! message  := total_len:i32  command*            (total_len includes itself)
//! command  := len:u8 id:u8 content               (len <= 255, includes len+id)
//!           | 0:u8 len:i32 id:u8 content         (extended, len includes header)
//! status   := len id result:u8 description:string
//! string   := n:i32 bytes[n]
//! ```
//!
//! All integers and doubles are big-endian.

use trajgen_env::SimError;

// Commands
pub const CMD_GETVERSION: u8 = 0x00;
pub const CMD_SIMSTEP: u8 = 0x02;
pub const CMD_CLOSE: u8 = 0x7F;
pub const CMD_GET_VEHICLE_VARIABLE: u8 = 0xa4;
pub const CMD_GET_EDGE_VARIABLE: u8 = 0xaa;
pub const CMD_SET_VEHICLE_VARIABLE: u8 = 0xc4;

/// A get command is answered with `command id + RESPONSE_OFFSET`.
pub const RESPONSE_OFFSET: u8 = 0x10;

// Variables
pub const ID_LIST: u8 = 0x00;
pub const CMD_CHANGELANE: u8 = 0x13;
pub const VAR_SPEED: u8 = 0x40;
pub const VAR_MAXSPEED: u8 = 0x41;
pub const VAR_POSITION: u8 = 0x42;
pub const VAR_ROAD_ID: u8 = 0x50;
pub const VAR_LANE_ID: u8 = 0x51;
pub const VAR_LANE_INDEX: u8 = 0x52;
pub const VAR_EDGES: u8 = 0x54;
pub const VAR_ROUTE: u8 = 0x57;
pub const VAR_WAITING_TIME: u8 = 0x7a;

// Value types
pub const POSITION_2D: u8 = 0x01;
pub const TYPE_UBYTE: u8 = 0x07;
pub const TYPE_BYTE: u8 = 0x08;
pub const TYPE_INTEGER: u8 = 0x09;
pub const TYPE_DOUBLE: u8 = 0x0B;
pub const TYPE_STRING: u8 = 0x0C;
pub const TYPE_STRINGLIST: u8 = 0x0E;
pub const TYPE_COMPOUND: u8 = 0x0F;

// Status results
pub const RTYPE_OK: u8 = 0x00;
pub const RTYPE_NOTIMPLEMENTED: u8 = 0x01;
pub const RTYPE_ERR: u8 = 0xFF;

/// A typed TraCI value.
#[derive(Debug, Clone, PartialEq)]
pub enum TraciValue {
    UByte(u8),
    Byte(i8),
    Int(i32),
    Double(f64),
    String(String),
    StringList(Vec<String>),
    Position2D(f64, f64),
    Compound(Vec<TraciValue>),
}

impl TraciValue {
    fn type_name(&self) -> &'static str {
        match self {
            TraciValue::UByte(_) => "ubyte",
            TraciValue::Byte(_) => "byte",
            TraciValue::Int(_) => "int",
            TraciValue::Double(_) => "double",
            TraciValue::String(_) => "string",
            TraciValue::StringList(_) => "stringlist",
            TraciValue::Position2D(..) => "position2d",
            TraciValue::Compound(_) => "compound",
        }
    }

    pub fn as_f64(&self) -> Result<f64, SimError> {
        match self {
            TraciValue::Double(v) => Ok(*v),
            TraciValue::Int(v) => Ok(*v as f64),
            other => Err(unexpected("double", other)),
        }
    }

    pub fn as_i32(&self) -> Result<i32, SimError> {
        match self {
            TraciValue::Int(v) => Ok(*v),
            TraciValue::UByte(v) => Ok(*v as i32),
            TraciValue::Byte(v) => Ok(*v as i32),
            other => Err(unexpected("int", other)),
        }
    }

    pub fn into_string(self) -> Result<String, SimError> {
        match self {
            TraciValue::String(s) => Ok(s),
            other => Err(unexpected("string", &other)),
        }
    }

    pub fn into_string_list(self) -> Result<Vec<String>, SimError> {
        match self {
            TraciValue::StringList(list) => Ok(list),
            other => Err(unexpected("stringlist", &other)),
        }
    }

    pub fn as_position(&self) -> Result<(f64, f64), SimError> {
        match self {
            TraciValue::Position2D(x, y) => Ok((*x, *y)),
            other => Err(unexpected("position2d", other)),
        }
    }
}

fn unexpected(wanted: &str, got: &TraciValue) -> SimError {
    SimError::Protocol(format!("expected {}, got {}", wanted, got.type_name()))
}

/// Big-endian byte writer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.i32(s.len() as i32);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn string_list(&mut self, list: &[String]) -> &mut Self {
        self.i32(list.len() as i32);
        for s in list {
            self.string(s);
        }
        self
    }

    /// Writes a value with its type tag.
    pub fn value(&mut self, value: &TraciValue) -> &mut Self {
        match value {
            TraciValue::UByte(v) => self.u8(TYPE_UBYTE).u8(*v),
            TraciValue::Byte(v) => self.u8(TYPE_BYTE).u8(*v as u8),
            TraciValue::Int(v) => self.u8(TYPE_INTEGER).i32(*v),
            TraciValue::Double(v) => self.u8(TYPE_DOUBLE).f64(*v),
            TraciValue::String(s) => self.u8(TYPE_STRING).string(s),
            TraciValue::StringList(list) => self.u8(TYPE_STRINGLIST).string_list(list),
            TraciValue::Position2D(x, y) => self.u8(POSITION_2D).f64(*x).f64(*y),
            TraciValue::Compound(items) => {
                self.u8(TYPE_COMPOUND).i32(items.len() as i32);
                for item in items {
                    self.value(item);
                }
                self
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// One command: id plus already-encoded content.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: u8,
    pub content: Vec<u8>,
}

impl Command {
    pub fn new(id: u8, content: Encoder) -> Self {
        Self {
            id,
            content: content.into_bytes(),
        }
    }

    pub fn empty(id: u8) -> Self {
        Self {
            id,
            content: Vec::new(),
        }
    }

    /// `getVariable` request for one object.
    pub fn get(domain: u8, variable: u8, object: &str) -> Self {
        let mut content = Encoder::new();
        content.u8(variable).string(object);
        Self::new(domain, content)
    }

    /// `setVariable` request for one object.
    pub fn set(domain: u8, variable: u8, object: &str, value: &TraciValue) -> Self {
        let mut content = Encoder::new();
        content.u8(variable).string(object).value(value);
        Self::new(domain, content)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let short_len = self.content.len() + 2;
        if short_len <= u8::MAX as usize {
            out.push(short_len as u8);
        } else {
            out.push(0);
            out.extend_from_slice(&((self.content.len() + 6) as i32).to_be_bytes());
        }
        out.push(self.id);
        out.extend_from_slice(&self.content);
    }
}

/// Frames commands into one message, length prefix included.
pub fn encode_message(commands: &[Command]) -> Vec<u8> {
    let mut body = Vec::new();
    for command in commands {
        command.encode_into(&mut body);
    }
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Big-endian reader over a received message body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SimError> {
        if self.remaining() < n {
            return Err(SimError::Protocol(format!(
                "truncated message: wanted {} bytes at {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SimError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, SimError> {
        Ok(self.take(1)?[0])
    }

    pub fn i32(&mut self) -> Result<i32, SimError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64, SimError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    fn count(&mut self) -> Result<usize, SimError> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| SimError::Protocol(format!("negative length {}", n)))
    }

    pub fn string(&mut self) -> Result<String, SimError> {
        let n = self.count()?;
        let bytes = self.take(n)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SimError::Protocol(format!("invalid utf-8 in string: {}", e)))
    }

    pub fn string_list(&mut self) -> Result<Vec<String>, SimError> {
        let n = self.count()?;
        (0..n).map(|_| self.string()).collect()
    }

    /// Reads a type tag and the value that follows.
    pub fn value(&mut self) -> Result<TraciValue, SimError> {
        let tag = self.u8()?;
        Ok(match tag {
            TYPE_UBYTE => TraciValue::UByte(self.u8()?),
            TYPE_BYTE => TraciValue::Byte(self.u8()? as i8),
            TYPE_INTEGER => TraciValue::Int(self.i32()?),
            TYPE_DOUBLE => TraciValue::Double(self.f64()?),
            TYPE_STRING => TraciValue::String(self.string()?),
            TYPE_STRINGLIST => TraciValue::StringList(self.string_list()?),
            POSITION_2D => TraciValue::Position2D(self.f64()?, self.f64()?),
            TYPE_COMPOUND => {
                let n = self.count()?;
                TraciValue::Compound((0..n).map(|_| self.value()).collect::<Result<_, _>>()?)
            }
            other => {
                return Err(SimError::Protocol(format!("unknown type tag 0x{:02x}", other)))
            }
        })
    }

    /// Reads a command header, returning `(id, content length)`.
    pub fn command_header(&mut self) -> Result<(u8, usize), SimError> {
        let short = self.u8()? as usize;
        let (len, header) = if short == 0 {
            (self.count()?, 6)
        } else {
            (short, 2)
        };
        let id = self.u8()?;
        let content = len
            .checked_sub(header)
            .ok_or_else(|| SimError::Protocol(format!("command length {} too short", len)))?;
        Ok((id, content))
    }

    /// Reads a status response for `expected`.
    pub fn status(&mut self, expected: u8) -> Result<Status, SimError> {
        let (id, _) = self.command_header()?;
        if id != expected {
            return Err(SimError::Protocol(format!(
                "status for command 0x{:02x}, expected 0x{:02x}",
                id, expected
            )));
        }
        let result = self.u8()?;
        let description = self.string()?;
        Ok(Status {
            result,
            description,
        })
    }

    /// Reads a get-variable response, checking its ids.
    pub fn variable_response(
        &mut self,
        response: u8,
        variable: u8,
        object: &str,
    ) -> Result<TraciValue, SimError> {
        let (id, _) = self.command_header()?;
        let var = self.u8()?;
        let obj = self.string()?;
        if id != response || var != variable || obj != object {
            return Err(SimError::Protocol(format!(
                "response 0x{:02x}/0x{:02x} for '{}' does not match request 0x{:02x}/0x{:02x} for '{}'",
                id, var, obj, response, variable, object
            )));
        }
        self.value()
    }
}

/// Result part of a status response.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub result: u8,
    pub description: String,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        self.result == RTYPE_OK
    }

    /// Human-readable failure text.
    pub fn failure(&self) -> String {
        match self.result {
            RTYPE_NOTIMPLEMENTED => format!("not implemented: {}", self.description),
            RTYPE_ERR => self.description.clone(),
            other => format!("status 0x{:02x}: {}", other, self.description),
        }
    }
}
