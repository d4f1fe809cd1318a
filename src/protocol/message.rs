//! Minimal DNS message handling.
//!
//! Only the header and the question section are understood. That is enough
//! to build a probe query, recognise a reply to it, and produce the empty
//! "set reply" answer served by [`EchoHandler`](super::EchoHandler).

use thiserror::Error;

/// Length of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Record type A.
pub const QTYPE_A: u16 = 1;

/// Class IN.
pub const QCLASS_IN: u16 = 1;

const FLAG_QR: u16 = 0x8000;
const FLAG_RD: u16 = 0x0100;
const FLAG_CD: u16 = 0x0010;
const OPCODE_SHIFT: u16 = 11;
const OPCODE_MASK: u16 = 0x0F;
const RCODE_MASK: u16 = 0x000F;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// Errors produced while reading or writing a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("message is a query, expected a response")]
    NotAResponse,

    #[error("message is a response, expected a query")]
    NotAQuery,

    #[error("invalid label type {0:#04x}")]
    InvalidLabel(u8),

    #[error("label `{0}` exceeds 63 bytes")]
    LabelTooLong(String),

    #[error("domain name exceeds 255 bytes")]
    NameTooLong,

    #[error("domain name contains an empty label")]
    EmptyLabel,
}

/// The fixed 12-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl Header {
    /// Parse the header at the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, MessageError> {
        ensure_len(buf, HEADER_LEN)?;
        let word = |at: usize| u16::from_be_bytes([buf[at], buf[at + 1]]);
        Ok(Self {
            id: word(0),
            flags: word(2),
            qd_count: word(4),
            an_count: word(6),
            ns_count: word(8),
            ar_count: word(10),
        })
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags >> OPCODE_SHIFT) & OPCODE_MASK) as u8
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & RCODE_MASK) as u8
    }

    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }

    fn write(&self, out: &mut Vec<u8>) {
        for word in [
            self.id,
            self.flags,
            self.qd_count,
            self.an_count,
            self.ns_count,
            self.ar_count,
        ] {
            out.extend_from_slice(&word.to_be_bytes());
        }
    }
}

/// Build a standard query for `name` with a single question.
pub fn build_query(id: u16, name: &str, qtype: u16) -> Result<Vec<u8>, MessageError> {
    let mut out = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    Header {
        id,
        flags: FLAG_RD,
        qd_count: 1,
        an_count: 0,
        ns_count: 0,
        ar_count: 0,
    }
    .write(&mut out);
    encode_name(name, &mut out)?;
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&QCLASS_IN.to_be_bytes());
    Ok(out)
}

/// Build an empty successful reply to `request`.
///
/// The reply keeps the request ID and opcode, copies RD and CD for standard
/// queries, carries the first question (if any) and no records.
pub fn build_reply(request: &[u8]) -> Result<Vec<u8>, MessageError> {
    let header = Header::parse(request)?;
    if header.is_response() {
        return Err(MessageError::NotAQuery);
    }

    let mut flags = FLAG_QR | (u16::from(header.opcode()) << OPCODE_SHIFT);
    if header.opcode() == 0 {
        flags |= header.flags & (FLAG_RD | FLAG_CD);
    }

    let question = if header.qd_count > 0 {
        let end = question_end(request, HEADER_LEN)?;
        &request[HEADER_LEN..end]
    } else {
        &[][..]
    };

    let mut out = Vec::with_capacity(HEADER_LEN + question.len());
    Header {
        id: header.id,
        flags,
        qd_count: u16::from(!question.is_empty()),
        an_count: 0,
        ns_count: 0,
        ar_count: 0,
    }
    .write(&mut out);
    out.extend_from_slice(question);
    Ok(out)
}

/// Parse the header of `reply`, requiring the QR bit.
pub fn parse_reply(reply: &[u8]) -> Result<Header, MessageError> {
    let header = Header::parse(reply)?;
    if !header.is_response() {
        return Err(MessageError::NotAResponse);
    }
    Ok(header)
}

/// Check that `name` encodes as a valid domain name.
pub fn validate_name(name: &str) -> Result<(), MessageError> {
    encode_name(name, &mut Vec::new())
}

fn encode_name(name: &str, out: &mut Vec<u8>) -> Result<(), MessageError> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    let start = out.len();
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(MessageError::EmptyLabel);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(MessageError::LabelTooLong(label.to_string()));
            }
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    if out.len() - start > MAX_NAME_LEN {
        out.truncate(start);
        return Err(MessageError::NameTooLong);
    }
    Ok(())
}

/// Offset just past the question starting at `offset`.
fn question_end(buf: &[u8], mut offset: usize) -> Result<usize, MessageError> {
    loop {
        ensure_len(buf, offset + 1)?;
        let len = buf[offset];
        match len & 0xC0 {
            0x00 if len == 0 => {
                offset += 1;
                break;
            }
            0x00 => offset += 1 + usize::from(len),
            // A compression pointer terminates the name.
            0xC0 => {
                offset += 2;
                break;
            }
            _ => return Err(MessageError::InvalidLabel(len)),
        }
    }
    // QTYPE + QCLASS
    ensure_len(buf, offset + 4)?;
    Ok(offset + 4)
}

fn ensure_len(buf: &[u8], needed: usize) -> Result<(), MessageError> {
    if buf.len() < needed {
        return Err(MessageError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}
