//! Wire codec
//!
//! Encodes/decodes `Command`/`Response` to the binary, length-prefixed wire
//! format: `[tag: u8][payload_len: u32 BE][payload]`.

use std::io::{Read, Write};

use crate::error::{FerrokvError, Result};

use super::{Command, CommandType, Response, Status};

const FRAME_HEADER_LEN: usize = 5; // tag(1) + payload_len(4)

fn read_u32_be(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < 4 {
        return Err(FerrokvError::Protocol("Incomplete length field".to_string()));
    }
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Split a 4-byte-length-prefixed chunk off the front of `bytes`, returning
/// (chunk, rest).
fn take_length_prefixed(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    if bytes.len() < 4 {
        return Err(FerrokvError::Protocol("Incomplete length prefix".to_string()));
    }
    let len = read_u32_be(bytes)? as usize;
    let rest = &bytes[4..];
    if rest.len() < len {
        return Err(FerrokvError::Protocol(format!(
            "Incomplete field: expected {} bytes, have {}",
            len,
            rest.len()
        )));
    }
    Ok((&rest[..len], &rest[len..]))
}

// =============================================================================
// Command payload encode/decode
// =============================================================================

fn encode_command_payload(command: &Command) -> Vec<u8> {
    let mut payload = Vec::new();
    match command {
        Command::Get { key } | Command::Delete { key } => {
            payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
            payload.extend_from_slice(key);
        }
        Command::Put { key, value } => {
            payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
            payload.extend_from_slice(key);
            payload.extend_from_slice(value);
        }
        Command::Ping => {}
        Command::BatchPut { keys, values } => {
            payload.extend_from_slice(&(keys.len() as u32).to_be_bytes());
            for (key, value) in keys.iter().zip(values.iter()) {
                payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
                payload.extend_from_slice(key);
                payload.extend_from_slice(&(value.len() as u32).to_be_bytes());
                payload.extend_from_slice(value);
            }
        }
        Command::Range { lo, hi } => {
            payload.extend_from_slice(&(lo.len() as u32).to_be_bytes());
            payload.extend_from_slice(lo);
            payload.extend_from_slice(&(hi.len() as u32).to_be_bytes());
            payload.extend_from_slice(hi);
        }
    }
    payload
}

fn decode_command_payload(command_type: CommandType, payload: &[u8]) -> Result<Command> {
    match command_type {
        CommandType::Get => {
            let (key, rest) = take_length_prefixed(payload)?;
            if !rest.is_empty() {
                return Err(FerrokvError::Protocol("GET: unexpected trailing bytes".to_string()));
            }
            Ok(Command::Get { key: key.to_vec() })
        }
        CommandType::Delete => {
            let (key, rest) = take_length_prefixed(payload)?;
            if !rest.is_empty() {
                return Err(FerrokvError::Protocol("DELETE: unexpected trailing bytes".to_string()));
            }
            Ok(Command::Delete { key: key.to_vec() })
        }
        CommandType::Put => {
            let (key, rest) = take_length_prefixed(payload)?;
            Ok(Command::Put {
                key: key.to_vec(),
                value: rest.to_vec(),
            })
        }
        CommandType::Ping => {
            if !payload.is_empty() {
                return Err(FerrokvError::Protocol(
                    "PING: unexpected payload".to_string(),
                ));
            }
            Ok(Command::Ping)
        }
        CommandType::BatchPut => {
            if payload.len() < 4 {
                return Err(FerrokvError::Protocol("BATCH_PUT: missing count".to_string()));
            }
            let count = read_u32_be(payload)? as usize;
            let mut rest = &payload[4..];
            let mut keys = Vec::with_capacity(count);
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                let (key, after_key) = take_length_prefixed(rest)?;
                let (value, after_value) = take_length_prefixed(after_key)?;
                keys.push(key.to_vec());
                values.push(value.to_vec());
                rest = after_value;
            }
            Ok(Command::BatchPut { keys, values })
        }
        CommandType::Range => {
            let (lo, rest) = take_length_prefixed(payload)?;
            let (hi, rest) = take_length_prefixed(rest)?;
            if !rest.is_empty() {
                return Err(FerrokvError::Protocol("RANGE: unexpected trailing bytes".to_string()));
            }
            Ok(Command::Range {
                lo: lo.to_vec(),
                hi: hi.to_vec(),
            })
        }
    }
}

fn command_tag(command_type: CommandType) -> u8 {
    command_type as u8
}

fn command_type_from_tag(tag: u8) -> Result<CommandType> {
    match tag {
        0x01 => Ok(CommandType::Get),
        0x02 => Ok(CommandType::Put),
        0x03 => Ok(CommandType::Delete),
        0x04 => Ok(CommandType::Ping),
        0x05 => Ok(CommandType::BatchPut),
        0x06 => Ok(CommandType::Range),
        other => Err(FerrokvError::Protocol(format!(
            "Unknown command type: 0x{:02x}",
            other
        ))),
    }
}

/// Encode a command to its full wire frame: `[tag][payload_len BE][payload]`.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let payload = encode_command_payload(command);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.push(command_tag(command.command_type()));
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Decode a command from a full in-memory wire frame.
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(FerrokvError::Protocol("Incomplete header".to_string()));
    }
    let command_type = command_type_from_tag(bytes[0])?;
    let payload_len = read_u32_be(&bytes[1..5])? as usize;
    let payload = &bytes[5..];
    if payload.len() < payload_len {
        return Err(FerrokvError::Protocol(format!(
            "Incomplete payload: expected {} bytes, have {}",
            payload_len,
            payload.len()
        )));
    }
    decode_command_payload(command_type, &payload[..payload_len])
}

// =============================================================================
// Response payload encode/decode
// =============================================================================

fn status_tag(status: Status) -> u8 {
    status as u8
}

fn status_from_tag(tag: u8) -> Result<Status> {
    match tag {
        0x00 => Ok(Status::Ok),
        0x01 => Ok(Status::NotFound),
        0x02 => Ok(Status::Error),
        other => Err(FerrokvError::Protocol(format!(
            "Unknown response status: 0x{:02x}",
            other
        ))),
    }
}

/// Encode a response to its full wire frame: `[status][payload_len BE][payload]`.
pub fn encode_response(response: &Response) -> Vec<u8> {
    let payload = response.payload.as_deref().unwrap_or(&[]);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.push(status_tag(response.status));
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decode a response from a full in-memory wire frame.
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(FerrokvError::Protocol("Incomplete header".to_string()));
    }
    let status = status_from_tag(bytes[0])?;
    let payload_len = read_u32_be(&bytes[1..5])? as usize;
    let payload = &bytes[5..];
    if payload.len() < payload_len {
        return Err(FerrokvError::Protocol(format!(
            "Incomplete payload: expected {} bytes, have {}",
            payload_len,
            payload.len()
        )));
    }
    let payload = if payload_len == 0 {
        None
    } else {
        Some(payload[..payload_len].to_vec())
    };
    Ok(Response { status, payload })
}

// =============================================================================
// Stream I/O (for TCP connections)
// =============================================================================

/// Read exactly one command frame from a stream.
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header)?;
    let command_type = command_type_from_tag(header[0])?;
    let payload_len = read_u32_be(&header[1..5])? as usize;

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;

    decode_command_payload(command_type, &payload)
}

/// Write one command frame to a stream.
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let frame = encode_command(command);
    writer.write_all(&frame)?;
    Ok(())
}

/// Read exactly one response frame from a stream.
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header)?;
    let status = status_from_tag(header[0])?;
    let payload_len = read_u32_be(&header[1..5])? as usize;

    let payload = if payload_len == 0 {
        None
    } else {
        let mut buf = vec![0u8; payload_len];
        reader.read_exact(&mut buf)?;
        Some(buf)
    };

    Ok(Response { status, payload })
}

/// Write one response frame to a stream.
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let frame = encode_response(response);
    writer.write_all(&frame)?;
    Ok(())
}
