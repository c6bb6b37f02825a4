//! MySQL packet parser
//!
//! This module provides functions to read and write MySQL protocol packets.
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use super::packets::*;
use crate::error::{ProxyError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ============================================================================
// Packet Reading
// ============================================================================

/// Read a complete MySQL packet from a stream
///
/// Payloads of exactly 16MB - 1 continue in the next frame; those frames are
/// joined here. The returned header carries the total payload length and the
/// sequence id of the last frame.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(PacketHeader, Vec<u8>)> {
    let mut payload = Vec::new();
    loop {
        let mut header_buf = [0u8; 4];
        reader.read_exact(&mut header_buf).await?;

        // 3 bytes length (little-endian) + 1 byte sequence ID
        let frame_length = u32::from_le_bytes([header_buf[0], header_buf[1], header_buf[2], 0]);
        let sequence_id = header_buf[3];

        let start = payload.len();
        payload.resize(start + frame_length as usize, 0);
        reader.read_exact(&mut payload[start..]).await?;

        if frame_length < PacketHeader::MAX_PAYLOAD_LENGTH {
            let header = PacketHeader::new(payload.len() as u32, sequence_id);
            return Ok((header, payload));
        }
    }
}

/// Parse a HandshakeV10 packet from payload bytes
pub fn parse_handshake_v10(payload: &[u8]) -> Result<HandshakeV10> {
    let mut cursor = 0;

    if payload.is_empty() {
        return Err(ProxyError::Protocol("Empty handshake packet".into()));
    }
    if payload[0] == 0xFF {
        let err = parse_err_packet(payload, CLIENT_PROTOCOL_41)?;
        return Err(ProxyError::from_server(&err));
    }
    let protocol_version = payload[cursor];
    cursor += 1;

    if protocol_version != 10 {
        return Err(ProxyError::Protocol(format!(
            "Unsupported protocol version: {}",
            protocol_version
        )));
    }

    let (server_version, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
    cursor += bytes_read;

    let connection_id = read_u32_le(&payload[cursor..])?;
    cursor += 4;

    let mut auth_plugin_data_part_1 = [0u8; 8];
    auth_plugin_data_part_1.copy_from_slice(take(payload, cursor, 8)?);
    cursor += 8;

    // Filler (1 byte, always 0x00)
    cursor += 1;

    let capability_flags_lower = read_u16_le(take(payload, cursor, 2)?)?;
    cursor += 2;

    // The following fields might not be present in older servers
    let mut character_set = UTF8_GENERAL_CI;
    let mut status_flags = 0u16;
    let mut capability_flags_upper = 0u16;
    let mut auth_plugin_data_length = 0u8;
    let mut auth_plugin_data_part_2 = Vec::new();
    let mut auth_plugin_name = String::new();

    if cursor < payload.len() {
        let fixed = take(payload, cursor, 16)?;
        character_set = fixed[0];
        status_flags = read_u16_le(&fixed[1..3])?;
        capability_flags_upper = read_u16_le(&fixed[3..5])?;
        auth_plugin_data_length = fixed[5];
        // 10 reserved bytes follow
        cursor += 16;

        let combined_caps = (capability_flags_upper as u32) << 16 | capability_flags_lower as u32;
        if combined_caps & CLIENT_SECURE_CONNECTION != 0 {
            // Length is max(13, auth_plugin_data_length - 8)
            let part2_len = if auth_plugin_data_length > 8 {
                std::cmp::max(13, (auth_plugin_data_length - 8) as usize)
            } else {
                13
            };
            let actual_len = std::cmp::min(part2_len, payload.len() - cursor);
            auth_plugin_data_part_2 = payload[cursor..cursor + actual_len].to_vec();
            if auth_plugin_data_part_2.last() == Some(&0) {
                auth_plugin_data_part_2.pop();
            }
            cursor += actual_len;
        }

        if combined_caps & CLIENT_PLUGIN_AUTH != 0 && cursor < payload.len() {
            // Some servers omit the trailing null on the plugin name
            auth_plugin_name = match read_null_terminated_string(&payload[cursor..]) {
                Ok((name, _)) => name,
                Err(_) => String::from_utf8_lossy(&payload[cursor..]).to_string(),
            };
        }
    }

    Ok(HandshakeV10 {
        protocol_version,
        server_version,
        connection_id,
        auth_plugin_data_part_1,
        capability_flags_lower,
        character_set,
        status_flags,
        capability_flags_upper,
        auth_plugin_data_length,
        auth_plugin_data_part_2,
        auth_plugin_name,
    })
}

/// Check whether a client handshake payload is an SSLRequest.
///
/// An SSLRequest is the first 32 bytes of a HandshakeResponse41 with
/// `CLIENT_SSL` set and nothing after the reserved filler.
pub fn is_ssl_request(payload: &[u8]) -> bool {
    payload.len() == 32
        && read_u32_le(payload)
            .map(|caps| caps & CLIENT_SSL != 0)
            .unwrap_or(false)
}

/// Parse a HandshakeResponse41 packet from payload bytes
pub fn parse_handshake_response41(payload: &[u8]) -> Result<HandshakeResponse41> {
    let mut cursor = 0;

    let capability_flags = read_u32_le(payload)?;
    cursor += 4;

    if capability_flags & CLIENT_PROTOCOL_41 == 0 {
        return Err(ProxyError::Protocol(
            "Client does not support protocol 4.1".into(),
        ));
    }

    let max_packet_size = read_u32_le(&payload[cursor..])?;
    cursor += 4;

    let character_set = take(payload, cursor, 1)?[0];
    cursor += 1;

    // Reserved (23 bytes)
    take(payload, cursor, 23)?;
    cursor += 23;

    let (username, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
    cursor += bytes_read;

    let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        let (len, len_bytes) = read_length_encoded_int(&payload[cursor..])?;
        cursor += len_bytes;
        let data = take(payload, cursor, len as usize)?.to_vec();
        cursor += len as usize;
        data
    } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
        let len = take(payload, cursor, 1)?[0] as usize;
        cursor += 1;
        let data = take(payload, cursor, len)?.to_vec();
        cursor += len;
        data
    } else {
        let (data_str, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
        cursor += bytes_read;
        data_str.into_bytes()
    };

    let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && cursor < payload.len() {
        let (db, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
        cursor += bytes_read;
        Some(db).filter(|db| !db.is_empty())
    } else {
        None
    };

    let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && cursor < payload.len() {
        let (name, _) = read_null_terminated_string(&payload[cursor..])?;
        Some(name)
    } else {
        None
    };

    // Connection attributes are accepted but not interpreted

    Ok(HandshakeResponse41 {
        capability_flags,
        max_packet_size,
        character_set,
        username,
        auth_response,
        database,
        auth_plugin_name,
    })
}

/// Parse an OK packet from payload bytes
pub fn parse_ok_packet(payload: &[u8], capabilities: u32) -> Result<OkPacket> {
    let mut cursor = 0;

    let header = take(payload, cursor, 1)?[0];
    cursor += 1;

    if header != 0x00 && header != 0xFE {
        return Err(ProxyError::Protocol(format!(
            "Invalid OK packet header: 0x{:02X}",
            header
        )));
    }

    let (affected_rows, bytes_read) = read_length_encoded_int(&payload[cursor..])?;
    cursor += bytes_read;

    let (last_insert_id, bytes_read) = read_length_encoded_int(&payload[cursor..])?;
    cursor += bytes_read;

    let (status_flags, warnings) = if capabilities & CLIENT_PROTOCOL_41 != 0 {
        let status = read_u16_le(&payload[cursor..])?;
        cursor += 2;
        let warns = read_u16_le(&payload[cursor..])?;
        cursor += 2;
        (status, warns)
    } else {
        (0, 0)
    };

    let info = if cursor < payload.len() {
        String::from_utf8_lossy(&payload[cursor..]).to_string()
    } else {
        String::new()
    };

    Ok(OkPacket {
        header,
        affected_rows,
        last_insert_id,
        status_flags,
        warnings,
        info,
    })
}

/// Parse an ERR packet from payload bytes
pub fn parse_err_packet(payload: &[u8], capabilities: u32) -> Result<ErrPacket> {
    let mut cursor = 0;

    let header = take(payload, cursor, 1)?[0];
    cursor += 1;

    if header != 0xFF {
        return Err(ProxyError::Protocol(format!(
            "Invalid ERR packet header: 0x{:02X}",
            header
        )));
    }

    let error_code = read_u16_le(&payload[cursor..])?;
    cursor += 2;

    // The SQL state is only present when the marker byte is there
    let (sql_state_marker, sql_state) =
        if capabilities & CLIENT_PROTOCOL_41 != 0 && payload.get(cursor) == Some(&b'#') {
            let mut state = [0u8; 5];
            state.copy_from_slice(take(payload, cursor + 1, 5)?);
            cursor += 6;
            ('#', state)
        } else {
            ('#', *b"HY000")
        };

    let error_message = String::from_utf8_lossy(&payload[cursor..]).to_string();

    Ok(ErrPacket {
        header,
        error_code,
        sql_state_marker,
        sql_state,
        error_message,
    })
}

/// Parse a COM_STMT_PREPARE OK header
pub fn parse_stmt_prepare_ok(payload: &[u8]) -> Result<StmtPrepareOk> {
    let fixed = take(payload, 0, 12)?;
    if fixed[0] != 0x00 {
        return Err(ProxyError::Protocol(format!(
            "Invalid prepare OK header: 0x{:02X}",
            fixed[0]
        )));
    }
    Ok(StmtPrepareOk {
        statement_id: read_u32_le(&fixed[1..5])?,
        num_columns: read_u16_le(&fixed[5..7])?,
        num_params: read_u16_le(&fixed[7..9])?,
        // fixed[9] is a filler byte
        warnings: read_u16_le(&fixed[10..12])?,
    })
}

/// Parse a ColumnDefinition41 payload
pub fn parse_column_definition(payload: &[u8]) -> Result<ColumnDefinition> {
    let mut cursor = 0;
    let mut strings = Vec::with_capacity(6);
    for _ in 0..6 {
        let (value, bytes_read) = read_length_encoded_string(&payload[cursor..])?;
        strings.push(value.unwrap_or_default());
        cursor += bytes_read;
    }

    // Length of the fixed-length fields, always 0x0c
    let (_, bytes_read) = read_length_encoded_int(&payload[cursor..])?;
    cursor += bytes_read;

    let fixed = take(payload, cursor, 10)?;
    let mut strings = strings.into_iter();
    let _catalog = strings.next();
    Ok(ColumnDefinition {
        schema: strings.next().unwrap_or_default(),
        table: strings.next().unwrap_or_default(),
        org_table: strings.next().unwrap_or_default(),
        name: strings.next().unwrap_or_default(),
        org_name: strings.next().unwrap_or_default(),
        character_set: read_u16_le(&fixed[0..2])?,
        column_length: read_u32_le(&fixed[2..6])?,
        column_type: fixed[6],
        flags: read_u16_le(&fixed[7..9])?,
        decimals: fixed[9],
    })
}

/// Parse a text-protocol result row with `columns` values
pub fn parse_text_row(payload: &[u8], columns: usize) -> Result<Vec<Option<String>>> {
    let mut cursor = 0;
    let mut row = Vec::with_capacity(columns);
    for _ in 0..columns {
        let (value, bytes_read) = read_length_encoded_string(&payload[cursor..])?;
        row.push(value);
        cursor += bytes_read;
    }
    Ok(row)
}

/// Check if a packet is an OK packet
pub fn is_ok_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && (payload[0] == 0x00 || payload[0] == 0xFE)
}

/// Check if a packet is an ERR packet
pub fn is_err_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0xFF
}

/// Check if a packet is an EOF packet
pub fn is_eof_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0xFE && payload.len() < 9
}

/// Status flags carried by an EOF packet
pub fn eof_status_flags(payload: &[u8]) -> Option<u16> {
    if is_eof_packet(payload) && payload.len() >= 5 {
        Some(u16::from_le_bytes([payload[3], payload[4]]))
    } else {
        None
    }
}

// ============================================================================
// Helper Functions - Reading
// ============================================================================

/// Borrow `len` bytes at `start`, failing instead of panicking on short input
fn take(data: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    let end = start.checked_add(len);
    end.and_then(|end| data.get(start..end)).ok_or_else(|| {
        ProxyError::Protocol(format!(
            "Packet too short: need {} bytes at offset {}, have {}",
            len,
            start,
            data.len()
        ))
    })
}

/// Read a null-terminated string from a byte slice
/// Returns the string and the number of bytes consumed (including null terminator)
pub fn read_null_terminated_string(data: &[u8]) -> Result<(String, usize)> {
    let null_pos = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProxyError::Protocol("Missing null terminator".into()))?;

    let s = String::from_utf8_lossy(&data[..null_pos]).to_string();
    Ok((s, null_pos + 1))
}

/// Read a little-endian u16
pub fn read_u16_le(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(ProxyError::Protocol("Not enough bytes for u16".into()));
    }
    Ok(u16::from_le_bytes([data[0], data[1]]))
}

/// Read a little-endian u32
pub fn read_u32_le(data: &[u8]) -> Result<u32> {
    if data.len() < 4 {
        return Err(ProxyError::Protocol("Not enough bytes for u32".into()));
    }
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Read a length-encoded integer
/// Returns the value and the number of bytes consumed
pub fn read_length_encoded_int(data: &[u8]) -> Result<(u64, usize)> {
    if data.is_empty() {
        return Err(ProxyError::Protocol(
            "Empty data for length-encoded int".into(),
        ));
    }

    match data[0] {
        // NULL (only in row data)
        0xFB => Ok((0, 1)),
        0xFC => {
            let bytes = take(data, 1, 2)?;
            Ok((u16::from_le_bytes([bytes[0], bytes[1]]) as u64, 3))
        }
        0xFD => {
            let bytes = take(data, 1, 3)?;
            Ok((u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) as u64, 4))
        }
        0xFE => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(take(data, 1, 8)?);
            Ok((u64::from_le_bytes(bytes), 9))
        }
        // 0xFF is reserved for ERR packet header
        0xFF => Err(ProxyError::Protocol(
            "Invalid length-encoded int marker 0xFF".into(),
        )),
        n => Ok((n as u64, 1)),
    }
}

/// Read a length-encoded string, `None` for the 0xFB NULL marker
pub fn read_length_encoded_string(data: &[u8]) -> Result<(Option<String>, usize)> {
    if data.first() == Some(&0xFB) {
        return Ok((None, 1));
    }
    let (len, len_bytes) = read_length_encoded_int(data)?;
    let bytes = take(data, len_bytes, len as usize)?;
    Ok((
        Some(String::from_utf8_lossy(bytes).to_string()),
        len_bytes + len as usize,
    ))
}

// ============================================================================
// Packet Writing
// ============================================================================

/// Append one logical packet to `buf`, splitting it into 16MB frames.
///
/// Returns the sequence id for the packet that follows.
pub fn encode_packet(buf: &mut Vec<u8>, sequence_id: u8, payload: &[u8]) -> u8 {
    let mut sequence_id = sequence_id;
    let max = PacketHeader::MAX_PAYLOAD_LENGTH as usize;
    let mut last_len = 0;

    for chunk in payload.chunks(max) {
        let len = chunk.len() as u32;
        buf.extend_from_slice(&[
            (len & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            ((len >> 16) & 0xFF) as u8,
            sequence_id,
        ]);
        buf.extend_from_slice(chunk);
        sequence_id = sequence_id.wrapping_add(1);
        last_len = chunk.len();
    }

    // Empty payloads, and payloads that end on a frame boundary, need a
    // trailing empty frame
    if payload.is_empty() || last_len == max {
        buf.extend_from_slice(&[0, 0, 0, sequence_id]);
        sequence_id = sequence_id.wrapping_add(1);
    }

    sequence_id
}

/// Write a MySQL packet to a stream
///
/// Returns the sequence id for the next packet.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    sequence_id: u8,
    payload: &[u8],
) -> Result<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 4);
    let next = encode_packet(&mut buf, sequence_id, payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(next)
}

/// Write several consecutive packets with a single flush
pub async fn write_packets<W: AsyncWrite + Unpin>(
    writer: &mut W,
    sequence_id: u8,
    payloads: &[Vec<u8>],
) -> Result<u8> {
    let total: usize = payloads.iter().map(|p| p.len() + 4).sum();
    let mut buf = Vec::with_capacity(total);
    let mut next = sequence_id;
    for payload in payloads {
        next = encode_packet(&mut buf, next, payload);
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(next)
}

/// Build a HandshakeV10 packet payload
pub fn build_handshake_v10(handshake: &HandshakeV10) -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);

    payload.push(handshake.protocol_version);

    payload.extend_from_slice(handshake.server_version.as_bytes());
    payload.push(0);

    payload.extend_from_slice(&handshake.connection_id.to_le_bytes());
    payload.extend_from_slice(&handshake.auth_plugin_data_part_1);

    // Filler
    payload.push(0);

    payload.extend_from_slice(&handshake.capability_flags_lower.to_le_bytes());
    payload.push(handshake.character_set);
    payload.extend_from_slice(&handshake.status_flags.to_le_bytes());
    payload.extend_from_slice(&handshake.capability_flags_upper.to_le_bytes());
    payload.push(handshake.auth_plugin_data_length);

    // Reserved
    payload.extend_from_slice(&[0u8; 10]);

    payload.extend_from_slice(&handshake.auth_plugin_data_part_2);
    payload.push(0);

    payload.extend_from_slice(handshake.auth_plugin_name.as_bytes());
    payload.push(0);

    payload
}

/// Build the 32-byte SSLRequest sent before upgrading an upstream connection
pub fn build_ssl_request(capability_flags: u32, character_set: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    payload.extend_from_slice(&(capability_flags | CLIENT_SSL).to_le_bytes());
    payload.extend_from_slice(&PacketHeader::MAX_PAYLOAD_LENGTH.to_le_bytes());
    payload.push(character_set);
    payload.extend_from_slice(&[0u8; 23]);
    payload
}

/// Build a HandshakeResponse41 packet payload
pub fn build_handshake_response41(response: &HandshakeResponse41) -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);

    payload.extend_from_slice(&response.capability_flags.to_le_bytes());
    payload.extend_from_slice(&response.max_packet_size.to_le_bytes());
    payload.push(response.character_set);

    // Reserved (23 bytes)
    payload.extend_from_slice(&[0u8; 23]);

    payload.extend_from_slice(response.username.as_bytes());
    payload.push(0);

    if response.capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        write_length_encoded_int(&mut payload, response.auth_response.len() as u64);
        payload.extend_from_slice(&response.auth_response);
    } else if response.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
        payload.push(response.auth_response.len() as u8);
        payload.extend_from_slice(&response.auth_response);
    } else {
        payload.extend_from_slice(&response.auth_response);
        payload.push(0);
    }

    if let Some(ref db) = response.database {
        if response.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            payload.extend_from_slice(db.as_bytes());
            payload.push(0);
        }
    }

    if let Some(ref name) = response.auth_plugin_name {
        if response.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
        }
    }

    payload
}

/// Build an AuthSwitchRequest asking the client to answer with `plugin`
pub fn build_auth_switch_request(plugin: &str, auth_data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(plugin.len() + auth_data.len() + 3);
    payload.push(AUTH_SWITCH_HEADER);
    payload.extend_from_slice(plugin.as_bytes());
    payload.push(0);
    payload.extend_from_slice(auth_data);
    payload.push(0);
    payload
}

/// Build an OK packet payload
pub fn build_ok_packet(ok: &OkPacket, capabilities: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);

    payload.push(ok.header);
    write_length_encoded_int(&mut payload, ok.affected_rows);
    write_length_encoded_int(&mut payload, ok.last_insert_id);

    if capabilities & CLIENT_PROTOCOL_41 != 0 {
        payload.extend_from_slice(&ok.status_flags.to_le_bytes());
        payload.extend_from_slice(&ok.warnings.to_le_bytes());
    }

    if !ok.info.is_empty() {
        payload.extend_from_slice(ok.info.as_bytes());
    }

    payload
}

/// Build an ERR packet payload
pub fn build_err_packet(err: &ErrPacket, capabilities: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);

    payload.push(err.header);
    payload.extend_from_slice(&err.error_code.to_le_bytes());

    if capabilities & CLIENT_PROTOCOL_41 != 0 {
        payload.push(err.sql_state_marker as u8);
        payload.extend_from_slice(&err.sql_state);
    }

    payload.extend_from_slice(err.error_message.as_bytes());

    payload
}

/// Build an EOF packet payload (pre-`CLIENT_DEPRECATE_EOF` framing)
pub fn build_eof_packet(warnings: u16, status_flags: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.push(0xFE);
    payload.extend_from_slice(&warnings.to_le_bytes());
    payload.extend_from_slice(&status_flags.to_le_bytes());
    payload
}

/// Build a ColumnDefinition41 payload
pub fn build_column_definition(column: &ColumnDefinition) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64 + column.name.len());

    write_length_encoded_string(&mut payload, b"def");
    write_length_encoded_string(&mut payload, column.schema.as_bytes());
    write_length_encoded_string(&mut payload, column.table.as_bytes());
    write_length_encoded_string(&mut payload, column.org_table.as_bytes());
    write_length_encoded_string(&mut payload, column.name.as_bytes());
    write_length_encoded_string(&mut payload, column.org_name.as_bytes());

    // Length of fixed-length fields
    payload.push(0x0c);
    payload.extend_from_slice(&column.character_set.to_le_bytes());
    payload.extend_from_slice(&column.column_length.to_le_bytes());
    payload.push(column.column_type);
    payload.extend_from_slice(&column.flags.to_le_bytes());
    payload.push(column.decimals);
    payload.extend_from_slice(&[0, 0]);

    payload
}

/// Build a text-protocol result row
pub fn build_text_row(values: &[Option<String>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for value in values {
        match value {
            Some(v) => write_length_encoded_string(&mut payload, v.as_bytes()),
            None => payload.push(0xFB),
        }
    }
    payload
}

/// Build a COM_STMT_PREPARE OK header
pub fn build_stmt_prepare_ok(ok: &StmtPrepareOk) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.push(0x00);
    payload.extend_from_slice(&ok.statement_id.to_le_bytes());
    payload.extend_from_slice(&ok.num_columns.to_le_bytes());
    payload.extend_from_slice(&ok.num_params.to_le_bytes());
    payload.push(0);
    payload.extend_from_slice(&ok.warnings.to_le_bytes());
    payload
}

/// Build a command packet payload: command byte followed by its body
pub fn build_command(command: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(command);
    payload.extend_from_slice(body);
    payload
}

// ============================================================================
// Helper Functions - Writing
// ============================================================================

/// Write a length-encoded integer
pub fn write_length_encoded_int(buf: &mut Vec<u8>, value: u64) {
    if value < 251 {
        buf.push(value as u8);
    } else if value < 65536 {
        buf.push(0xFC);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value < 16777216 {
        buf.push(0xFD);
        buf.push((value & 0xFF) as u8);
        buf.push(((value >> 8) & 0xFF) as u8);
        buf.push(((value >> 16) & 0xFF) as u8);
    } else {
        buf.push(0xFE);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

/// Write a length-encoded string
pub fn write_length_encoded_string(buf: &mut Vec<u8>, value: &[u8]) {
    write_length_encoded_int(buf, value.len() as u64);
    buf.extend_from_slice(value);
}
