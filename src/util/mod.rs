//! Utility Functions Module
//!
//! Helpers shared by the data link: the `generate_custom_enum!` macro used for
//! wire enumerations, and hex formatting for frame traces.

pub mod enum_macros;

/// Hex preview of at most `limit` bytes, for log lines.
///
/// Longer buffers are cut and suffixed with the total length.
///
/// ```
/// use bacnet_mstp::util::hex_preview;
///
/// assert_eq!(hex_preview(&[0x55, 0xFF, 0x00], 16), "55ff00");
/// assert_eq!(hex_preview(&[1, 2, 3, 4], 2), "0102.. (4 bytes)");
/// ```
pub fn hex_preview(data: &[u8], limit: usize) -> String {
    if data.len() <= limit {
        hex::encode(data)
    } else {
        format!("{}.. ({} bytes)", hex::encode(&data[..limit]), data.len())
    }
}

/// Hex dump utility for debugging
pub fn hex_dump(data: &[u8], prefix: &str) -> String {
    let mut result = String::new();

    for (i, chunk) in data.chunks(16).enumerate() {
        result.push_str(prefix);
        result.push_str(&format!("{:04X}: ", i * 16));

        let hex = hex::encode_upper(chunk);
        for (j, pair) in hex.as_bytes().chunks(2).enumerate() {
            if j == 8 {
                result.push(' ');
            }
            result.push(pair[0] as char);
            result.push(pair[1] as char);
            result.push(' ');
        }

        // Padding
        for j in chunk.len()..16 {
            if j == 8 {
                result.push(' ');
            }
            result.push_str("   ");
        }

        result.push_str(" |");
        for byte in chunk {
            if byte.is_ascii_graphic() || *byte == b' ' {
                result.push(*byte as char);
            } else {
                result.push('.');
            }
        }
        result.push_str("|\n");
    }

    result
}
