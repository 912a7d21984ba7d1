//! scrcpy device handshake
//!
//! ```text
//! video socket:  [0x00]                       liveness byte (forward tunnel only)
//!                [64 bytes]                   device name, UTF-8, NUL padded
//!                [4 bytes]                    codec id, e.g. "h264"
//!                [u32 BE width][u32 BE height]
//!                [...]                        Annex-B elementary stream
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{AppError, Result};

/// Expected first byte on the video socket
pub const LIVENESS_BYTE: u8 = 0x00;

/// Width of the NUL-padded device name field
pub const DEVICE_NAME_LEN: usize = 64;

/// `"h264"` as a big-endian u32
pub const CODEC_H264: u32 = 0x6832_3634;

/// Metadata negotiated during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMeta {
    pub device_name: String,
    pub codec_id: u32,
    pub width: u32,
    pub height: u32,
}

impl StreamMeta {
    /// Printable codec name (`"h264"`), or hex for non-ASCII ids
    pub fn codec_name(&self) -> String {
        let bytes = self.codec_id.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            format!("{:08x}", self.codec_id)
        }
    }
}

/// Outcome of waiting for the liveness byte
#[derive(Debug, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Socket closed before the byte arrived; the server is not listening yet
    NotReady,
}

/// Read the liveness byte; anything other than `0x00` is a protocol violation
pub async fn read_liveness<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Liveness> {
    let mut byte = [0u8; 1];
    match reader.read_exact(&mut byte).await {
        Ok(_) if byte[0] == LIVENESS_BYTE => Ok(Liveness::Alive),
        Ok(_) => Err(AppError::Handshake(format!(
            "expected liveness byte 0x{:02x}, got 0x{:02x}",
            LIVENESS_BYTE, byte[0]
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(Liveness::NotReady),
        Err(e) => Err(e.into()),
    }
}

/// Read device name, codec and initial resolution
pub async fn read_stream_meta<R: AsyncRead + Unpin>(reader: &mut R) -> Result<StreamMeta> {
    let mut name = [0u8; DEVICE_NAME_LEN];
    reader
        .read_exact(&mut name)
        .await
        .map_err(|e| AppError::Handshake(format!("reading device name: {}", e)))?;
    let end = name.iter().position(|b| *b == 0).unwrap_or(DEVICE_NAME_LEN);
    let device_name = String::from_utf8_lossy(&name[..end]).into_owned();

    let codec_id = reader
        .read_u32()
        .await
        .map_err(|e| AppError::Handshake(format!("reading codec id: {}", e)))?;
    let width = reader
        .read_u32()
        .await
        .map_err(|e| AppError::Handshake(format!("reading width: {}", e)))?;
    let height = reader
        .read_u32()
        .await
        .map_err(|e| AppError::Handshake(format!("reading height: {}", e)))?;

    if width == 0 || height == 0 {
        return Err(AppError::Handshake(format!(
            "invalid initial resolution {}x{}",
            width, height
        )));
    }

    Ok(StreamMeta {
        device_name,
        codec_id,
        width,
        height,
    })
}

#[cfg(test)]
pub(crate) fn encode_handshake(name: &str, width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![LIVENESS_BYTE];
    let mut field = [0u8; DEVICE_NAME_LEN];
    field[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&field);
    out.extend_from_slice(&CODEC_H264.to_be_bytes());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_handshake() {
        let bytes = encode_handshake("Pixel 7", 1080, 2400);
        let mut reader = bytes.as_slice();

        assert_eq!(read_liveness(&mut reader).await.unwrap(), Liveness::Alive);
        let meta = read_stream_meta(&mut reader).await.unwrap();

        assert_eq!(meta.device_name, "Pixel 7");
        assert_eq!(meta.codec_id, CODEC_H264);
        assert_eq!(meta.codec_name(), "h264");
        assert_eq!((meta.width, meta.height), (1080, 2400));
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_bad_liveness_byte() {
        let mut reader: &[u8] = &[0x7f];
        assert!(matches!(
            read_liveness(&mut reader).await,
            Err(AppError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_socket_is_not_ready() {
        let mut reader: &[u8] = &[];
        assert_eq!(read_liveness(&mut reader).await.unwrap(), Liveness::NotReady);
    }

    #[tokio::test]
    async fn test_zero_resolution_rejected() {
        let bytes = encode_handshake("tablet", 0, 1200);
        let mut reader = &bytes[1..];
        assert!(matches!(
            read_stream_meta(&mut reader).await,
            Err(AppError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_meta() {
        let bytes = encode_handshake("tablet", 800, 1280);
        let mut reader = &bytes[1..40];
        assert!(matches!(
            read_stream_meta(&mut reader).await,
            Err(AppError::Handshake(_))
        ));
    }

    #[test]
    fn test_codec_name_fallback() {
        let meta = StreamMeta {
            device_name: String::new(),
            codec_id: 0x0000_0001,
            width: 1,
            height: 1,
        };
        assert_eq!(meta.codec_name(), "00000001");
    }
}
