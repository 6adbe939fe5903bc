//! Frame codec: `[64-byte NUL-padded header][body]`.

use crate::constants::{FILE_HEADER_DELIMITER, HEADER_SIZE, TAG_CHECK_VERSION, TAG_UPDATE};

/// Errors from encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("header is {len} bytes, slot holds {HEADER_SIZE}")]
    HeaderTooLong { len: usize },

    #[error("frame is {len} bytes, need more than {HEADER_SIZE}")]
    TooShort { len: usize },

    #[error("header is not valid UTF-8")]
    InvalidHeader,

    #[error("malformed file header: {0:?}")]
    MalformedHeader(String),
}

/// A decoded frame borrowing from the received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Header text with trailing NUL padding removed.
    pub header: &'a str,
    pub body: &'a [u8],
}

/// Builds a frame from a header and a body.
///
/// The header is copied into the 64-byte slot and NUL-padded. A header
/// that does not fit is rejected rather than truncated.
pub fn encode(header: &str, body: &[u8]) -> Result<Vec<u8>, FrameError> {
    let header_bytes = header.as_bytes();
    if header_bytes.len() > HEADER_SIZE {
        return Err(FrameError::HeaderTooLong {
            len: header_bytes.len(),
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(header_bytes);
    buf.resize(HEADER_SIZE, 0);
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Splits a received frame into header text and body.
pub fn decode(frame: &[u8]) -> Result<Frame<'_>, FrameError> {
    if frame.len() <= HEADER_SIZE {
        return Err(FrameError::TooShort { len: frame.len() });
    }

    let (slot, body) = frame.split_at(HEADER_SIZE);
    let end = slot.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let header = std::str::from_utf8(&slot[..end]).map_err(|_| FrameError::InvalidHeader)?;

    Ok(Frame { header, body })
}

/// Routing key of a frame, parsed from its header text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    CheckVersion,
    Update,
    File(FileHeader),
}

impl Header {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        match text {
            TAG_CHECK_VERSION => Ok(Header::CheckVersion),
            TAG_UPDATE => Ok(Header::Update),
            other => FileHeader::parse(other).map(Header::File),
        }
    }
}

/// `<appId>---<version>---<package>` key of a file frame.
///
/// The package is kept as text here; mapping it onto a
/// [`PackageKind`](crate::PackageKind) is the receiver's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub app_id: String,
    pub version: String,
    pub package: String,
}

impl FileHeader {
    /// Parses a composite file key.
    ///
    /// Components past the third are ignored so future header shapes
    /// still route to the right app.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let mut parts = text.split(FILE_HEADER_DELIMITER);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(app_id), Some(version), Some(package)) => Ok(Self {
                app_id: app_id.to_string(),
                version: version.to_string(),
                package: package.to_string(),
            }),
            _ => Err(FrameError::MalformedHeader(text.to_string())),
        }
    }

    pub fn to_header_string(&self) -> String {
        [
            self.app_id.as_str(),
            self.version.as_str(),
            self.package.as_str(),
        ]
        .join(FILE_HEADER_DELIMITER)
    }
}
