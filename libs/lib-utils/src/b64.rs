use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub fn b64u_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data.as_ref())
}

/// Decodes url-safe base64 with or without padding. Gmail emits unpadded
/// payloads but other producers pad, so padding is stripped before decode.
pub fn b64u_decode(data: &str) -> Result<Vec<u8>, Error> {
    let trimmed = data.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| Error::DecodeFailed(e.to_string()))
}

pub fn b64u_decode_to_string(data: &str) -> Result<String, Error> {
    let bytes = b64u_decode(data)?;
    String::from_utf8(bytes).map_err(|e| Error::DecodeFailed(e.to_string()))
}

#[derive(Debug)]
pub enum Error {
    DecodeFailed(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let encoded = b64u_encode("hello world");
        assert_eq!(b64u_decode_to_string(&encoded).unwrap(), "hello world");
    }

    #[test]
    fn decodes_padded_input() {
        // Standard url-safe encoding of "ab" is "YWI=" when padded
        assert_eq!(b64u_decode_to_string("YWI=").unwrap(), "ab");
        assert_eq!(b64u_decode_to_string("YWI").unwrap(), "ab");
    }
}
