//! Text codecs for IDL strings. All of them are strict: malformed input is
//! an [`Error::Encoding`], never a replacement character.

use crate::error::{Error, Result};

pub trait Codec: Send + Sync + 'static {
    const NAME: &'static str;

    fn decode(bytes: &[u8]) -> Result<String>;

    fn encode(text: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Utf8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Ascii;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Latin1;

fn decode_error<C: Codec>(reason: String) -> Error {
    Error::Encoding {
        codec: C::NAME,
        action: "decode",
        reason,
    }
}

fn encode_error<C: Codec>(text: &str, limit: u32) -> Error {
    let (position, ch) = text
        .chars()
        .enumerate()
        .find(|(_, ch)| u32::from(*ch) > limit)
        .unwrap_or((0, '\u{0}'));
    Error::Encoding {
        codec: C::NAME,
        action: "encode",
        reason: format!(
            "character {:?} (U+{:04X}) in position {position}",
            ch,
            u32::from(ch)
        ),
    }
}

impl Codec for Utf8 {
    const NAME: &'static str = "utf-8";

    fn decode(bytes: &[u8]) -> Result<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|err| decode_error::<Self>(format!("invalid byte sequence: {err}")))
    }

    fn encode(text: &str) -> Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

impl Codec for Ascii {
    const NAME: &'static str = "ascii";

    fn decode(bytes: &[u8]) -> Result<String> {
        match bytes.iter().position(|b| !b.is_ascii()) {
            None => Ok(bytes.iter().map(|b| char::from(*b)).collect()),
            Some(position) => Err(decode_error::<Self>(format!(
                "byte {:#04x} in position {position}",
                bytes[position]
            ))),
        }
    }

    fn encode(text: &str) -> Result<Vec<u8>> {
        if text.is_ascii() {
            Ok(text.as_bytes().to_vec())
        } else {
            Err(encode_error::<Self>(text, 0x7f))
        }
    }
}

impl Codec for Latin1 {
    const NAME: &'static str = "latin-1";

    fn decode(bytes: &[u8]) -> Result<String> {
        Ok(bytes.iter().map(|b| char::from(*b)).collect())
    }

    fn encode(text: &str) -> Result<Vec<u8>> {
        text.chars()
            .map(|ch| u8::try_from(u32::from(ch)).ok())
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| encode_error::<Self>(text, 0xff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_rejects_truncated_sequences() {
        assert_eq!(Utf8::decode("héllo".as_bytes()).unwrap(), "héllo");
        let err = Utf8::decode(&[0x68, 0xc3]).unwrap_err();
        assert!(matches!(err, Error::Encoding { action: "decode", .. }));
    }

    #[test]
    fn ascii_is_seven_bit() {
        assert!(Ascii::decode(&[0x41, 0x80]).is_err());
        assert!(Ascii::encode("naïve").is_err());
        assert_eq!(Ascii::encode("plain").unwrap(), b"plain");
    }

    #[test]
    fn latin1_covers_one_byte() {
        assert_eq!(Latin1::decode(&[0xe9]).unwrap(), "é");
        assert_eq!(Latin1::encode("é").unwrap(), vec![0xe9]);
        let err = Latin1::encode("€").unwrap_err();
        assert!(err.to_string().contains("U+20AC"));
    }
}
