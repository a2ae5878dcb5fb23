//! Wire encoding of datums.
//!
//! A message is a 4-byte ASCII tag naming the datum kind, followed by
//! the payload bytes. Data datums carry their payload verbatim, error
//! datums carry the UTF-8 message, and the other kinds carry nothing.

use crate::{
    datum::{Datum, DatumKind},
    error::{Error, Result},
};

pub const TAG_LEN: usize = 4;

pub const TAG_DATA: &[u8; TAG_LEN] = b"data";
pub const TAG_EMPTY: &[u8; TAG_LEN] = b"empt";
pub const TAG_ERROR: &[u8; TAG_LEN] = b"erro";
pub const TAG_INVALID: &[u8; TAG_LEN] = b"inva";
pub const TAG_FLUSH: &[u8; TAG_LEN] = b"flus";
pub const TAG_COMPLETE: &[u8; TAG_LEN] = b"comp";

pub fn tag(kind: DatumKind) -> &'static [u8; TAG_LEN] {
    match kind {
        DatumKind::Data => TAG_DATA,
        DatumKind::Empty => TAG_EMPTY,
        DatumKind::Error => TAG_ERROR,
        DatumKind::Invalid => TAG_INVALID,
        DatumKind::Flush => TAG_FLUSH,
        DatumKind::Complete => TAG_COMPLETE,
    }
}

pub fn encode(datum: &Datum) -> Vec<u8> {
    let body: &[u8] = match datum {
        Datum::Data(payload) => payload,
        Datum::Error(message) => message.as_bytes(),
        Datum::Empty | Datum::Invalid | Datum::Flush | Datum::Complete => &[],
    };

    let mut message = Vec::with_capacity(TAG_LEN + body.len());
    message.extend_from_slice(tag(datum.kind()));
    message.extend_from_slice(body);
    message
}

/// Read the kind of a message without decoding the body.
pub fn decode_kind(message: &[u8]) -> Result<DatumKind> {
    let tag = message.get(..TAG_LEN).ok_or_else(|| Error::protocol_decode(message))?;

    let kind = match tag {
        t if t == TAG_DATA => DatumKind::Data,
        t if t == TAG_EMPTY => DatumKind::Empty,
        t if t == TAG_ERROR => DatumKind::Error,
        t if t == TAG_INVALID => DatumKind::Invalid,
        t if t == TAG_FLUSH => DatumKind::Flush,
        t if t == TAG_COMPLETE => DatumKind::Complete,
        _ => return Err(Error::protocol_decode(tag)),
    };
    Ok(kind)
}

pub fn decode(message: &[u8]) -> Result<Datum> {
    let kind = decode_kind(message)?;
    let body = &message[TAG_LEN..];

    let datum = match kind {
        DatumKind::Data => Datum::data(body),
        DatumKind::Error => Datum::Error(String::from_utf8_lossy(body).into_owned()),
        DatumKind::Empty => Datum::Empty,
        DatumKind::Invalid => Datum::Invalid,
        DatumKind::Flush => Datum::Flush,
        DatumKind::Complete => Datum::Complete,
    };
    Ok(datum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;

    #[test]
    fn data_message_layout() -> anyhow::Result<()> {
        let message = encode(&Datum::data("frame1"));
        ensure!(message == b"dataframe1");
        ensure!(decode(&message)? == Datum::data("frame1"));

        ensure!(encode(&Datum::Complete) == b"comp");
        ensure!(decode(b"comp")? == Datum::Complete);
        ensure!(decode(b"data")? == Datum::data(Vec::new()));
        Ok(())
    }

    #[test]
    fn every_kind_survives_the_wire() -> anyhow::Result<()> {
        let datums = [
            Datum::data(vec![0u8, 255, 3]),
            Datum::Empty,
            Datum::error("upstream step failed"),
            Datum::Invalid,
            Datum::Flush,
            Datum::Complete,
        ];
        for datum in datums {
            ensure!(decode(&encode(&datum))? == datum);
        }
        Ok(())
    }

    #[test]
    fn payloads_that_look_like_tags() -> anyhow::Result<()> {
        let payloads = [
            vec![b'x'],
            b"data".to_vec(),
            b"comp".to_vec(),
            b"empt".to_vec(),
            b"compcomp".to_vec(),
        ];
        for payload in payloads {
            let datum = Datum::data(payload.clone());
            let message = encode(&datum);
            ensure!(message.len() == TAG_LEN + payload.len());
            ensure!(decode_kind(&message)? == DatumKind::Data);
            ensure!(decode(&message)? == datum);
        }

        // the error message is the payload
        ensure!(encode(&Datum::error("comp")) == b"errocomp");
        ensure!(decode(b"errocomp")? == Datum::error("comp"));
        Ok(())
    }

    #[test]
    fn short_frames_are_rejected() {
        for frame in [&b"d"[..], b"dat", b"com"] {
            assert!(matches!(decode(frame), Err(Error::ProtocolDecode { .. })));
            assert!(matches!(decode_kind(frame), Err(Error::ProtocolDecode { .. })));
        }
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!(matches!(
            decode(b"zzzzpayload"),
            Err(Error::ProtocolDecode { tag }) if tag == b"zzzz"
        ));
        assert!(matches!(decode(b"da"), Err(Error::ProtocolDecode { .. })));
        assert!(matches!(decode(b""), Err(Error::ProtocolDecode { .. })));
    }
}
