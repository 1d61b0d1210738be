use serde::{Deserialize, Serialize};

/// Type code permanently reserved for [`Envelope`].
pub const ENVELOPE_CODE: u16 = 0;

/// Correlation wrapper for request/response exchanges.
///
/// `type_code` and `data` describe the inner value; the envelope itself is
/// always framed with [`ENVELOPE_CODE`]. Field names on the wire are
/// `RequestID`, `Type` and `Data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "RequestID")]
    pub request_id: u16,
    #[serde(rename = "Type")]
    pub type_code: u16,
    #[serde(rename = "Data", with = "inner_payload")]
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn new(request_id: u16, type_code: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id,
            type_code,
            data: data.into(),
        }
    }
}

/// The nested payload travels as a string when it is UTF-8 (always the case
/// for JSON) and as raw bytes otherwise.
mod inner_payload {
    use std::fmt;

    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(data) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => serializer.serialize_bytes(data),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_any(PayloadVisitor)
    }

    struct PayloadVisitor;

    impl<'de> Visitor<'de> for PayloadVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or byte sequence")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.as_bytes().to_vec())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(v.into_bytes())
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape_matches_wire_names() {
        let envelope = Envelope::new(1, 1, br#"{"Name":"test","ID":1}"#.to_vec());
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            json,
            r#"{"RequestID":1,"Type":1,"Data":"{\"Name\":\"test\",\"ID\":1}"}"#
        );
    }

    #[test]
    fn decodes_string_data() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"RequestID":3,"Type":2,"Data":"test"}"#).unwrap();
        assert_eq!(envelope, Envelope::new(3, 2, b"test".to_vec()));
    }

    #[test]
    fn non_utf8_data_survives() {
        let envelope = Envelope::new(9, 4, vec![0xff, 0x00, 0xfe]);
        let json = serde_json::to_vec(&envelope).unwrap();
        let back: Envelope = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn rejects_wrong_data_kind() {
        let result = serde_json::from_str::<Envelope>(r#"{"RequestID":3,"Type":2,"Data":true}"#);
        assert!(result.is_err());
    }
}
