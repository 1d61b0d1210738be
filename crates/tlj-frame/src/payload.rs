use serde::de::DeserializeOwned;
use serde::Serialize;

/// A payload serialization failure.
#[derive(Debug, thiserror::Error)]
#[error("{codec} payload error: {message}")]
pub struct CodecError {
    pub codec: &'static str,
    pub message: String,
}

/// Pluggable payload encoding.
///
/// Frames only carry opaque bytes; a codec turns registered values into those
/// bytes and back. Both ends of a connection must agree on the codec.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Short name used in errors and logs.
    const NAME: &'static str;

    fn marshal<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError>;

    fn unmarshal<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    const NAME: &'static str = "json";

    fn marshal<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|err| CodecError {
            codec: Self::NAME,
            message: err.to_string(),
        })
    }

    fn unmarshal<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|err| CodecError {
            codec: Self::NAME,
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        id: i64,
    }

    #[test]
    fn json_marshal_is_plain_json() {
        let bytes = JsonCodec::marshal(&Probe {
            name: "x".to_string(),
            id: 7,
        })
        .unwrap();
        assert_eq!(bytes, br#"{"name":"x","id":7}"#);
    }

    #[test]
    fn json_unmarshal_reports_codec_name() {
        let err = JsonCodec::unmarshal::<Probe>(b"{not json").unwrap_err();
        assert_eq!(err.codec, "json");
        assert!(err.to_string().starts_with("json payload error"));
    }
}
