use serde::{Deserialize, Serialize};

/// Envelope stored in cookies and their local mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedValue {
    pub site: String,
    pub value: String,
}

/// What a stored string turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Tagged with this deployment's site identifier
    Ours(String),
    /// Tagged, but by another deployment
    Foreign,
    /// Not an envelope at all (legacy or unrelated value)
    Plain,
}

/// Wraps credential values with the deployment's site identifier so values
/// written by other deployments on the same host are never picked up.
#[derive(Debug, Clone)]
pub struct CredentialCodec {
    site: String,
}

impl CredentialCodec {
    pub fn new(site: impl Into<String>) -> Self {
        Self { site: site.into() }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn encode(&self, value: &str) -> String {
        let tagged = TaggedValue {
            site: self.site.clone(),
            value: value.to_string(),
        };
        // Serializing two plain strings cannot fail
        serde_json::to_string(&tagged).unwrap_or_default()
    }

    /// Raw value if `stored` is an envelope carrying our site identifier.
    pub fn decode(&self, stored: &str) -> Option<String> {
        match self.inspect(stored) {
            Envelope::Ours(value) => Some(value),
            Envelope::Foreign | Envelope::Plain => None,
        }
    }

    pub fn inspect(&self, stored: &str) -> Envelope {
        match serde_json::from_str::<TaggedValue>(stored) {
            Ok(tagged) if tagged.site == self.site => Envelope::Ours(tagged.value),
            Ok(_) => Envelope::Foreign,
            Err(_) => Envelope::Plain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_same_site() {
        let codec = CredentialCodec::new("panel-a");
        for value in ["a1", "Bearer xyz", "with \"quotes\" and ; semicolons", "ünïcode"] {
            assert_eq!(codec.decode(&codec.encode(value)).as_deref(), Some(value));
        }
    }

    #[test]
    fn test_decode_rejects_other_site() {
        let a = CredentialCodec::new("panel-a");
        let b = CredentialCodec::new("panel-b");
        let stored = a.encode("a1");
        assert_eq!(b.decode(&stored), None);
        assert_eq!(b.inspect(&stored), Envelope::Foreign);
    }

    #[test]
    fn test_decode_plain_values_silently() {
        let codec = CredentialCodec::new("panel-a");
        assert_eq!(codec.decode("legacy-token"), None);
        assert_eq!(codec.decode(""), None);
        assert_eq!(codec.decode("{\"site\":1}"), None);
        assert_eq!(codec.inspect("legacy-token"), Envelope::Plain);
    }

    #[test]
    fn test_encoded_shape() {
        let codec = CredentialCodec::new("panel-a");
        let parsed: serde_json::Value = serde_json::from_str(&codec.encode("a1")).unwrap();
        assert_eq!(parsed["site"], "panel-a");
        assert_eq!(parsed["value"], "a1");
    }
}
