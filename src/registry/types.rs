//! Wire-level JSON shapes. The image document itself is treated mostly as
//! an opaque blob (it is stored and returned byte-for-byte); only the
//! `parent` field is ever inspected, matching the Go original's permissive
//! `encoding/json`-ignores-unknown-fields behavior.

use serde::Deserialize;
use serde_json::Value;

/// One entry of the array body accepted by
/// `PUT /v1/repositories/{namespace}/{repository}/`.
#[derive(Debug, Deserialize)]
pub(crate) struct RepositoryImagePut {
    pub(crate) id: String,
    #[serde(rename = "Tag")]
    pub(crate) tag: Option<String>,
}

/// Validates `bytes` as a well-formed JSON object and extracts its `parent`
/// field, if any. A missing or empty `parent` means "no parent" (the image
/// is a root of its ancestry tree).
pub(crate) fn parse_image_document(bytes: &[u8]) -> Result<Option<String>, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    if !value.is_object() {
        return Err(serde::de::Error::custom("image document must be a JSON object"));
    }

    let parent = value
        .get("parent")
        .and_then(Value::as_str)
        .filter(|parent| !parent.is_empty())
        .map(str::to_owned);

    Ok(parent)
}

#[cfg(test)]
mod tests {
    use super::parse_image_document;

    #[test]
    fn extracts_nonempty_parent() {
        let parent = parse_image_document(br#"{"id":"bbb","parent":"aaa"}"#).unwrap();
        assert_eq!(parent.as_deref(), Some("aaa"));
    }

    #[test]
    fn empty_parent_means_no_parent() {
        let parent = parse_image_document(br#"{"id":"aaa","parent":""}"#).unwrap();
        assert_eq!(parent, None);
    }

    #[test]
    fn missing_parent_field_means_no_parent() {
        let parent = parse_image_document(br#"{"id":"aaa"}"#).unwrap();
        assert_eq!(parent, None);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let parent =
            parse_image_document(br#"{"id":"aaa","docker_version":"1.0","weird":[1,2,3]}"#)
                .unwrap();
        assert_eq!(parent, None);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_image_document(b"not json").is_err());
        assert!(parse_image_document(b"[1,2,3]").is_err());
    }
}
