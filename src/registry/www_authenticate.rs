//! Parsing for the two `Authorization` header shapes the wire protocol uses:
//! `Basic base64(user:pass)` for the login handshake, and
//! `Token signature=<tok>,repository="ns/repo",access={read|write}` for
//! token-scoped pushes and pulls.

use base64::Engine;
use nom::{
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::is_space,
    combinator::map_res,
    multi::separated_list1,
    sequence::separated_pair,
    IResult,
};

#[derive(Debug, Eq, PartialEq)]
pub(crate) struct BasicAuthResponse {
    pub(crate) username: Vec<u8>,
    pub(crate) password: Vec<u8>,
}

fn skip_whitespace(input: &[u8]) -> &[u8] {
    let (input, _) = take_while::<_, _, ()>(is_space)(input).expect("infallible");
    input
}

pub(crate) fn basic_auth_response(input: &[u8]) -> IResult<&[u8], BasicAuthResponse> {
    // Skip leading whitespace.
    let input = skip_whitespace(input);

    // Match tag.
    let (input, _) = tag_no_case("basic")(input)?;
    let input = skip_whitespace(input);

    // Get base64 data and decode.
    let (input, raw_data) = map_res(take_while1(|c: u8| !c.is_ascii_whitespace()), |raw_data| {
        base64::prelude::BASE64_STANDARD.decode(raw_data)
    })(input)?;

    let basic = match raw_data.iter().position(|&c| c == b':') {
        Some(idx) => BasicAuthResponse {
            username: raw_data[..idx].to_vec(),
            password: raw_data[(idx + 1)..].to_vec(),
        },
        None => BasicAuthResponse {
            username: raw_data.to_vec(),
            password: Vec::new(),
        },
    };

    Ok((input, basic))
}

/// Extracts just the `signature=` component of a `Token ...` header — the
/// rest of the comma-separated key/value pairs (`repository="..."`,
/// `access=...`) are along for the ride, but the signature is what identifies
/// the bearer token.
pub(crate) fn token_signature(input: &[u8]) -> IResult<&[u8], String> {
    let input = skip_whitespace(input);
    let (input, _) = tag_no_case("token")(input)?;
    let input = skip_whitespace(input);

    let (input, pairs) = separated_list1(
        nom::bytes::complete::tag(","),
        separated_pair(
            take_while1(|c: u8| c != b'=' && c != b','),
            nom::bytes::complete::tag("="),
            take_while(|c: u8| c != b','),
        ),
    )(input)?;

    let signature = pairs
        .into_iter()
        .find(|(key, _): &(&[u8], &[u8])| *key == b"signature")
        .map(|(_, value)| {
            let value = value.strip_prefix(b"\"").unwrap_or(value);
            let value = value.strip_suffix(b"\"").unwrap_or(value);
            String::from_utf8_lossy(value).into_owned()
        })
        .ok_or_else(|| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
        })?;

    Ok((input, signature))
}

#[cfg(test)]
mod tests {
    use super::{basic_auth_response, token_signature, BasicAuthResponse};

    #[test]
    fn can_parse_known_response() {
        let input = b"Basic YWxhZGRpbjpvcGVuc2VzYW1l";

        assert_eq!(
            basic_auth_response(input),
            Ok((
                &b""[..],
                BasicAuthResponse {
                    username: b"aladdin".to_vec(),
                    password: b"opensesame".to_vec()
                }
            ))
        )
    }

    #[test]
    fn can_parse_token_signature() {
        let input = br#"Token signature=abc123,repository="ns/repo",access=write"#;
        let (_, signature) = token_signature(input).unwrap();
        assert_eq!(signature, "abc123");
    }
}
