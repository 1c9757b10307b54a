use crate::canonicalization::Type;
use crate::hash::HashAlgo;
use crate::header::SignatureKind;
use crate::DKIMError;
use nom::bytes::complete::{take_while, take_while1};
use nom::character::complete::{alpha1, char};
use nom::combinator::{opt, recognize};
use nom::multi::separated_list1;
use nom::sequence::{pair, terminated};
use nom::IResult;

#[derive(Clone, Debug, PartialEq)]
/// One `tag=value` pair from a signature header or key record
pub struct Tag {
    /// Name of the tag (v, a, d, s, ...)
    pub name: String,
    /// Value with folding whitespace removed
    pub value: String,
    /// Value as it appeared in the text, folding included
    pub raw_value: String,
}

/// Parses a `tag=value` list, the shared grammar of signature headers
/// and public key records, as specified
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.2>.
/// tag-list  =  tag-spec *( ";" tag-spec ) [ ";" ]
pub fn tag_list(input: &str) -> IResult<&str, Vec<Tag>> {
    terminated(separated_list1(char(';'), tag_spec), opt(char(';')))(input)
}

/// tag-spec  =  [FWS] tag-name [FWS] "=" [FWS] tag-value [FWS]
fn tag_spec(input: &str) -> IResult<&str, Tag> {
    let (input, _) = opt(fws)(input)?;
    let (input, name) = tag_name(input)?;
    let (input, _) = opt(fws)(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = opt(fws)(input)?;
    let (input, (value, raw_value)) = tag_value(input)?;
    let (input, _) = opt(fws)(input)?;

    Ok((
        input,
        Tag {
            name: name.to_owned(),
            value,
            raw_value,
        },
    ))
}

/// tag-name  =  ALPHA *ALNUMPUNC
/// ALNUMPUNC =  ALPHA / DIGIT / "_"
fn tag_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alpha1,
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// tval      =  1*VALCHAR
/// VALCHAR   =  %x21-3A / %x3C-7E
fn tval(input: &str) -> IResult<&str, &str> {
    take_while1(|c| matches!(c, '\x21'..=':' | '<'..='~'))(input)
}

/// Folding whitespace: SP/HTAB runs, including lines joined by a CRLF
/// followed by more of them.
fn fws(input: &str) -> IResult<&str, &str> {
    take_while1(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))(input)
}

/// tag-value =  [ tval *( 1*(WSP / FWS) tval ) ]
///
/// Both spellings are produced in one pass: whitespace stripped for
/// the semantic value, and exactly as written so the original
/// rendering can be excised from hash input later. Trailing
/// whitespace is not part of the value, so the gap between parts is
/// only committed once another tval follows it.
fn tag_value(input: &str) -> IResult<&str, (String, String)> {
    let (mut input, first) = opt(tval)(input)?;
    let Some(first) = first else {
        return Ok((input, (String::new(), String::new())));
    };

    let mut value = first.to_owned();
    let mut raw_value = first.to_owned();
    while let Ok((rest, (gap, part))) = pair(fws, tval)(input) {
        value.push_str(part);
        raw_value.push_str(gap);
        raw_value.push_str(part);
        input = rest;
    }

    Ok((input, (value, raw_value)))
}

/// Resolve the `a=` tag for the given signature form. The legacy form
/// only ever used rsa-sha1; an absent tag means the same.
pub(crate) fn parse_hash_algo(kind: SignatureKind, value: Option<&str>) -> Result<HashAlgo, DKIMError> {
    match kind {
        SignatureKind::DomainKey => match value {
            None | Some("rsa-sha1") => Ok(HashAlgo::RsaSha1),
            Some(e) => Err(DKIMError::UnsupportedHashAlgorithm(e.to_string())),
        },
        SignatureKind::Dkim => match value {
            Some("rsa-sha1") => Ok(HashAlgo::RsaSha1),
            Some("rsa-sha256") => Ok(HashAlgo::RsaSha256),
            Some("ed25519-sha256") => Ok(HashAlgo::Ed25519Sha256),
            Some(e) => Err(DKIMError::UnsupportedHashAlgorithm(e.to_string())),
            None => Err(DKIMError::SignatureMissingRequiredTag("a")),
        },
    }
}

/// Parses the `c=` tag into (header, body) canonicalization. A bare
/// token fixes the header side and leaves the body side at its default;
/// `hdr/body` selects the halves independently. Each form has its own
/// set of recognized modes.
pub(crate) fn parse_canonicalization(
    kind: SignatureKind,
    value: Option<&str>,
) -> Result<(Type, Type), DKIMError> {
    let parse_one = |s: &str| -> Result<Type, DKIMError> {
        let t = match s {
            "simple" => Type::Simple,
            "relaxed" => Type::Relaxed,
            "nowsp" => Type::Nowsp,
            v => return Err(DKIMError::UnsupportedCanonicalizationType(v.to_owned())),
        };
        let allowed = match kind {
            SignatureKind::DomainKey => t != Type::Relaxed,
            SignatureKind::Dkim => t != Type::Nowsp,
        };
        if !allowed {
            return Err(DKIMError::UnsupportedCanonicalizationType(s.to_owned()));
        }
        Ok(t)
    };

    match value {
        None => Ok((Type::Simple, Type::Simple)),
        Some(s) => match s.split_once('/') {
            Some((hdr, body)) => Ok((parse_one(hdr)?, parse_one(body)?)),
            None => {
                let hdr = parse_one(s)?;
                // The legacy form applies the single token to both
                // halves; the v1 form defaults the body side to simple.
                let body = match kind {
                    SignatureKind::DomainKey => hdr,
                    SignatureKind::Dkim => Type::Simple,
                };
                Ok((hdr, body))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(tags: &[Tag]) -> Vec<(&str, &str)> {
        tags.iter()
            .map(|t| (t.name.as_str(), t.value.as_str()))
            .collect()
    }

    #[test]
    fn test_tag_list_basic() {
        let (rest, tags) = tag_list("v=1; a=rsa-sha256; d=example.com").unwrap();
        assert_eq!(rest, "");
        assert_eq!(
            pairs(&tags),
            vec![("v", "1"), ("a", "rsa-sha256"), ("d", "example.com")]
        );
    }

    #[test]
    fn test_tag_list_loose_whitespace() {
        let (_, tags) = tag_list("  d = example.com ;s=sel;").unwrap();
        assert_eq!(pairs(&tags), vec![("d", "example.com"), ("s", "sel")]);
    }

    #[test]
    fn test_tag_value_folding() {
        let (_, tags) = tag_list("h=from :\r\n\t to; b=c2ln YXR1cmU=").unwrap();
        assert_eq!(tags[0].value, "from:to");
        assert_eq!(tags[0].raw_value, "from :\r\n\t to");
        // base64 split across whitespace joins up in the value but the
        // raw spelling is retained
        assert_eq!(tags[1].value, "c2lnYXR1cmU=");
        assert_eq!(tags[1].raw_value, "c2ln YXR1cmU=");
    }

    #[test]
    fn test_tag_value_empty() {
        let (_, tags) = tag_list("p=; g=").unwrap();
        assert_eq!(pairs(&tags), vec![("p", ""), ("g", "")]);
    }

    #[test]
    fn test_tag_name_alnumpunc() {
        let (_, tags) = tag_list("x_test2=yes").unwrap();
        assert_eq!(pairs(&tags), vec![("x_test2", "yes")]);
    }

    #[test]
    fn test_tag_list_rejects_nameless() {
        assert!(tag_list("=value").is_err());
        assert!(tag_list(";").is_err());
        assert!(tag_list("").is_err());
    }

    #[test]
    fn test_canonicalization_empty() {
        assert_eq!(
            parse_canonicalization(SignatureKind::Dkim, None).unwrap(),
            (Type::Simple, Type::Simple)
        );
    }

    #[test]
    fn test_canonicalization_one_algo() {
        assert_eq!(
            parse_canonicalization(SignatureKind::Dkim, Some("simple")).unwrap(),
            (Type::Simple, Type::Simple)
        );
        assert_eq!(
            parse_canonicalization(SignatureKind::Dkim, Some("relaxed")).unwrap(),
            (Type::Relaxed, Type::Simple)
        );
        assert_eq!(
            parse_canonicalization(SignatureKind::DomainKey, Some("nowsp")).unwrap(),
            (Type::Nowsp, Type::Nowsp)
        );
    }

    #[test]
    fn test_canonicalization_pair() {
        assert_eq!(
            parse_canonicalization(SignatureKind::Dkim, Some("relaxed/simple")).unwrap(),
            (Type::Relaxed, Type::Simple)
        );
        assert_eq!(
            parse_canonicalization(SignatureKind::Dkim, Some("simple/relaxed")).unwrap(),
            (Type::Simple, Type::Relaxed)
        );
    }

    #[test]
    fn test_canonicalization_per_form() {
        assert_eq!(
            parse_canonicalization(SignatureKind::Dkim, Some("nowsp")).unwrap_err(),
            DKIMError::UnsupportedCanonicalizationType("nowsp".to_owned())
        );
        assert_eq!(
            parse_canonicalization(SignatureKind::DomainKey, Some("relaxed")).unwrap_err(),
            DKIMError::UnsupportedCanonicalizationType("relaxed".to_owned())
        );
        assert_eq!(
            parse_canonicalization(SignatureKind::Dkim, Some("flattened")).unwrap_err(),
            DKIMError::UnsupportedCanonicalizationType("flattened".to_owned())
        );
    }

    #[test]
    fn test_hash_algo_per_form() {
        assert_eq!(
            parse_hash_algo(SignatureKind::DomainKey, None).unwrap(),
            HashAlgo::RsaSha1
        );
        assert_eq!(
            parse_hash_algo(SignatureKind::DomainKey, Some("rsa-sha256")).unwrap_err(),
            DKIMError::UnsupportedHashAlgorithm("rsa-sha256".to_owned())
        );
        assert_eq!(
            parse_hash_algo(SignatureKind::Dkim, Some("rsa-sha256")).unwrap(),
            HashAlgo::RsaSha256
        );
        assert_eq!(
            parse_hash_algo(SignatureKind::Dkim, Some("rsa-md5")).unwrap_err(),
            DKIMError::UnsupportedHashAlgorithm("rsa-md5".to_owned())
        );
    }
}
