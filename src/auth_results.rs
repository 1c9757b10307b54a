use crate::message::RawHeader;
use crate::result::DKIMResult;

pub const AUTHENTICATION_RESULTS_NAME: &str = "Authentication-Results";
const DOMAINKEY_STATUS_NAME: &str = "DomainKey-Status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    Sender,
    From,
}

impl OriginKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::From => "from",
        }
    }
}

/// The address a verdict is annotated with; Sender wins over From when
/// both are present.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageOrigin {
    pub kind: OriginKind,
    pub address: String,
}

impl MessageOrigin {
    pub fn domain(&self) -> Option<&str> {
        self.address.rsplit_once('@').map(|(_, domain)| domain)
    }
}

pub fn message_origin(headers: &[RawHeader]) -> Option<MessageOrigin> {
    for (name, kind) in [("Sender", OriginKind::Sender), ("From", OriginKind::From)] {
        if let Some(header) = headers.iter().find(|h| h.is_named(name)) {
            if let Some(address) = extract_address(header.value_bytes()) {
                return Some(MessageOrigin { kind, address });
            }
        }
    }
    None
}

/// Minimal mailbox extraction: the angle-addr when present, otherwise
/// the first token containing an `@`.
fn extract_address(value: &[u8]) -> Option<String> {
    let value = String::from_utf8_lossy(value);
    if let Some(start) = value.find('<') {
        let rest = &value[start + 1..];
        let end = rest.find('>')?;
        let addr = rest[..end].trim();
        if addr.is_empty() {
            return None;
        }
        return Some(addr.to_string());
    }
    value
        .split_whitespace()
        .find(|token| token.contains('@'))
        .map(|token| token.trim_matches(',').to_string())
}

/// Render the result header inserted at the top of the header section:
/// `Authentication-Results: <hostname> [sender=..|from=..]; dkim=pass`.
/// The method token follows the scheme of the signature that backed
/// the verdict.
pub fn authentication_results(
    hostname: &str,
    origin: Option<&MessageOrigin>,
    result: &DKIMResult,
) -> String {
    let method = result.kind().map(|k| k.method_name()).unwrap_or("dkim");
    let mut value = hostname.to_string();
    if let Some(origin) = origin {
        value.push_str(&format!(" {}={}", origin.kind.label(), origin.address));
    }
    format!(
        "{}: {}; {}={}",
        AUTHENTICATION_RESULTS_NAME,
        value,
        method,
        result.to_detail_string()
    )
}

/// Drop pre-existing result headers bearing our hostname, so a relayed
/// message cannot smuggle a verdict in. Folded continuation lines go
/// with their header.
pub fn strip_result_headers(headers: &[RawHeader], hostname: &str) -> Vec<RawHeader> {
    headers
        .iter()
        .filter(|h| !is_stale_result_header(h, hostname))
        .cloned()
        .collect()
}

fn is_stale_result_header(header: &RawHeader, hostname: &str) -> bool {
    if !header.is_named(AUTHENTICATION_RESULTS_NAME) && !header.is_named(DOMAINKEY_STATUS_NAME) {
        return false;
    }
    let value = String::from_utf8_lossy(header.value_bytes());
    match value.split_whitespace().next() {
        Some(first) => first.trim_end_matches(';').eq_ignore_ascii_case(hostname),
        None => false,
    }
}

/// The rewritten header section for re-emission: the fresh result
/// header first, then the surviving received headers, then the blank
/// separator line. The caller streams the body through unchanged.
pub fn rewritten_header_section(
    hostname: &str,
    origin: Option<&MessageOrigin>,
    result: &DKIMResult,
    headers: &[RawHeader],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(authentication_results(hostname, origin, result).as_bytes());
    out.extend_from_slice(b"\r\n");
    for header in strip_result_headers(headers, hostname) {
        out.extend_from_slice(header.raw());
    }
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageEvent, MessageParser};
    use crate::result::{SignatureResult, Verdict};
    use crate::DKIMError;

    fn headers(raw: &[u8]) -> Vec<RawHeader> {
        let mut parser = MessageParser::new();
        let mut events = parser.feed(raw).unwrap();
        events.extend(parser.finish().unwrap());
        events
            .into_iter()
            .filter_map(|ev| match ev {
                MessageEvent::Header(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_message_origin_prefers_sender() {
        let hs = headers(b"From: Alice <alice@a.example>\r\nSender: bob@b.example\r\n\r\n");
        let origin = message_origin(&hs).unwrap();
        assert_eq!(origin.kind, OriginKind::Sender);
        assert_eq!(origin.address, "bob@b.example");
        assert_eq!(origin.domain(), Some("b.example"));
    }

    #[test]
    fn test_message_origin_angle_addr() {
        let hs = headers(b"From: \"Alice Q.\" <alice@example.org>\r\n\r\n");
        let origin = message_origin(&hs).unwrap();
        assert_eq!(origin.kind, OriginKind::From);
        assert_eq!(origin.address, "alice@example.org");
    }

    #[test]
    fn test_render_pass() {
        let result = crate::result::DKIMResult::collated(
            &SignatureResult::pass(false),
            Some("example.com"),
            crate::SignatureKind::Dkim,
        );
        let origin = MessageOrigin {
            kind: OriginKind::From,
            address: "alice@example.com".to_string(),
        };
        assert_eq!(
            authentication_results("mx.example.net", Some(&origin), &result),
            "Authentication-Results: mx.example.net from=alice@example.com; dkim=pass"
        );
    }

    #[test]
    fn test_render_legacy_fail_detail() {
        let result = crate::result::DKIMResult::collated(
            &SignatureResult::rejected(&DKIMError::SignatureDidNotVerify, false),
            Some("example.com"),
            crate::SignatureKind::DomainKey,
        );
        assert_eq!(
            authentication_results("mx.example.net", None, &result),
            "Authentication-Results: mx.example.net; domainkeys=fail (signature did not verify)"
        );
        assert_eq!(result.verdict(), Verdict::Fail);
    }

    #[test]
    fn test_strip_result_headers() {
        let hs = headers(
            b"Authentication-Results: mx.example.net;\r\n\tdkim=pass\r\n\
              Authentication-Results: other.host; dkim=fail\r\n\
              DomainKey-Status: mx.example.net good\r\n\
              From: a@b.c\r\n\r\n",
        );
        let kept = strip_result_headers(&hs, "mx.example.net");
        let names: Vec<&str> = kept.iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["Authentication-Results", "From"]);
        // the folded line vanished along with its header
        assert!(kept.iter().all(|h| !h.raw().windows(6).any(|w| w == b"\tdkim=")));
    }

    #[test]
    fn test_rewritten_header_section() {
        let hs = headers(b"From: a@b.c\r\nSubject: hi\r\n\r\n");
        let result = crate::result::DKIMResult::none();
        let section = rewritten_header_section("mx.example.net", None, &result, &hs);
        assert_eq!(
            section,
            b"Authentication-Results: mx.example.net; dkim=none\r\nFrom: a@b.c\r\nSubject: hi\r\n\r\n"
        );
    }
}
