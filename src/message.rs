use crate::DKIMError;

/// One header as received: folded lines joined, original casing and
/// whitespace retained, terminator normalized to CRLF.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHeader {
    name: String,
    raw: Vec<u8>,
    colon: Option<usize>,
}

impl RawHeader {
    pub(crate) fn new(raw: Vec<u8>) -> Self {
        let first_line_end = raw
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(raw.len());
        let colon = raw[..first_line_end].iter().position(|&b| b == b':');
        let name_end = colon.unwrap_or(first_line_end);
        let name = String::from_utf8_lossy(&raw[..name_end]).trim().to_string();
        Self { name, raw, colon }
    }

    /// Field name with surrounding whitespace trimmed, original case.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The whole logical line: name, colon, folded value, CRLF.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Bytes before the colon, untrimmed.
    pub fn name_bytes(&self) -> &[u8] {
        &self.raw[..self.colon.unwrap_or(self.raw.len())]
    }

    /// Everything after the colon, folding and terminator included.
    pub fn value_bytes(&self) -> &[u8] {
        match self.colon {
            Some(idx) => &self.raw[idx + 1..],
            None => b"",
        }
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Header(RawHeader),
    EndOfHeaders,
    Body(Vec<u8>),
    End,
}

#[derive(Debug, PartialEq)]
enum Phase {
    Headers,
    Body,
    Done,
}

/// Incremental parser for an RFC-5322-shaped message. Bytes go in as
/// arbitrary chunks; logical events come out. Bare LF terminators are
/// rewritten to CRLF on the way through, so downstream canonicalization
/// only ever sees CRLF.
pub struct MessageParser {
    phase: Phase,
    line: Vec<u8>,
    pending: Option<Vec<u8>>,
    body_prev_cr: bool,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageParser {
    pub fn new() -> Self {
        Self {
            phase: Phase::Headers,
            line: Vec::new(),
            pending: None,
            body_prev_cr: false,
        }
    }

    pub fn feed(&mut self, mut chunk: &[u8]) -> Result<Vec<MessageEvent>, DKIMError> {
        let mut events = Vec::new();

        while self.phase == Phase::Headers && !chunk.is_empty() {
            match memchr::memchr(b'\n', chunk) {
                Some(idx) => {
                    self.line.extend_from_slice(&chunk[..idx]);
                    chunk = &chunk[idx + 1..];
                    let line = std::mem::take(&mut self.line);
                    self.header_line(&line, &mut events)?;
                }
                None => {
                    self.line.extend_from_slice(chunk);
                    chunk = b"";
                }
            }
        }

        match self.phase {
            Phase::Headers => {}
            Phase::Body => {
                if !chunk.is_empty() {
                    events.push(MessageEvent::Body(self.normalize_body(chunk)));
                }
            }
            Phase::Done => {
                return Err(DKIMError::ParseError(
                    "data after end of message".to_owned(),
                ))
            }
        }

        Ok(events)
    }

    pub fn finish(&mut self) -> Result<Vec<MessageEvent>, DKIMError> {
        let mut events = Vec::new();
        match self.phase {
            Phase::Headers => {
                if !self.line.is_empty() {
                    let line = std::mem::take(&mut self.line);
                    self.header_line(&line, &mut events)?;
                }
                self.flush_pending(&mut events);
                events.push(MessageEvent::EndOfHeaders);
            }
            Phase::Body => {}
            Phase::Done => {
                return Err(DKIMError::ParseError(
                    "message already finished".to_owned(),
                ))
            }
        }
        self.phase = Phase::Done;
        events.push(MessageEvent::End);
        Ok(events)
    }

    /// `line` is one physical line without its LF; a trailing CR is
    /// stripped here, which is what turns bare-LF input into CRLF.
    fn header_line(
        &mut self,
        line: &[u8],
        events: &mut Vec<MessageEvent>,
    ) -> Result<(), DKIMError> {
        let content = match line.last() {
            Some(b'\r') => &line[..line.len() - 1],
            _ => line,
        };

        if content.is_empty() {
            self.flush_pending(events);
            events.push(MessageEvent::EndOfHeaders);
            self.phase = Phase::Body;
            return Ok(());
        }

        if content[0] == b' ' || content[0] == b'\t' {
            let pending = self.pending.as_mut().ok_or_else(|| {
                DKIMError::ParseError("continuation line with no preceding header".to_owned())
            })?;
            pending.extend_from_slice(content);
            pending.extend_from_slice(b"\r\n");
            return Ok(());
        }

        self.flush_pending(events);
        let mut raw = content.to_vec();
        raw.extend_from_slice(b"\r\n");
        self.pending = Some(raw);
        Ok(())
    }

    fn flush_pending(&mut self, events: &mut Vec<MessageEvent>) {
        if let Some(raw) = self.pending.take() {
            events.push(MessageEvent::Header(RawHeader::new(raw)));
        }
    }

    fn normalize_body(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len());
        for &b in chunk {
            if b == b'\n' && !self.body_prev_cr {
                out.push(b'\r');
            }
            out.push(b);
            self.body_prev_cr = b == b'\r';
        }
        out
    }
}
