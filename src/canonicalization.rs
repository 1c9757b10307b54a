use crate::hash::LimitHasher;

#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub enum Type {
    Simple,
    Relaxed,
    /// Legacy DomainKeys mode: all whitespace is insignificant.
    Nowsp,
}

impl Type {
    pub fn canon_name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
            Self::Nowsp => "nowsp",
        }
    }
}

fn is_wsp(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Canonicalize one header given as (name, value) where `value` is
/// everything after the first colon, folding and terminator included.
/// In simple mode the output is byte-identical to the original line
/// modulo the guaranteed CRLF terminator.
/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.4>
/// covers simple and relaxed; nowsp is the legacy DomainKeys mode from
/// <https://datatracker.ietf.org/doc/html/rfc4870#section-3.4.1>.
pub(crate) fn canon_header_into(mode: Type, name: &[u8], value: &[u8], out: &mut Vec<u8>) {
    match mode {
        Type::Simple => {
            out.extend_from_slice(name);
            out.push(b':');
            out.extend_from_slice(value);
            if !out.ends_with(b"\r\n") {
                out.extend_from_slice(b"\r\n");
            }
        }
        Type::Relaxed => {
            let name = trim_ws_end(name);
            for &b in name {
                out.push(b.to_ascii_lowercase());
            }
            out.push(b':');

            let value = trim_ws_start(trim_ws_end(value));
            let mut space_run = false;
            for &b in value {
                match b {
                    b'\r' | b'\n' => {}
                    b' ' | b'\t' => {
                        if space_run {
                            continue;
                        }
                        space_run = true;
                        out.push(b' ');
                    }
                    _ => {
                        space_run = false;
                        out.push(b);
                    }
                }
            }
            out.extend_from_slice(b"\r\n");
        }
        Type::Nowsp => {
            for &b in name {
                if !is_wsp(b) && b != b'\r' && b != b'\n' {
                    out.push(b.to_ascii_lowercase());
                }
            }
            out.push(b':');
            for &b in value {
                if !is_wsp(b) && b != b'\r' && b != b'\n' {
                    out.push(b);
                }
            }
            out.extend_from_slice(b"\r\n");
        }
    }
}

fn trim_ws_start(mut bytes: &[u8]) -> &[u8] {
    while let Some(c) = bytes.first() {
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => bytes = &bytes[1..],
            _ => break,
        }
    }
    bytes
}

fn trim_ws_end(mut bytes: &[u8]) -> &[u8] {
    while let Some(c) = bytes.last() {
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => bytes = &bytes[..bytes.len() - 1],
            _ => break,
        }
    }
    bytes
}

/// Streaming body canonicalizer. Accepts the body in arbitrary chunks,
/// writes the canonical form into the downstream hasher, and resolves
/// the trailing-empty-line rule at `finish`.
///
/// Empty lines are held back in `blank_run` until a later line proves
/// they are not trailing; only then are they written downstream.
pub(crate) struct BodyCanonicalizer {
    mode: Type,
    line: Vec<u8>,
    saw_cr: bool,
    blank_run: usize,
}

impl BodyCanonicalizer {
    pub fn new(mode: Type) -> Self {
        Self {
            mode,
            line: Vec::new(),
            saw_cr: false,
            blank_run: 0,
        }
    }

    pub fn write(&mut self, bytes: &[u8], out: &mut LimitHasher) {
        for &b in bytes {
            if self.saw_cr {
                self.saw_cr = false;
                if b == b'\n' {
                    self.end_line(out);
                    continue;
                }
                // Lone CR, keep it as line content.
                self.line.push(b'\r');
            }
            match b {
                b'\r' => self.saw_cr = true,
                // Bare LF terminates a line too; the message parser
                // rewrites those before we see them, but the filter
                // stays total over arbitrary input.
                b'\n' => self.end_line(out),
                _ => self.line.push(b),
            }
        }
    }

    pub fn finish(mut self, out: &mut LimitHasher) {
        if self.saw_cr {
            self.line.push(b'\r');
            self.saw_cr = false;
        }
        // An unterminated final line is completed with a CRLF; held
        // back trailing empty lines are dropped.
        if !self.line.is_empty() {
            self.end_line(out);
        }
    }

    fn end_line(&mut self, out: &mut LimitHasher) {
        let blank = match self.mode {
            Type::Simple => self.line.is_empty(),
            Type::Relaxed | Type::Nowsp => self.line.iter().all(|&b| is_wsp(b)),
        };

        if blank {
            match self.mode {
                // nowsp drops whitespace-only lines outright.
                Type::Nowsp => {}
                _ => self.blank_run += 1,
            }
            self.line.clear();
            return;
        }

        for _ in 0..self.blank_run {
            out.hash(b"\r\n");
        }
        self.blank_run = 0;

        match self.mode {
            Type::Simple => out.hash(&self.line),
            Type::Relaxed => {
                let line = trim_ws_end(&self.line);
                let mut space_run = false;
                let mut start = 0;
                for (idx, &b) in line.iter().enumerate() {
                    if is_wsp(b) {
                        if !space_run {
                            out.hash(&line[start..idx]);
                            out.hash(b" ");
                            space_run = true;
                        }
                        start = idx + 1;
                    } else if space_run {
                        space_run = false;
                        start = idx;
                    }
                }
                out.hash(&line[start..]);
            }
            Type::Nowsp => {
                for &b in &self.line {
                    if !is_wsp(b) {
                        out.hash(&[b]);
                    }
                }
            }
        }
        out.hash(b"\r\n");
        self.line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashImpl;

    fn copy_hasher() -> LimitHasher {
        LimitHasher {
            hasher: HashImpl::copy_data(),
            limit: usize::MAX,
            hashed: 0,
        }
    }

    fn canon_body(mode: Type, data: &[u8]) -> Vec<u8> {
        let mut out = copy_hasher();
        let mut canon = BodyCanonicalizer::new(mode);
        canon.write(data, &mut out);
        canon.finish(&mut out);
        out.finalize_bytes()
    }

    fn canon_body_chunked(mode: Type, data: &[u8], step: usize) -> Vec<u8> {
        let mut out = copy_hasher();
        let mut canon = BodyCanonicalizer::new(mode);
        for chunk in data.chunks(step) {
            canon.write(chunk, &mut out);
        }
        canon.finish(&mut out);
        out.finalize_bytes()
    }

    fn header(mode: Type, name: &str, value: &[u8]) -> Vec<u8> {
        let mut out = vec![];
        canon_header_into(mode, name.as_bytes(), value, &mut out);
        out
    }

    #[test]
    fn test_canon_header_simple() {
        assert_eq!(
            header(Type::Simple, "SUBJect", b" AbC\r\n"),
            b"SUBJect: AbC\r\n"
        );
        assert_eq!(
            header(Type::Simple, "Subject", b" folded\r\n\tvalue\r\n"),
            b"Subject: folded\r\n\tvalue\r\n"
        );
    }

    #[test]
    fn test_canon_header_relaxed() {
        assert_eq!(
            header(Type::Relaxed, "SUBJect", b" AbC\r\n"),
            b"subject:AbC\r\n"
        );
        assert_eq!(
            header(Type::Relaxed, "Subject \t", b"\t Your Name\t \r\n"),
            b"subject:Your Name\r\n"
        );
        assert_eq!(
            header(Type::Relaxed, "Subject \t", b"\t Kimi \t \r\n No \t\r\n Na Wa\r\n"),
            b"subject:Kimi No Na Wa\r\n"
        );
    }

    #[test]
    fn test_canon_header_nowsp() {
        assert_eq!(
            header(Type::Nowsp, "SUBJect", b" A b C\r\n"),
            b"subject:AbC\r\n"
        );
        assert_eq!(
            header(Type::Nowsp, "X-Folded", b" one\r\n\ttwo \r\n"),
            b"x-folded:onetwo\r\n"
        );
    }

    #[test]
    fn test_canon_body_simple() {
        assert_eq!(canon_body(Type::Simple, b""), b"");
        assert_eq!(canon_body(Type::Simple, b"\r\n"), b"");
        assert_eq!(canon_body(Type::Simple, b"\r\n\r\n\r\n"), b"");
        assert_eq!(
            canon_body(Type::Simple, b"hey        \r\n"),
            b"hey        \r\n"
        );
        assert_eq!(
            canon_body(Type::Simple, b" C \r\nD \t E\r\n\r\n\r\n"),
            b" C \r\nD \t E\r\n"
        );
        // unterminated final line gains exactly one CRLF
        assert_eq!(canon_body(Type::Simple, b"abc"), b"abc\r\n");
        // interior empty lines survive
        assert_eq!(canon_body(Type::Simple, b"a\r\n\r\nb\r\n"), b"a\r\n\r\nb\r\n");
    }

    #[test]
    fn test_canon_body_relaxed() {
        assert_eq!(canon_body(Type::Relaxed, b""), b"");
        assert_eq!(canon_body(Type::Relaxed, b"\r\n"), b"");
        assert_eq!(canon_body(Type::Relaxed, b"hey        \r\n"), b"hey\r\n");
        assert_eq!(
            canon_body(Type::Relaxed, b" C \r\nD \t E\r\n\r\n\r\n"),
            b" C\r\nD E\r\n"
        );
        // a whitespace-only line becomes an interior empty line
        assert_eq!(
            canon_body(Type::Relaxed, b"a\r\n \t \r\nb\r\n"),
            b"a\r\n\r\nb\r\n"
        );
    }

    #[test]
    fn test_canon_body_nowsp() {
        assert_eq!(canon_body(Type::Nowsp, b""), b"");
        assert_eq!(
            canon_body(Type::Nowsp, b"one two\tthree\r\n"),
            b"onetwothree\r\n"
        );
        // lines reduced to nothing are dropped entirely
        assert_eq!(
            canon_body(Type::Nowsp, b"a\r\n \t \r\n\r\nb\r\n"),
            b"a\r\nb\r\n"
        );
    }

    #[test]
    fn test_canon_body_chunk_boundaries() {
        let data = b" C \r\nD \t E\r\n\r\nF\r\n\r\n\r\n";
        for mode in [Type::Simple, Type::Relaxed, Type::Nowsp] {
            let whole = canon_body(mode, data);
            for step in 1..data.len() {
                assert_eq!(
                    canon_body_chunked(mode, data, step),
                    whole,
                    "mode {:?} step {}",
                    mode,
                    step
                );
            }
        }
    }

    #[test]
    fn test_canon_body_idempotent() {
        let samples: &[&[u8]] = &[
            b"",
            b"\r\n",
            b"hello\r\nworld \r\n\r\n",
            b" a  b\t\tc\r\n \r\nd\r\n\r\n\r\n",
            b"no terminator",
        ];
        for mode in [Type::Simple, Type::Relaxed, Type::Nowsp] {
            for sample in samples {
                let once = canon_body(mode, sample);
                let twice = canon_body(mode, &once);
                assert_eq!(twice, once, "mode {:?} sample {:?}", mode, sample);
            }
        }
    }

    #[test]
    fn test_canon_header_idempotent() {
        for mode in [Type::Relaxed, Type::Nowsp] {
            let first = header(mode, "Subject \t", b"\t On  two \r\n lines\r\n");
            let colon = first.iter().position(|&b| b == b':').unwrap();
            let mut second = vec![];
            canon_header_into(mode, &first[..colon], &first[colon + 1..], &mut second);
            assert_eq!(second, first, "mode {:?}", mode);
        }
    }
}
