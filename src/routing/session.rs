//! Session key extraction from the peer address or the initial request bytes.
//!
//! Cookie extraction works on the raw initial buffer as opaque bytes. The
//! buffer may hold a truncated request, arbitrary binary, or invalid UTF-8;
//! only ASCII structure is interpreted and nothing here blocks or fails.

use super::SessionMode;
use std::net::SocketAddr;

/// Cookie token that carries the session identity
const SESSION_COOKIE: &[u8] = b"SessionID";

/// Derive the session key for an accepted connection.
///
/// `ip` mode uses the peer address (no port). `cookie` mode scans the
/// initial bytes for a `SessionID` cookie and falls back to the peer
/// address when none is present.
pub fn extract(mode: SessionMode, peer: &SocketAddr, initial: &[u8]) -> String {
    match mode {
        SessionMode::Ip => peer.ip().to_string(),
        SessionMode::Cookie => {
            session_cookie(initial).unwrap_or_else(|| peer.ip().to_string())
        },
    }
}

/// Value of the `SessionID` token in the first `Cookie:` header line
fn session_cookie(initial: &[u8]) -> Option<String> {
    for line in initial.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(rest) = strip_header_name(line, b"cookie") else {
            continue;
        };

        // Only the first Cookie line is considered
        for token in rest.split(|&b| b == b';') {
            let token = trim_ascii(token);
            let mut parts = token.splitn(2, |&b| b == b'=');
            let name = parts.next().map(trim_ascii);
            if name != Some(SESSION_COOKIE) {
                continue;
            }
            let value = trim_ascii(parts.next().unwrap_or(b""));
            return Some(String::from_utf8_lossy(value).into_owned());
        }
        return None;
    }
    None
}

/// Strips a case-insensitive `name:` prefix, returning the header value
fn strip_header_name<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    if line.len() <= name.len() || line[name.len()] != b':' {
        return None;
    }
    if !line[..name.len()].eq_ignore_ascii_case(name) {
        return None;
    }
    Some(&line[name.len() + 1..])
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "1.2.3.4:56789".parse().unwrap()
    }

    #[test]
    fn ip_mode_strips_port() {
        assert_eq!(extract(SessionMode::Ip, &peer(), b""), "1.2.3.4");

        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(extract(SessionMode::Ip, &v6, b""), "::1");
    }

    #[test]
    fn cookie_mode_finds_session_id() {
        let request =
            b"GET / HTTP/1.1\r\nHost: example.com\r\nCookie: SessionID=abc123; theme=dark\r\n\r\n";
        assert_eq!(extract(SessionMode::Cookie, &peer(), request), "abc123");
    }

    #[test]
    fn cookie_name_and_value_whitespace_is_stripped() {
        let request = b"GET / HTTP/1.1\r\nCookie: theme=dark;  SessionID =  xyz \r\n\r\n";
        assert_eq!(extract(SessionMode::Cookie, &peer(), request), "xyz");
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let request = b"GET / HTTP/1.1\r\ncookie: SessionID=lower\r\n\r\n";
        assert_eq!(extract(SessionMode::Cookie, &peer(), request), "lower");
    }

    #[test]
    fn missing_cookie_falls_back_to_ip() {
        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(extract(SessionMode::Cookie, &peer(), request), "1.2.3.4");
    }

    #[test]
    fn cookie_line_without_session_id_falls_back() {
        let request = b"GET / HTTP/1.1\r\nCookie: theme=dark; lang=en\r\n\r\n";
        assert_eq!(extract(SessionMode::Cookie, &peer(), request), "1.2.3.4");
    }

    #[test]
    fn only_first_cookie_line_is_scanned() {
        let request = b"GET / HTTP/1.1\r\nCookie: theme=dark\r\nCookie: SessionID=later\r\n\r\n";
        assert_eq!(extract(SessionMode::Cookie, &peer(), request), "1.2.3.4");
    }

    #[test]
    fn binary_garbage_is_tolerated() {
        let mut request = Vec::from(&b"\xff\xfe\x00garbage\nCookie: SessionID=ok\n"[..]);
        request.extend_from_slice(&[0u8, 255, 254]);
        assert_eq!(extract(SessionMode::Cookie, &peer(), &request), "ok");
    }

    #[test]
    fn invalid_utf8_value_is_lossy_decoded() {
        let request = b"Cookie: SessionID=ab\xffcd\r\n";
        let key = extract(SessionMode::Cookie, &peer(), request);
        assert!(key.starts_with("ab"));
        assert!(key.ends_with("cd"));
    }

    #[test]
    fn truncated_buffer_does_not_panic() {
        let request = b"GET / HTTP/1.1\r\nCookie: SessionID=trunc";
        assert_eq!(extract(SessionMode::Cookie, &peer(), request), "trunc");
    }
}
