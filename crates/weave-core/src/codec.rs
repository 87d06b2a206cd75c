//! JSON-lines encoding of an atom sequence.
//!
//! One atom per line, in the order given (normally [`Weave::to_sequence`]).
//! A receiving replica can ingest the decoded atoms in any order and rebuild
//! the same weave.
//!
//! ```text
//! # weave atoms v1
//! {"id":{"site":"A","timestamp":1,"priority":0},"payload":{"kind":"empty"}}
//! {"id":{"site":"A","timestamp":2,"priority":0},"cause":{...},"payload":{...}}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored on decode.

use crate::atom::Atom;
use crate::error::ErrorCode;
use crate::weave::Weave;

/// Header line written at the top of every encoded sequence.
pub const SEQUENCE_HEADER: &str = "# weave atoms v1";

/// Errors from encoding or decoding an atom sequence.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to serialize an atom.
    #[error("failed to encode atom: {0}")]
    Encode(#[source] serde_json::Error),

    /// A line could not be parsed as an atom.
    #[error("line {line}: invalid atom: {source}")]
    Decode {
        /// 1-based line number.
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl CodecError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Encode(_) => ErrorCode::SequenceEncodeFailed,
            Self::Decode { .. } => ErrorCode::SequenceDecodeFailed,
        }
    }
}

/// Encode atoms as a header line followed by one JSON object per line.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if an atom fails to serialize.
pub fn encode_atoms<'a>(atoms: impl IntoIterator<Item = &'a Atom>) -> Result<String, CodecError> {
    let mut out = String::from(SEQUENCE_HEADER);
    out.push('\n');
    for atom in atoms {
        let line = serde_json::to_string(atom).map_err(CodecError::Encode)?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Encode the full linearization of a weave.
///
/// # Errors
///
/// Same as [`encode_atoms`].
pub fn encode_weave(weave: &Weave) -> Result<String, CodecError> {
    encode_atoms(weave.iter())
}

/// Decode atoms from JSON-lines text.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] with the 1-based line number of the first
/// line that is not a valid atom.
pub fn decode_atoms(text: &str) -> Result<Vec<Atom>, CodecError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| CodecError::Decode {
                line: index + 1,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Payload;
    use crate::identity::{AtomId, SiteId};

    fn id(site: &str, timestamp: u64) -> AtomId {
        AtomId::new(SiteId::new(site), timestamp, 0)
    }

    #[test]
    fn encoded_weave_starts_with_header_and_has_one_line_per_atom() {
        let mut weave = Weave::new();
        weave
            .insert(Atom::root(id("A", 1), Payload::Empty))
            .expect("root");
        weave
            .insert(Atom::child(id("A", 2), id("A", 1), "line\nbreak".into()))
            .expect("child");

        let text = encode_weave(&weave).expect("encode");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], SEQUENCE_HEADER);
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn decode_restores_content() {
        let atoms = vec![
            Atom::root(id("A", 1), Payload::Bytes(vec![1, 2, 3])),
            Atom::child(
                id("B", 4),
                id("A", 1),
                Payload::Json(serde_json::json!({"op": "tombstone"})),
            ),
        ];
        let text = encode_atoms(&atoms).expect("encode");
        let decoded = decode_atoms(&text).expect("decode");
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].same_content(&atoms[0]));
        assert!(decoded[1].same_content(&atoms[1]));
    }

    #[test]
    fn decode_skips_comments_and_blank_lines() {
        let text = "# header\n\n{\"id\":{\"site\":\"A\",\"timestamp\":1}}\n   \n";
        let decoded = decode_atoms(text).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].payload(), &Payload::Empty);
    }

    #[test]
    fn decode_error_reports_line_number() {
        let text = "# weave atoms v1\n{\"id\":{\"site\":\"A\",\"timestamp\":1}}\nnot json\n";
        let err = decode_atoms(text).expect_err("should fail");
        assert!(matches!(err, CodecError::Decode { line: 3, .. }));
        assert_eq!(err.code(), ErrorCode::SequenceDecodeFailed);
    }
}
