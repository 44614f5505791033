//! Text wire format for objective functions.
//!
//! Functions cross process boundaries (logging, inspection tools) as a
//! single comma-separated record:
//!
//! ```text
//! H,<ctxLen>,<ctx>,<dim>,<pieces>,<degree>,<weight>,D,<domain>,G,<gel_0>,...,F,<piece_0>,...
//! ```
//!
//! - `<domain>` is the domain text form with `,` replaced by `;`.
//! - `G` lists the grid cell size per dimension.
//! - Each piece writes, per dimension, `[X]lo,[X]hi,` (an `X` marks an open
//!   end) followed by its `degree * dim + 1` coefficients.
//! - There is no trailing comma after the last coefficient.
//!
//! Long records can be split into packets `P,<id>,<count>,<index>,<chunk>`
//! and joined back with [`join_packets`].

use std::fmt::Write as _;

use crate::domain::{Domain, DomainError};
use crate::function::ObjectiveFunction;
use crate::map::{MapError, PiecewiseMap};
use crate::piece::{Degree, Interval, Piece, PieceError};
use crate::text;

/// Space reserved in each packet for the header fields.
const PACKET_HEADER_ALLOWANCE: usize = 50;

/// Errors raised while decoding records or packets.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// The record is empty.
    #[error("empty record")]
    Empty,

    /// A section marker was not where the grammar puts it.
    #[error("expected marker {expected}, found {found:?}")]
    MissingMarker {
        /// The marker the grammar requires.
        expected: &'static str,
        /// What was found instead.
        found: String,
    },

    /// The record ended before a field.
    #[error("record ended before field {field}")]
    UnexpectedEnd {
        /// The field being read.
        field: &'static str,
    },

    /// A numeric field could not be parsed.
    #[error("field {field} has invalid value {value:?}")]
    InvalidNumber {
        /// The field being read.
        field: &'static str,
        /// The raw text.
        value: String,
    },

    /// The degree field is outside 0..=2.
    #[error("unsupported degree {degree}")]
    InvalidDegree {
        /// The raw degree.
        degree: u8,
    },

    /// The header dimension disagrees with the domain.
    #[error("header declares {declared} dimension(s), domain has {actual}")]
    DimensionMismatch {
        /// Dimension in the header.
        declared: usize,
        /// Dimension of the decoded domain.
        actual: usize,
    },

    /// Characters remain after the last piece.
    #[error("unexpected trailing data {rest:?}")]
    TrailingData {
        /// The unread remainder.
        rest: String,
    },

    /// The packet set is malformed or incomplete.
    #[error("packet error: {reason}")]
    Packet {
        /// What is wrong with the packets.
        reason: String,
    },

    /// The embedded domain is invalid.
    #[error("domain error: {source}")]
    Domain {
        /// The underlying domain error.
        #[from]
        source: DomainError,
    },

    /// A decoded piece is invalid.
    #[error("piece error: {source}")]
    Piece {
        /// The underlying piece error.
        #[from]
        source: PieceError,
    },

    /// The decoded pieces do not form a valid map.
    #[error("map error: {source}")]
    Map {
        /// The underlying map error.
        #[from]
        source: MapError,
    },
}

/// Encode a function as a wire record.
pub fn encode(function: &ObjectiveFunction) -> String {
    let map = function.map();
    let domain = map.domain();
    let context = function.context();

    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write!(
        out,
        "H,{},{},{},{},{},{},D,{},G,",
        context.len(),
        context,
        domain.size(),
        map.len(),
        map.degree().as_u8(),
        text::compact(function.weight()),
        domain.to_string().replace(',', ";"),
    );
    for size in map.grid().gel_size() {
        let _ = write!(out, "{size},");
    }
    out.push_str("F,");

    let mut fields: Vec<String> = Vec::new();
    for piece in map.pieces() {
        for iv in piece.bounds() {
            fields.push(bound_field(iv.lo, iv.lo_open));
            fields.push(bound_field(iv.hi, iv.hi_open));
        }
        fields.extend(piece.coeffs().iter().map(|&c| text::coefficient(c)));
    }
    out.push_str(&fields.join(","));
    out
}

/// Decode a wire record back into a function.
///
/// # Errors
///
/// Returns a [`CodecError`] describing the first grammar violation.
pub fn decode(record: &str) -> Result<ObjectiveFunction, CodecError> {
    let mut reader = Reader::new(record)?;
    let context = reader.context()?;
    let dim: usize = reader.number("dim")?;
    let piece_count: usize = reader.number("pieces")?;
    let raw_degree: u8 = reader.number("degree")?;
    let degree = Degree::from_u8(raw_degree).ok_or(CodecError::InvalidDegree { degree: raw_degree })?;
    let weight: f64 = reader.number("weight")?;

    reader.marker("D")?;
    let domain: Domain = reader.field("domain")?.replace(';', ",").parse()?;
    if domain.size() != dim {
        return Err(CodecError::DimensionMismatch {
            declared: dim,
            actual: domain.size(),
        });
    }

    reader.marker("G")?;
    let gel_size = (0..dim)
        .map(|_| reader.number::<u32>("gel"))
        .collect::<Result<Vec<_>, _>>()?;

    reader.marker("F")?;
    let coefficient_count = degree.coefficient_count(dim);
    let mut pieces = Vec::with_capacity(piece_count);
    for _ in 0..piece_count {
        let mut bounds = Vec::with_capacity(dim);
        for _ in 0..dim {
            let (lo, lo_open) = reader.bound("lo")?;
            let (hi, hi_open) = reader.bound("hi")?;
            bounds.push(Interval {
                lo,
                hi,
                lo_open,
                hi_open,
            });
        }
        let coeffs = (0..coefficient_count)
            .map(|_| reader.number::<f64>("coefficient"))
            .collect::<Result<Vec<_>, _>>()?;
        pieces.push(Piece::new(bounds, degree, coeffs)?);
    }
    reader.finish()?;

    let mut map = PiecewiseMap::from_pieces(domain, degree, pieces)?;
    map.set_gel_size(gel_size);
    Ok(ObjectiveFunction::new(map, weight).with_context(context))
}

/// Read only the context string of a record.
///
/// # Errors
///
/// Returns a [`CodecError`] if the header is malformed.
pub fn decode_context(record: &str) -> Result<String, CodecError> {
    Reader::new(record)?.context()
}

/// Split a record into packets of at most `packet_size` bytes.
///
/// Each packet is `P,<id>,<count>,<index>,<chunk>` with a 1-based index.
/// The chunk body holds `packet_size - (len(id) + 50)` bytes.
///
/// # Errors
///
/// Returns [`CodecError::Packet`] if `packet_size` leaves no room for a
/// body.
pub fn split_packets(record: &str, id: &str, packet_size: usize) -> Result<Vec<String>, CodecError> {
    let header = id.len().saturating_add(PACKET_HEADER_ALLOWANCE);
    let body = packet_size
        .checked_sub(header)
        .filter(|&b| b > 0)
        .ok_or_else(|| CodecError::Packet {
            reason: format!("packet size {packet_size} leaves no room after a {header} byte header"),
        })?;
    let count = (record.len() / body).saturating_add(1);

    let bytes = record.as_bytes();
    let mut packets = Vec::with_capacity(count);
    for index in 0..count {
        let start = index.saturating_mul(body).min(bytes.len());
        let end = start.saturating_add(body).min(bytes.len());
        let chunk = bytes.get(start..end).unwrap_or_default();
        packets.push(format!(
            "P,{id},{count},{},{}",
            index.saturating_add(1),
            String::from_utf8_lossy(chunk)
        ));
    }
    Ok(packets)
}

/// Join packets produced by [`split_packets`] back into `(id, record)`.
///
/// Packets may arrive in any order.
///
/// # Errors
///
/// Returns [`CodecError::Packet`] if packets are malformed, disagree on id
/// or count, or if any index is missing or repeated.
pub fn join_packets<S: AsRef<str>>(packets: &[S]) -> Result<(String, String), CodecError> {
    let packet_error = |reason: &str| CodecError::Packet {
        reason: reason.to_owned(),
    };
    let mut id: Option<&str> = None;
    let mut count: Option<usize> = None;
    let mut chunks: Vec<(usize, &str)> = Vec::with_capacity(packets.len());

    for packet in packets {
        let mut parts = packet.as_ref().splitn(5, ',');
        if parts.next() != Some("P") {
            return Err(packet_error("packet does not start with P"));
        }
        let this_id = parts.next().ok_or_else(|| packet_error("missing packet id"))?;
        let this_count: usize = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| packet_error("missing packet count"))?;
        let index: usize = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| packet_error("missing packet index"))?;
        let chunk = parts.next().unwrap_or("");

        if *id.get_or_insert(this_id) != this_id {
            return Err(packet_error("packets carry different ids"));
        }
        if *count.get_or_insert(this_count) != this_count {
            return Err(packet_error("packets disagree on packet count"));
        }
        chunks.push((index, chunk));
    }

    let (Some(id), Some(count)) = (id, count) else {
        return Err(packet_error("no packets"));
    };
    chunks.sort_by_key(|&(index, _)| index);
    let in_order = chunks.len() == count
        && chunks
            .iter()
            .enumerate()
            .all(|(i, &(index, _))| i.checked_add(1) == Some(index));
    if !in_order {
        return Err(packet_error("packet indices are incomplete or repeated"));
    }
    let record: String = chunks.iter().map(|&(_, chunk)| chunk).collect();
    Ok((id.to_owned(), record))
}

fn bound_field(value: u32, open: bool) -> String {
    if open {
        format!("X{value}")
    } else {
        value.to_string()
    }
}

/// Cursor over the comma-separated fields of a record.
struct Reader<'a> {
    rest: &'a str,
}

impl<'a> Reader<'a> {
    fn new(record: &'a str) -> Result<Self, CodecError> {
        if record.is_empty() {
            return Err(CodecError::Empty);
        }
        let mut reader = Self { rest: record };
        reader.marker("H")?;
        Ok(reader)
    }

    /// Next field up to (not including) the next comma, or the remainder
    /// of the record if no comma is left.
    fn field(&mut self, field: &'static str) -> Result<&'a str, CodecError> {
        if self.rest.is_empty() {
            return Err(CodecError::UnexpectedEnd { field });
        }
        match self.rest.split_once(',') {
            Some((head, tail)) => {
                self.rest = tail;
                Ok(head)
            }
            None => {
                let head = self.rest;
                self.rest = "";
                Ok(head)
            }
        }
    }

    fn marker(&mut self, expected: &'static str) -> Result<(), CodecError> {
        let found = self.field(expected)?;
        if found == expected {
            Ok(())
        } else {
            Err(CodecError::MissingMarker {
                expected,
                found: found.to_owned(),
            })
        }
    }

    fn number<T: std::str::FromStr>(&mut self, field: &'static str) -> Result<T, CodecError> {
        let raw = self.field(field)?;
        raw.parse().ok().ok_or_else(|| CodecError::InvalidNumber {
            field,
            value: raw.to_owned(),
        })
    }

    /// Piece bound with its optional `X` open marker.
    fn bound(&mut self, field: &'static str) -> Result<(u32, bool), CodecError> {
        let raw = self.field(field)?;
        let (digits, open) = raw.strip_prefix('X').map_or((raw, false), |d| (d, true));
        let value = digits.parse().ok().ok_or_else(|| CodecError::InvalidNumber {
            field,
            value: raw.to_owned(),
        })?;
        Ok((value, open))
    }

    /// Context string: a declared byte length followed by exactly that many
    /// bytes, so the context may itself contain commas.
    fn context(&mut self) -> Result<String, CodecError> {
        let len: usize = self.number("context length")?;
        let context = self
            .rest
            .get(..len)
            .ok_or(CodecError::UnexpectedEnd { field: "context" })?;
        let after = self.rest.get(len..).unwrap_or("");
        self.rest = after
            .strip_prefix(',')
            .ok_or(CodecError::UnexpectedEnd { field: "dim" })?;
        Ok(context.to_owned())
    }

    fn finish(self) -> Result<(), CodecError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingData {
                rest: self.rest.to_owned(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn course_speed() -> Domain {
        Domain::new()
            .with_variable("course", 0.0, 359.0, 360)
            .unwrap()
            .with_variable("speed", 0.0, 8.0, 9)
            .unwrap()
    }

    fn sample_function() -> ObjectiveFunction {
        let pieces = vec![
            Piece::new(
                vec![Interval::closed(0, 179), Interval::closed(0, 8)],
                Degree::Linear,
                vec![0.5, -2.0, 10.0],
            )
            .unwrap(),
            Piece::new(
                vec![
                    Interval {
                        lo: 179,
                        hi: 359,
                        lo_open: true,
                        hi_open: false,
                    },
                    Interval::closed(0, 8),
                ],
                Degree::Linear,
                vec![0.0, 1.25, 3.0],
            )
            .unwrap(),
        ];
        let mut map = PiecewiseMap::from_pieces(course_speed(), Degree::Linear, pieces).unwrap();
        map.set_gel_size(vec![90, 3]);
        ObjectiveFunction::new(map, 100.0).with_context("12:waypoint")
    }

    #[test]
    fn encodes_exact_grammar() {
        let record = encode(&sample_function());
        assert_eq!(
            record,
            "H,11,12:waypoint,2,2,1,100,D,course;0;359;360:speed;0;8;9,G,90,3,F,\
             0,179,0,8,0.5,-2.,10.,X179,359,0,8,0,1.25,3."
        );
    }

    #[test]
    fn decodes_what_it_encodes() {
        let original = sample_function();
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded.context(), "12:waypoint");
        assert!((decoded.weight() - 100.0).abs() < f64::EPSILON);
        assert_eq!(decoded.map().grid().gel_size(), &[90, 3]);
        assert_eq!(decoded.map().pieces(), original.map().pieces());
        assert_eq!(decoded.domain(), original.domain());
    }

    #[test]
    fn context_may_contain_commas() {
        let f = sample_function().with_context("3:a,b");
        let decoded = decode(&encode(&f)).unwrap();
        assert_eq!(decoded.context(), "3:a,b");
        assert_eq!(decode_context(&encode(&f)).unwrap(), "3:a,b");
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(matches!(decode(""), Err(CodecError::Empty)));
        assert!(matches!(
            decode("Q,0,,1"),
            Err(CodecError::MissingMarker { expected: "H", .. })
        ));
        let record = encode(&sample_function());
        let truncated = record.get(..record.len() - 4).unwrap();
        assert!(decode(truncated).is_err());
        let extra = format!("{record},7");
        assert!(matches!(decode(&extra), Err(CodecError::TrailingData { .. })));
        let bad_degree = record.replacen(",2,2,1,", ",2,2,7,", 1);
        assert!(matches!(decode(&bad_degree), Err(CodecError::InvalidDegree { degree: 7 })));
    }

    #[test]
    fn packets_split_and_join() {
        let record = encode(&sample_function());
        let packets = split_packets(&record, "fn7", 70).unwrap();
        // Body is 70 - (3 + 50) = 17 bytes.
        assert_eq!(packets.len(), record.len() / 17 + 1);
        assert!(packets.first().unwrap().starts_with(&format!("P,fn7,{},1,", packets.len())));

        let mut shuffled = packets.clone();
        shuffled.reverse();
        let (id, joined) = join_packets(&shuffled).unwrap();
        assert_eq!(id, "fn7");
        assert_eq!(joined, record);
    }

    #[test]
    fn packets_reject_gaps_and_tiny_sizes() {
        assert!(split_packets("H,0,", "abc", 40).is_err());
        let packets = split_packets(&encode(&sample_function()), "x", 60).unwrap();
        let gappy: Vec<&String> = packets.iter().skip(1).collect();
        assert!(matches!(join_packets(&gappy), Err(CodecError::Packet { .. })));
        let empty: [&str; 0] = [];
        assert!(join_packets(&empty).is_err());
    }
}
