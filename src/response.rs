//! Turns response status and headers into `TransferState` updates.

use tracing::{debug, warn};

use crate::error::{TransferError, TransportFailure};
use crate::state::TransferState;
use crate::transport::ResponseHead;

/// What the server did with the requested offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehavior {
    /// Full body for a request that started at byte 0.
    FullContentResumable,
    /// 206: the body continues exactly at the requested offset.
    PartialContentConfirmed,
    /// Full body even though a non-zero offset was requested. The output
    /// must be rewritten from byte 0.
    RangeNotSupported,
    /// 416 for an offset equal to the resource size: nothing left to fetch.
    RangeAlreadySatisfied,
}

impl ServerBehavior {
    /// Whether body bytes are appended to what is already on disk.
    pub fn appends(self) -> bool {
        matches!(self, ServerBehavior::PartialContentConfirmed)
    }
}

/// Parsed `Content-Range: <unit> <start>-<end>/<total>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub total: Option<u64>,
}

pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let (unit, rest) = value.trim().split_once(' ')?;
    if unit.is_empty() {
        return None;
    }
    let (range, total) = rest.trim().split_once('/')?;

    let (start, end) = match range.trim() {
        "*" => (None, None),
        range => {
            let (start, end) = range.split_once('-')?;
            (
                Some(start.trim().parse().ok()?),
                Some(end.trim().parse().ok()?),
            )
        }
    };

    Some(ContentRange {
        start,
        end,
        total: total.trim().parse().ok(),
    })
}

/// Applies one header to `state`. Unknown or unparseable headers are ignored.
pub fn apply_header(state: &mut TransferState, name: &str, value: &str) {
    if name.eq_ignore_ascii_case("content-length") {
        match value.trim().parse::<u64>() {
            Ok(length) => state.set_declared_content_length(length),
            Err(_) => warn!(value, "ignoring unparseable Content-Length"),
        }
    } else if name.eq_ignore_ascii_case("content-range") {
        match parse_content_range(value).and_then(|range| range.total) {
            Some(total) => state.set_total_size(total),
            None => debug!(value, "Content-Range carries no usable total size"),
        }
    }
}

/// Applies a raw `Name: value` header line.
pub fn apply_header_line(state: &mut TransferState, line: &str) {
    if let Some((name, value)) = line.split_once(':') {
        apply_header(state, name.trim(), value.trim());
    }
}

fn header<'a>(head: &'a ResponseHead, name: &str) -> Option<&'a str> {
    head.headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Classifies `head` for a request that started at `requested_offset` and
/// folds its metadata into `state`.
///
/// Error statuses leave `state` untouched.
pub fn interpret(
    state: &mut TransferState,
    requested_offset: u64,
    head: &ResponseHead,
) -> Result<ServerBehavior, TransferError> {
    for (name, value) in &head.headers {
        debug!("Received header: {}: {}", name, value);
    }

    let content_range = header(head, "content-range").and_then(parse_content_range);

    if head.status == 416 {
        return match content_range.and_then(|range| range.total) {
            Some(total) if requested_offset > 0 && total == requested_offset => {
                state.set_declared_content_length(0);
                state.set_total_size(total);
                Ok(ServerBehavior::RangeAlreadySatisfied)
            }
            _ => Err(TransferError::Server { status: 416 }),
        };
    }

    if !(200..300).contains(&head.status) {
        return Err(TransferError::Server {
            status: head.status,
        });
    }

    let behavior = if head.status == 206 {
        if let Some(start) = content_range.and_then(|range| range.start) {
            if start != requested_offset {
                return Err(TransportFailure::RangeMismatch {
                    requested: requested_offset,
                    actual: start,
                }
                .into());
            }
        }
        ServerBehavior::PartialContentConfirmed
    } else if requested_offset > 0 {
        warn!(
            status = head.status,
            requested_offset, "server ignored the range request, restarting from byte 0"
        );
        state.restart();
        ServerBehavior::RangeNotSupported
    } else {
        ServerBehavior::FullContentResumable
    };

    // The declared length always describes the latest response.
    state.set_declared_content_length(0);
    for (name, value) in &head.headers {
        apply_header(state, name, value);
    }
    Ok(behavior)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TransferState {
        TransferState::new("https://example.com/file.bin", "file.bin")
    }

    #[test]
    fn content_length_any_casing() {
        for line in [
            "content-length: 4096",
            "Content-Length: 4096",
            "CONTENT-LENGTH:4096",
        ] {
            let mut s = state();
            apply_header_line(&mut s, line);
            assert_eq!(s.declared_content_length(), 4096, "{line}");
        }
    }

    #[test]
    fn content_range_total_becomes_total_size() {
        let mut s = state();
        apply_header_line(&mut s, "content-range: bytes 500-999/2000");
        assert_eq!(s.total_size(), 2000);
    }

    #[test]
    fn malformed_content_range_leaves_total_unchanged() {
        let mut s = state().at_offset(0, 1234);
        apply_header_line(&mut s, "Content-Range: bytes 0-99/*");
        apply_header_line(&mut s, "Content-Range: bytes 0-99/lots");
        apply_header_line(&mut s, "Content-Range: garbage");
        assert_eq!(s.total_size(), 1234);
    }

    #[test]
    fn bad_content_length_is_ignored() {
        let mut s = state();
        s.set_declared_content_length(10);
        apply_header_line(&mut s, "Content-Length: ten");
        assert_eq!(s.declared_content_length(), 10);
    }

    #[test]
    fn parses_unsatisfied_range_form() {
        assert_eq!(
            parse_content_range("bytes */2048"),
            Some(ContentRange {
                start: None,
                end: None,
                total: Some(2048)
            })
        );
    }

    #[test]
    fn partial_content_is_confirmed() {
        let mut s = state().at_offset(500, 0);
        let head = ResponseHead::new(206)
            .with_header("content-length", "500")
            .with_header("content-range", "bytes 500-999/1000");

        let behavior = interpret(&mut s, 500, &head).unwrap();
        assert_eq!(behavior, ServerBehavior::PartialContentConfirmed);
        assert_eq!(s.resume_offset(), 500);
        assert_eq!(s.declared_content_length(), 500);
        assert_eq!(s.total_size(), 1000);
    }

    #[test]
    fn partial_content_at_wrong_offset_is_rejected() {
        let mut s = state().at_offset(500, 0);
        let head = ResponseHead::new(206).with_header("Content-Range", "bytes 400-999/1000");

        let err = interpret(&mut s, 500, &head).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Transport(TransportFailure::RangeMismatch {
                requested: 500,
                actual: 400
            })
        ));
    }

    #[test]
    fn full_body_for_ranged_request_restarts_state() {
        let mut s = state().at_offset(500, 1000);
        let head = ResponseHead::new(200).with_header("Content-Length", "1000");

        let behavior = interpret(&mut s, 500, &head).unwrap();
        assert_eq!(behavior, ServerBehavior::RangeNotSupported);
        assert!(!behavior.appends());
        assert_eq!(s.resume_offset(), 0);
        assert_eq!(s.total_size(), 0);
        assert_eq!(s.declared_content_length(), 1000);
    }

    #[test]
    fn full_body_from_zero_is_resumable() {
        let mut s = state();
        let head = ResponseHead::new(200).with_header("Content-Length", "1000");
        assert_eq!(
            interpret(&mut s, 0, &head).unwrap(),
            ServerBehavior::FullContentResumable
        );
    }

    #[test]
    fn error_status_does_not_touch_state() {
        let mut s = state().at_offset(300, 900);
        let head = ResponseHead::new(503).with_header("Content-Length", "12");

        let err = interpret(&mut s, 300, &head).unwrap_err();
        assert!(matches!(err, TransferError::Server { status: 503 }));
        assert_eq!(s, state().at_offset(300, 900));
    }

    #[test]
    fn unsatisfiable_range_at_end_means_complete() {
        let mut s = state().at_offset(2048, 0);
        let head = ResponseHead::new(416).with_header("Content-Range", "bytes */2048");

        assert_eq!(
            interpret(&mut s, 2048, &head).unwrap(),
            ServerBehavior::RangeAlreadySatisfied
        );
        assert!(s.is_complete());
    }

    #[test]
    fn response_without_length_clears_stale_declared_length() {
        let mut s = state().at_offset(400, 0);
        s.set_declared_content_length(1000);
        let head = ResponseHead::new(206).with_header("Content-Range", "bytes 400-999/1000");

        interpret(&mut s, 400, &head).unwrap();
        assert_eq!(s.declared_content_length(), 0);
        assert_eq!(s.total_size(), 1000);
    }

    #[test]
    fn unsatisfiable_range_body_length_is_not_declared() {
        let mut s = state().at_offset(2048, 0);
        s.set_declared_content_length(2048);
        let head = ResponseHead::new(416)
            .with_header("Content-Length", "48")
            .with_header("Content-Range", "bytes */2048");

        interpret(&mut s, 2048, &head).unwrap();
        assert_eq!(s.declared_content_length(), 0);
    }

    #[test]
    fn unsatisfiable_range_elsewhere_is_server_error() {
        let mut s = state().at_offset(4096, 0);
        let head = ResponseHead::new(416).with_header("Content-Range", "bytes */2048");

        assert!(matches!(
            interpret(&mut s, 4096, &head),
            Err(TransferError::Server { status: 416 })
        ));
    }
}
