//! NUL-terminated framing.
//!
//! Command bodies carry one trailing NUL. The printer echoes requests back on
//! the request topic with the terminator intact, so it has to come off before
//! JSON decoding. Reports are never framed.

use super::constants::FRAME_TERMINATOR;
use super::topic::TopicCategory;

/// Append the terminator to an outbound body.
pub fn frame(mut body: Vec<u8>) -> Vec<u8> {
    body.push(FRAME_TERMINATOR);
    body
}

/// Strip a single trailing terminator from request-category payloads.
pub fn unframe<'a>(category: &TopicCategory, payload: &'a [u8]) -> &'a [u8] {
    match (category, payload.split_last()) {
        (TopicCategory::Request, Some((&FRAME_TERMINATOR, rest))) => rest,
        _ => payload,
    }
}
