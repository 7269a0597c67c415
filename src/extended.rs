//! Extended-data chunk reassembly.
//!
//! A response too large for one frame arrives as chunks tagged with
//! `seqnum`/`seqlen`. Follow-up chunks are pulled one at a time with
//! `get_extended_data` calls on the original correlation id - strictly
//! sequentially, so the id is never shared by two outstanding calls -
//! then merged into a single logical response.

use ciborium::Value;

use crate::correlator::{Correlator, TimeoutPolicy};
use crate::error::{KeywireError, Result};
use crate::protocol::{Message, Request, GET_EXTENDED_DATA};

/// Fetch the remaining chunks of an extended response and merge them.
///
/// `initial` must already satisfy [`Message::is_extended`]. Each returned
/// chunk is validated before the next fetch: its `seqnum` must equal the
/// expected index exactly and its `seqlen` must match the initial
/// declaration.
///
/// # Errors
///
/// [`KeywireError::Sequencing`] on any order or length mismatch; no
/// partial result is returned. Fetch calls propagate correlator errors
/// (timeout, connection closed) unchanged.
pub(crate) async fn resolve_extended(
    correlator: &Correlator,
    initial: Message,
    request_id: &str,
    timeout: TimeoutPolicy,
) -> Result<Message> {
    let total = initial.seqlen.unwrap_or(0);
    let first = initial.seqnum.unwrap_or(0);
    tracing::debug!(id = %request_id, chunk = first + 1, total, "receiving extended data");

    let mut chunks = vec![initial];

    let mut expected = first + 1;
    while expected < total {
        let request = Request::new(
            request_id,
            GET_EXTENDED_DATA,
            Some(Value::Map(vec![(
                Value::Text("seqnum".to_string()),
                Value::Integer(expected.into()),
            )])),
        );
        let chunk = correlator.call(&request, timeout).await?;

        if chunk.seqnum != Some(expected) {
            return Err(KeywireError::Sequencing(format!(
                "expected chunk {}, got {:?}",
                expected, chunk.seqnum
            )));
        }
        if chunk.seqlen != Some(total) {
            return Err(KeywireError::Sequencing(format!(
                "inconsistent seqlen: expected {}, got {:?}",
                total, chunk.seqlen
            )));
        }

        tracing::debug!(id = %request_id, chunk = expected + 1, total, "received extended chunk");
        chunks.push(chunk);
        expected += 1;
    }

    Ok(reassemble(chunks))
}

/// Merge an ordered chunk collection into one logical response.
fn reassemble(mut chunks: Vec<Message>) -> Message {
    // Redundant with the sequential fetch, but cheap to keep honest.
    chunks.sort_by_key(|c| c.seqnum.unwrap_or(0));

    let count = chunks.len();
    let mut merged = Message {
        id: chunks[0].id.clone(),
        error: chunks[0].error.clone(),
        ..Message::default()
    };

    // An error chunk is terminal; later chunks are never touched.
    if merged.error.is_some() {
        return merged;
    }

    merged.result = Some(merge_results(chunks));
    tracing::debug!(chunks = count, "extended data reassembly complete");
    merged
}

/// Homogeneous merge keyed on the first chunk's payload type.
fn merge_results(chunks: Vec<Message>) -> Value {
    let mut results = chunks.into_iter().map(|c| c.result.unwrap_or(Value::Null));
    let first = match results.next() {
        Some(v) => v,
        None => Value::Null,
    };

    match first {
        Value::Bytes(mut merged) => {
            for chunk in results {
                if let Value::Bytes(more) = chunk {
                    merged.extend_from_slice(&more);
                }
            }
            Value::Bytes(merged)
        }
        Value::Text(mut merged) => {
            for chunk in results {
                if let Value::Text(more) = chunk {
                    merged.push_str(&more);
                }
            }
            Value::Text(merged)
        }
        Value::Array(mut merged) => {
            for chunk in results {
                if let Value::Array(more) = chunk {
                    merged.extend(more);
                }
            }
            Value::Array(merged)
        }
        Value::Map(mut merged) => {
            // Last write wins on key collision across chunks.
            for chunk in results {
                if let Value::Map(more) = chunk {
                    for (key, value) in more {
                        match merged.iter_mut().find(|(k, _)| *k == key) {
                            Some(slot) => slot.1 = value,
                            None => merged.push((key, value)),
                        }
                    }
                }
            }
            Value::Map(merged)
        }
        other => {
            // Chunked responses carry bytes, text, arrays, or maps; any
            // other type indicates a protocol mismatch.
            tracing::warn!("unmergeable extended data payload, returning first chunk");
            other
        }
    }
}
