//! Transcript ingestion for the xchat relay.
//!
//! Turns an append-only JSONL transcript into a stream of complete lines
//! (`TailCursor`, `TranscriptTail`) and narrows those lines down to
//! user-authored utterances (`extract_user_utterance`).

pub mod tail_cursor;
pub mod transcript_tail;
pub mod utterance_extractor;

pub use tail_cursor::{TailCursor, TailRead};
pub use transcript_tail::{TailOptions, TranscriptLineHandler, TranscriptTail};
pub use utterance_extractor::{
    collect_text_segments, extract_user_utterance, strip_untrusted_metadata,
    CONVERSATION_INFO_MARKER, SENDER_INFO_MARKER,
};
