//! Email provider adapters.

mod console;
mod lemlist;
mod postmark;

pub use console::ConsoleEmail;
pub use lemlist::{
    parse_webhook as lemlist_parse, LemlistEmail, SIGNATURE_HEADER as LEMLIST_SIGNATURE_HEADER,
};
pub use postmark::{parse_webhook as postmark_parse, PostmarkEmail};
