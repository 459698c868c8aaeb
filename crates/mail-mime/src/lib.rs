//! The MIME body pipeline (§4.E): the part tree, mailcap lookup, and
//! the view/save/pipe/print/decode/compose operations built on top of
//! it, plus the per-session temporary-attachment registry.

pub mod compose;
pub mod mailcap;
pub mod part;
pub mod save;
pub mod tempreg;
pub mod view;

pub use compose::{compose_or_edit, ComposeKind};
pub use mailcap::{lookup as mailcap_lookup, MailcapEntry};
pub use part::{parse_message, Disposition, Encoding, Envelope, MimePart};
pub use save::{decode_and_save, pipe_attachment, print_attachment, save_attachment, SaveOption};
pub use tempreg::TempAttachments;
pub use view::{view_attachment, ViewMode, ViewOutcome};
