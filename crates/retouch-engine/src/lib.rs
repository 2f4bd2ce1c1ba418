//! Image-editing engine: source decoding, the Gemini edit client, and the
//! controller that ties them to the editor state.

pub mod client;
pub mod codec;
pub mod controller;
pub mod error;
pub mod state;

#[cfg(test)]
mod test_support;

pub use client::{EditService, GeminiEditClient};
pub use codec::{decode_local_file, decode_remote_resource, LocalFile};
pub use controller::Controller;
pub use error::{EditorError, EDIT_FAILED_MESSAGE};
pub use state::{reduce, Disposition, Effect, EditorState, Event, RequestId, SourceOrigin};
