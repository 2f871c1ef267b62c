mod error_message;
mod probe_response;

pub use error_message::ErrorMessage;
pub use probe_response::ProbeDetails;
pub use probe_response::ProbeResponse;
