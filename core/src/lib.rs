pub mod credential;
pub mod envelope;
pub mod error;

pub use credential::{Credential, CredentialError, CredentialSource};
pub use envelope::{ContentBlock, ResultEnvelope};
pub use error::{ErrorCode, ErrorEnvelope};
