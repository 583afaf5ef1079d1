//! External collaborators of the task manager: the generation backend
//! and the credential pool.
//!
//! Both are modeled as traits so the runner depends only on the
//! contract — the HTTP implementation here is one provider, and tests
//! substitute scripted ones.

pub mod client;
pub mod credentials;
pub mod events;

pub use client::{BackendError, EventStream, GenerationBackend, HttpGenerationBackend};
pub use credentials::{CostClass, Credential, CredentialError, CredentialPool, StaticCredentialPool};
pub use events::{parse_line, BackendEvent, JobSpec};
