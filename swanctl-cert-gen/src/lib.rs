#![warn(missing_docs)]
//! This library issues strongSwan end-entity identities: a private key, a
//! certificate signed by an existing CA and a PKCS#12 container, packed into
//! one archive for hand-over to the client.
//!
//! The cryptography sits behind [`PkiEngine`] ([`RcgenEngine`] wraps
//! [rcgen]) and packaging behind [`Packager`] ([`TarGzPackager`]), both
//! driven by [`Workflow`].

mod deadline;
pub mod engine;
mod error;
pub mod lifetime;
pub mod packager;
pub mod subject;
pub mod workflow;

pub use deadline::Cancellation;
pub use engine::{
	Authority, CertificateField, FieldValue, KeyAlgorithm, PkiEngine, RcgenEngine, UsageFlag,
};
pub use error::{EngineError, Error};
pub use lifetime::{Lifetime, LifetimeYears};
pub use packager::{Packager, PackagingScratch, TarGzPackager};
pub use subject::{DistinguishedName, RdnType, Subject, SubjectInput};
pub use workflow::{
	Artifact, IssuanceReport, IssuanceRequest, IssuedBundle, Layout, LifetimePolicy, Step, Workflow,
	WorkflowConfig,
};

/// A specialized `Result` type.
pub type Result<T> = std::result::Result<T, Error>;
