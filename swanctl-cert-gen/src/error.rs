use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;
use time::OffsetDateTime;

use crate::workflow::Step;

/// Errors raised while issuing an identity bundle.
///
/// Every variant carries the paths, dates or counts needed to reproduce the
/// failure from the log alone.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
	/// Neither a common name nor a given name or surname was supplied.
	#[error("no common name supplied and none derivable from given name and surname")]
	MissingIdentity,
	/// The resolved common name cannot be used as a file name.
	#[error("common name {common_name:?} is not usable as an identifier: {reason}")]
	InvalidIdentity {
		/// The resolved common name.
		common_name: String,
		/// Why the derived identifier was rejected.
		reason: &'static str,
	},
	/// The requested lifetime is not a positive whole number of years.
	#[error("lifetime {value:?} is not a positive number of years")]
	InvalidLifetime {
		/// The raw value as supplied.
		value: String,
	},
	/// The certificate would outlive the authority that signs it.
	#[error(
		"a lifetime of {years} year(s) expires {expires}, which is not before the CA expiration {authority_expires}"
	)]
	LifetimeExceedsAuthority {
		/// Requested lifetime in years.
		years: u32,
		/// Computed expiration of the new certificate.
		expires: OffsetDateTime,
		/// `notAfter` of the CA certificate.
		authority_expires: OffsetDateTime,
	},
	/// The CA certificate could not be parsed.
	#[error("unable to read CA certificate {path}")]
	AuthorityUnreadable {
		/// Path to the CA certificate.
		path: PathBuf,
		/// Underlying engine error.
		#[source]
		source: EngineError,
	},
	/// Private key generation failed.
	#[error("unable to generate private key {path}")]
	KeyGenerationFailed {
		/// Where the key was to be written.
		path: PathBuf,
		/// Underlying engine error.
		#[source]
		source: EngineError,
	},
	/// Certificate signing request generation failed.
	#[error("unable to generate certificate request for \"{subject}\"")]
	CsrGenerationFailed {
		/// Serialized distinguished name.
		subject: String,
		/// Underlying engine error.
		#[source]
		source: EngineError,
	},
	/// Signing the request with the CA failed.
	#[error("unable to issue certificate {path} valid for {days} day(s)")]
	CertificateIssuanceFailed {
		/// Where the certificate was to be written.
		path: PathBuf,
		/// Requested lifetime in days.
		days: u32,
		/// Underlying engine error.
		#[source]
		source: EngineError,
	},
	/// PKCS#12 export failed.
	#[error("unable to export PKCS#12 container {path}")]
	Pkcs12ExportFailed {
		/// Where the container was to be written.
		path: PathBuf,
		/// Underlying engine error.
		#[source]
		source: EngineError,
	},
	/// Building the output archive failed.
	#[error("unable to package archive {output}")]
	PackagingFailed {
		/// Requested archive path.
		output: PathBuf,
		/// Underlying I/O error.
		#[source]
		source: io::Error,
	},
	/// An engine or packager call did not finish in time.
	#[error("{step} did not finish within {}s", .timeout.as_secs_f32())]
	ExternalToolTimeout {
		/// The step that timed out.
		step: Step,
		/// The configured bound.
		timeout: Duration,
	},
	/// A file or directory is not writable or readable.
	#[error("permission denied on {path}")]
	FilesystemPermissionDenied {
		/// The offending path.
		path: PathBuf,
		/// Underlying I/O error.
		#[source]
		source: io::Error,
	},
	/// The run was cancelled by the operator.
	#[error("interrupted during {step}")]
	Interrupted {
		/// The step that was running.
		step: Step,
	},
	/// Any other filesystem error.
	#[error("I/O error on {path}")]
	Io {
		/// The offending path.
		path: PathBuf,
		/// Underlying I/O error.
		#[source]
		source: io::Error,
	},
}

impl Error {
	/// Classify an I/O error on `path`, singling out permission problems.
	pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
		let path = path.into();
		match source.kind() {
			io::ErrorKind::PermissionDenied => Error::FilesystemPermissionDenied { path, source },
			_ => Error::Io { path, source },
		}
	}
}

/// Failures reported by a [`PkiEngine`](crate::PkiEngine).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
	/// Error from rcgen while generating or signing.
	#[error(transparent)]
	Rcgen(#[from] rcgen::Error),
	/// Input was not valid PEM.
	#[error("invalid PEM: {0}")]
	Pem(#[from] pem::PemError),
	/// Certificate DER could not be parsed.
	#[error("invalid certificate: {0}")]
	Certificate(String),
	/// The certificate has no value for the requested field.
	#[error("certificate has no {0}")]
	MissingField(&'static str),
	/// The PKCS#12 writer rejected its input.
	#[error("PKCS#12: {0}")]
	Pkcs12(String),
	/// A scripted failure, used by test engines.
	#[error("{0}")]
	Other(String),
}
