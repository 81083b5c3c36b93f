//! The issuance pipeline.
//!
//! Steps run strictly in order, each consuming the previous step's output.
//! Transient files (the certificate request, the packaging staging area and
//! the unfinished archive) are owned by the calling thread and removed on
//! every exit path, including timeouts and interruptions. Permanent artifacts already written are left
//! in place on failure; re-running with the same subject overwrites them.
//!
//! Two runs for the same subject at the same time race on the same files.

use std::{
	fmt, fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::{
	deadline::{bounded, Cancellation},
	error::EngineError,
	engine::{Authority, CertificateField, FieldValue, KeyAlgorithm, PkiEngine, UsageFlag},
	lifetime::{Lifetime, LifetimeYears},
	packager::{Packager, PackagingScratch},
	subject::{DistinguishedName, Subject, SubjectInput},
	Error, Result,
};

/// Extended key usages of every issued certificate.
pub const ISSUANCE_FLAGS: [UsageFlag; 2] = [UsageFlag::ServerAuth, UsageFlag::IkeIntermediate];

/// Mode applied to every permanent artifact, private key included.
///
/// World-readable key material is kept for compatibility with existing
/// deployments; it is a known weakness.
pub const ARTIFACT_MODE: u32 = 0o644;

/// Pipeline stages, used to label timeouts, interruptions and worker threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Step {
	ResolveSubject,
	ReadAuthority,
	ValidateLifetime,
	GenerateKey,
	GenerateRequest,
	IssueCertificate,
	ExportPkcs12,
	Package,
}

impl fmt::Display for Step {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Step::ResolveSubject => "subject resolution",
			Step::ReadAuthority => "CA certificate inspection",
			Step::ValidateLifetime => "lifetime validation",
			Step::GenerateKey => "key generation",
			Step::GenerateRequest => "request generation",
			Step::IssueCertificate => "certificate issuance",
			Step::ExportPkcs12 => "PKCS#12 export",
			Step::Package => "packaging",
		};
		f.write_str(name)
	}
}

/// What to do when the lifetime outlasts the CA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LifetimePolicy {
	/// Abort with [`Error::LifetimeExceedsAuthority`].
	#[default]
	Enforce,
	/// Log the violation and issue anyway.
	WarnOnly,
}

/// Fixed directory layout below a base directory such as `/etc/swanctl`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
	base: PathBuf,
}

impl Default for Layout {
	fn default() -> Self {
		Self::new(Self::DEFAULT_BASE)
	}
}

impl Layout {
	/// Where strongSwan's swanctl reads credentials from.
	pub const DEFAULT_BASE: &'static str = "/etc/swanctl";

	/// Layout below `base`.
	pub fn new(base: impl Into<PathBuf>) -> Self {
		Self { base: base.into() }
	}
	/// The base directory.
	pub fn base(&self) -> &Path {
		&self.base
	}
	/// Private keys.
	pub fn pkcs8_dir(&self) -> PathBuf {
		self.base.join("pkcs8")
	}
	/// End-entity certificates.
	pub fn x509_dir(&self) -> PathBuf {
		self.base.join("x509")
	}
	/// PKCS#12 containers.
	pub fn pkcs12_dir(&self) -> PathBuf {
		self.base.join("pkcs12")
	}
	/// `{base}/pkcs8/{identifier}.pem`
	pub fn key_path(&self, identifier: &str) -> PathBuf {
		self.pkcs8_dir().join(format!("{identifier}.pem"))
	}
	/// `{base}/x509/{identifier}.pem`
	pub fn certificate_path(&self, identifier: &str) -> PathBuf {
		self.x509_dir().join(format!("{identifier}.pem"))
	}
	/// `{base}/pkcs12/{identifier}.p12`
	pub fn pkcs12_path(&self, identifier: &str) -> PathBuf {
		self.pkcs12_dir().join(format!("{identifier}.p12"))
	}
	fn create_dirs(&self) -> Result<()> {
		for dir in [self.pkcs8_dir(), self.x509_dir(), self.pkcs12_dir()] {
			fs::create_dir_all(&dir).map_err(|e| Error::io(dir, e))?;
		}
		Ok(())
	}
}

/// Knobs of a [`Workflow`].
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
	/// Where artifacts are written.
	pub layout: Layout,
	/// Bound on every engine and packager call.
	pub timeout: Duration,
	/// Reaction to a lifetime outlasting the CA.
	pub lifetime_policy: LifetimePolicy,
	/// Algorithm of the generated private key.
	pub key_algorithm: KeyAlgorithm,
	/// Where the certificate request and the packaging staging directory are
	/// created; system temp dir if `None`.
	pub scratch_dir: Option<PathBuf>,
}

impl Default for WorkflowConfig {
	fn default() -> Self {
		Self {
			layout: Layout::default(),
			timeout: Duration::from_secs(60),
			lifetime_policy: LifetimePolicy::default(),
			key_algorithm: KeyAlgorithm::Ed25519,
			scratch_dir: None,
		}
	}
}

/// Caller-supplied parameters of one issuance.
#[derive(Clone, Debug)]
pub struct IssuanceRequest {
	/// CA certificate, PEM.
	pub ca_certificate: PathBuf,
	/// CA private key, PEM.
	pub ca_key: PathBuf,
	/// Lifetime in years, as supplied.
	pub lifetime: String,
	/// Archive to produce.
	pub output: PathBuf,
	/// Subject fields as supplied.
	pub subject: SubjectInput,
}

/// A file written by the workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
	/// Location on disk.
	pub path: PathBuf,
	/// Content as written.
	pub bytes: Vec<u8>,
}

/// The three permanent artifacts of a run.
#[derive(Clone, Debug)]
pub struct IssuedBundle {
	/// PKCS#8 private key.
	pub private_key: Artifact,
	/// Signed certificate.
	pub certificate: Artifact,
	/// PKCS#12 container.
	pub pkcs12: Artifact,
}

/// Outcome of a successful run.
#[derive(Clone, Debug)]
pub struct IssuanceReport {
	/// The resolved subject.
	pub subject: Subject,
	/// Subject of the issued certificate.
	pub distinguished_name: DistinguishedName,
	/// Validated lifetime.
	pub lifetime: Lifetime,
	/// Common name of the signing CA, if it has one.
	pub authority: Option<String>,
	/// The written artifacts.
	pub bundle: IssuedBundle,
	/// The packaged archive.
	pub archive: PathBuf,
}

/// Issues one identity bundle per [`run`](Self::run).
pub struct Workflow<E, P> {
	engine: Arc<E>,
	packager: Arc<P>,
	config: WorkflowConfig,
	cancel: Cancellation,
}

impl<E, P> Workflow<E, P>
where
	E: PkiEngine + 'static,
	P: Packager + 'static,
{
	/// A workflow with its own, never raised, cancellation token.
	pub fn new(engine: E, packager: P, config: WorkflowConfig) -> Self {
		Self {
			engine: Arc::new(engine),
			packager: Arc::new(packager),
			config,
			cancel: Cancellation::new(),
		}
	}
	/// Observe `cancel` between and during steps.
	pub fn cancellation(mut self, cancel: Cancellation) -> Self {
		self.cancel = cancel;
		self
	}
	/// The configuration in use.
	pub fn config(&self) -> &WorkflowConfig {
		&self.config
	}

	/// Run the pipeline for `request`, taking `now` as the issuance instant
	/// for lifetime arithmetic.
	pub fn run(&self, request: &IssuanceRequest, now: OffsetDateTime) -> Result<IssuanceReport> {
		let layout = &self.config.layout;

		self.cancel.check(Step::ResolveSubject)?;
		let subject = request.subject.resolve()?;
		let id = subject.identifier().to_string();
		info!(common_name = subject.common_name(), identifier = %id, "resolved subject");

		probe_writable(&request.output)?;

		let authority = Authority {
			cert_pem: read_to_string(&request.ca_certificate)?,
			key_pem: read_to_string(&request.ca_key)?,
		};
		let ca_path = &request.ca_certificate;
		let authority_expires = match self.read_field(ca_path, &authority, CertificateField::NotAfter)? {
			FieldValue::Time(t) => t,
			FieldValue::Text(_) => {
				return Err(Error::AuthorityUnreadable {
					path: ca_path.clone(),
					source: EngineError::MissingField("notAfter"),
				})
			},
		};
		let authority_name = match self.read_field(ca_path, &authority, CertificateField::CommonName) {
			Ok(FieldValue::Text(cn)) => Some(cn),
			Ok(FieldValue::Time(_)) | Err(Error::AuthorityUnreadable { .. }) => None,
			Err(err) => return Err(err),
		};
		debug!(ca = %ca_path.display(), %authority_expires, "read CA certificate");

		self.cancel.check(Step::ValidateLifetime)?;
		let lifetime = Lifetime::compute(request.lifetime.parse::<LifetimeYears>()?, now)?;
		if let Err(err) = lifetime.check_against(authority_expires) {
			match self.config.lifetime_policy {
				LifetimePolicy::Enforce => return Err(err),
				LifetimePolicy::WarnOnly => error!(%err, "issuing past the CA expiration"),
			}
		}
		info!(
			years = lifetime.years.get(),
			days = lifetime.days,
			expires = %lifetime.expires,
			"validated lifetime"
		);

		layout.create_dirs()?;

		let key_path = layout.key_path(&id);
		let engine = Arc::clone(&self.engine);
		let algorithm = self.config.key_algorithm;
		let key_pem = self.bounded(Step::GenerateKey, move || {
			engine.generate_key(algorithm)
		})
		.map_err(|e| e.or_else(|source| Error::KeyGenerationFailed {
			path: key_path.clone(),
			source,
		}))?;
		let private_key = write_artifact(&key_path, key_pem.clone().into_bytes())?;
		info!(path = %key_path.display(), %algorithm, "generated private key");

		let dn = subject.distinguished_name();
		let dn_string = dn.to_string();

		let csr_file = self.scratch_file("swanctl-csr-")?;
		let alt_names: Vec<String> = Some(subject.alternative_name())
			.filter(|name| !name.is_empty())
			.map(str::to_string)
			.into_iter()
			.collect();
		let engine = Arc::clone(&self.engine);
		let (key, request_dn) = (key_pem.clone(), dn.clone());
		let csr_pem = self.bounded(Step::GenerateRequest, move || {
			engine.generate_request(&key, &request_dn, &alt_names)
		})
		.map_err(|e| e.or_else(|source| Error::CsrGenerationFailed {
			subject: dn_string.clone(),
			source,
		}))?;
		fs::write(csr_file.path(), &csr_pem).map_err(|e| Error::io(csr_file.path(), e))?;
		debug!(path = %csr_file.path().display(), subject = %dn_string, "wrote certificate request");

		let cert_path = layout.certificate_path(&id);
		let engine = Arc::clone(&self.engine);
		let csr_pem = read_to_string(csr_file.path())?;
		let ca = authority.clone();
		let days = lifetime.days;
		let cert_pem = self.bounded(Step::IssueCertificate, move || {
			engine.issue_certificate(&csr_pem, &ca, days, &ISSUANCE_FLAGS)
		})
		.map_err(|e| e.or_else(|source| Error::CertificateIssuanceFailed {
			path: cert_path.clone(),
			days,
			source,
		}))?;
		let certificate = write_artifact(&cert_path, cert_pem.clone().into_bytes())?;
		info!(path = %cert_path.display(), days, flags = ?ISSUANCE_FLAGS, "issued certificate");

		let csr_path = csr_file.path().to_path_buf();
		if let Err(e) = csr_file.close() {
			warn!(path = %csr_path.display(), error = %e, "failed to remove certificate request");
		}

		let p12_path = layout.pkcs12_path(&id);
		let engine = Arc::clone(&self.engine);
		let name = subject.common_name().to_string();
		let ca_cert_pem = authority.cert_pem.clone();
		let p12 = self.bounded(Step::ExportPkcs12, move || {
			engine.export_pkcs12(&key_pem, &cert_pem, &ca_cert_pem, &name)
		})
		.map_err(|e| e.or_else(|source| Error::Pkcs12ExportFailed {
			path: p12_path.clone(),
			source,
		}))?;
		let pkcs12 = write_artifact(&p12_path, p12)?;
		info!(path = %p12_path.display(), "exported PKCS#12 container");

		let packaging_failed = |source: std::io::Error| Error::PackagingFailed {
			output: request.output.clone(),
			source,
		};
		// dropped on this thread whatever becomes of the packager thread
		let scratch = PackagingScratch::new(&request.output, self.config.scratch_dir.as_deref())
			.map_err(packaging_failed)?;
		let archive = scratch.archive().map_err(packaging_failed)?;
		let staging = scratch.staging().to_path_buf();
		let packager = Arc::clone(&self.packager);
		let files = (key_path.clone(), cert_path.clone(), p12_path.clone());
		self.bounded(Step::Package, move || {
			packager.pack(archive, &staging, &files.0, &files.1, &files.2)
		})
		.map_err(|e| e.or_else(packaging_failed))?;
		self.cancel.check(Step::Package)?;
		scratch.finish(&request.output).map_err(packaging_failed)?;
		info!(archive = %request.output.display(), "packaged identity bundle");

		Ok(IssuanceReport {
			subject,
			distinguished_name: dn,
			lifetime,
			authority: authority_name,
			bundle: IssuedBundle {
				private_key,
				certificate,
				pkcs12,
			},
			archive: request.output.clone(),
		})
	}

	fn read_field(
		&self,
		path: &Path,
		authority: &Authority,
		field: CertificateField,
	) -> Result<FieldValue> {
		let engine = Arc::clone(&self.engine);
		let cert_pem = authority.cert_pem.clone();
		self.bounded(Step::ReadAuthority, move || {
			engine.read_certificate_field(&cert_pem, field)
		})
		.map_err(|e| e.or_else(|source| Error::AuthorityUnreadable {
			path: path.to_path_buf(),
			source,
		}))
	}

	/// Run an external call under the configured timeout. The outer error is
	/// the workflow's own (timeout, interruption), the inner one the call's.
	fn bounded<T, F, X>(&self, step: Step, f: F) -> std::result::Result<T, Failure<X>>
	where
		T: Send + 'static,
		X: Send + 'static,
		F: FnOnce() -> std::result::Result<T, X> + Send + 'static,
	{
		bounded(step, self.config.timeout, &self.cancel, move || Ok(f()))
			.map_err(Failure::Workflow)?
			.map_err(Failure::Call)
	}

	fn scratch_file(&self, prefix: &str) -> Result<tempfile::NamedTempFile> {
		let mut builder = tempfile::Builder::new();
		builder.prefix(prefix).suffix(".pem");
		match &self.config.scratch_dir {
			Some(dir) => builder.tempfile_in(dir).map_err(|e| Error::io(dir, e)),
			None => builder.tempfile().map_err(|e| Error::io(std::env::temp_dir(), e)),
		}
	}
}

/// Error of a bounded call: either the bound itself or the call failed.
enum Failure<X> {
	Workflow(Error),
	Call(X),
}

impl<X> Failure<X> {
	fn or_else(self, wrap: impl FnOnce(X) -> Error) -> Error {
		match self {
			Failure::Workflow(err) => err,
			Failure::Call(source) => wrap(source),
		}
	}
}

fn read_to_string(path: &Path) -> Result<String> {
	fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Fail early if nothing can be created next to `output`.
fn probe_writable(output: &Path) -> Result<()> {
	let parent = match output.parent() {
		Some(p) if !p.as_os_str().is_empty() => p,
		_ => Path::new("."),
	};
	tempfile::Builder::new()
		.prefix(".swanctl-probe-")
		.tempfile_in(parent)
		.map(drop)
		.map_err(|e| Error::io(parent, e))
}

fn write_artifact(path: &Path, bytes: Vec<u8>) -> Result<Artifact> {
	fs::write(path, &bytes).map_err(|e| Error::io(path, e))?;
	set_mode(path)?;
	Ok(Artifact {
		path: path.to_path_buf(),
		bytes,
	})
}

#[cfg(unix)]
fn set_mode(path: &Path) -> Result<()> {
	use std::os::unix::fs::PermissionsExt;
	fs::set_permissions(path, fs::Permissions::from_mode(ARTIFACT_MODE))
		.map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path) -> Result<()> {
	Ok(())
}
