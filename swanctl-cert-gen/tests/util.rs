#![allow(dead_code)]

use std::{
	fs,
	path::{Path, PathBuf},
	sync::{Arc, Mutex, MutexGuard},
	thread,
	time::Duration,
};

use assert_fs::prelude::*;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use swanctl_cert_gen::{
	Authority, CertificateField, DistinguishedName, EngineError, FieldValue, IssuanceRequest,
	KeyAlgorithm, Layout, PkiEngine, SubjectInput, TarGzPackager, UsageFlag, WorkflowConfig,
};
use time::OffsetDateTime;

/// Engine operations, in pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
	ReadField,
	GenerateKey,
	GenerateRequest,
	IssueCertificate,
	ExportPkcs12,
}

/// What a [`ScriptedEngine`] was asked to do.
#[derive(Debug, Default)]
pub struct Record {
	pub calls: Vec<Op>,
	pub alt_names: Vec<String>,
	pub issued_days: Option<u32>,
	pub flags: Vec<UsageFlag>,
}

/// Deterministic [`PkiEngine`] that records its calls and can be told to
/// fail or stall at one operation. Clones share their [`Record`].
#[derive(Clone)]
pub struct ScriptedEngine {
	authority_expires: OffsetDateTime,
	fail_at: Option<Op>,
	stall_at: Option<(Op, Duration)>,
	record: Arc<Mutex<Record>>,
}

impl ScriptedEngine {
	pub fn new(authority_expires: OffsetDateTime) -> Self {
		Self {
			authority_expires,
			fail_at: None,
			stall_at: None,
			record: Arc::default(),
		}
	}
	pub fn failing_at(mut self, op: Op) -> Self {
		self.fail_at = Some(op);
		self
	}
	pub fn stalling_at(mut self, op: Op, delay: Duration) -> Self {
		self.stall_at = Some((op, delay));
		self
	}
	pub fn record(&self) -> MutexGuard<'_, Record> {
		self.record.lock().unwrap()
	}

	fn enter(&self, op: Op) -> Result<(), EngineError> {
		self.record().calls.push(op);
		if let Some((at, delay)) = self.stall_at {
			if at == op {
				thread::sleep(delay);
			}
		}
		if self.fail_at == Some(op) {
			return Err(EngineError::Other(format!("scripted failure at {op:?}")));
		}
		Ok(())
	}
}

fn fake_pem(label: &str, body: &str) -> String {
	format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----\n")
}

impl PkiEngine for ScriptedEngine {
	fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<String, EngineError> {
		self.enter(Op::GenerateKey)?;
		Ok(fake_pem("PRIVATE KEY", &format!("{algorithm}")))
	}

	fn generate_request(
		&self,
		_private_key_pem: &str,
		subject: &DistinguishedName,
		alt_names: &[String],
	) -> Result<String, EngineError> {
		self.enter(Op::GenerateRequest)?;
		self.record().alt_names = alt_names.to_vec();
		Ok(fake_pem("CERTIFICATE REQUEST", &subject.to_string()))
	}

	fn issue_certificate(
		&self,
		csr_pem: &str,
		_authority: &Authority,
		lifetime_days: u32,
		flags: &[UsageFlag],
	) -> Result<String, EngineError> {
		self.enter(Op::IssueCertificate)?;
		let mut record = self.record();
		record.issued_days = Some(lifetime_days);
		record.flags = flags.to_vec();
		drop(record);
		let subject = csr_pem.lines().nth(1).unwrap_or_default();
		Ok(fake_pem("CERTIFICATE", &format!("{subject} / {lifetime_days}d")))
	}

	fn read_certificate_field(
		&self,
		_cert_pem: &str,
		field: CertificateField,
	) -> Result<FieldValue, EngineError> {
		self.enter(Op::ReadField)?;
		Ok(match field {
			CertificateField::NotAfter => FieldValue::Time(self.authority_expires),
			CertificateField::CommonName => FieldValue::Text("Scripted CA".into()),
		})
	}

	fn export_pkcs12(
		&self,
		private_key_pem: &str,
		cert_pem: &str,
		_ca_cert_pem: &str,
		name: &str,
	) -> Result<Vec<u8>, EngineError> {
		self.enter(Op::ExportPkcs12)?;
		Ok(format!("{name}|{}|{}", private_key_pem.len(), cert_pem.len()).into_bytes())
	}
}

/// Temporary swanctl tree, scratch area and CA files.
pub struct Fixture {
	pub temp: assert_fs::TempDir,
	pub base: PathBuf,
	pub scratch: PathBuf,
	pub ca_cert: PathBuf,
	pub ca_key: PathBuf,
}

impl Fixture {
	/// Fixture with placeholder CA files, for use with [`ScriptedEngine`].
	pub fn new() -> anyhow::Result<Self> {
		Self::with_authority(&Authority {
			cert_pem: fake_pem("CERTIFICATE", "ca"),
			key_pem: fake_pem("PRIVATE KEY", "ca"),
		})
	}

	pub fn with_authority(authority: &Authority) -> anyhow::Result<Self> {
		let temp = assert_fs::TempDir::new()?;
		let scratch = temp.child("scratch");
		scratch.create_dir_all()?;
		let ca_cert = temp.child("ca/ca.pem");
		ca_cert.write_str(&authority.cert_pem)?;
		let ca_key = temp.child("ca/ca.key");
		ca_key.write_str(&authority.key_pem)?;
		Ok(Self {
			base: temp.path().join("swanctl"),
			scratch: scratch.to_path_buf(),
			ca_cert: ca_cert.to_path_buf(),
			ca_key: ca_key.to_path_buf(),
			temp,
		})
	}

	pub fn config(&self) -> WorkflowConfig {
		WorkflowConfig {
			layout: Layout::new(&self.base),
			timeout: Duration::from_secs(10),
			scratch_dir: Some(self.scratch.clone()),
			..WorkflowConfig::default()
		}
	}

	pub fn packager(&self) -> TarGzPackager {
		TarGzPackager::new()
	}

	pub fn request(&self, lifetime: &str, subject: SubjectInput) -> IssuanceRequest {
		IssuanceRequest {
			ca_certificate: self.ca_cert.clone(),
			ca_key: self.ca_key.clone(),
			lifetime: lifetime.into(),
			output: self.temp.path().join("bundle.tar.gz"),
			subject,
		}
	}

	/// Entries left in the scratch directory.
	pub fn scratch_entries(&self) -> usize {
		fs::read_dir(&self.scratch).map(|d| d.count()).unwrap_or(0)
	}

	/// Unfinished archives left next to the output.
	pub fn archive_temps(&self) -> usize {
		fs::read_dir(self.temp.path())
			.map(|d| {
				d.filter_map(Result::ok)
					.filter(|e| e.file_name().to_string_lossy().starts_with(".swanctl-archive-"))
					.count()
			})
			.unwrap_or(0)
	}
}

pub fn alice() -> SubjectInput {
	SubjectInput {
		given_name: "Alice".into(),
		surname: "Example".into(),
		country_name: "US".into(),
		..SubjectInput::default()
	}
}

/// Members of a `.tar.gz` archive with their contents.
pub fn unpack(path: &Path) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
	use std::io::Read;
	let file = fs::File::open(path)?;
	let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
	let mut members = Vec::new();
	for entry in archive.entries()? {
		let mut entry = entry?;
		let name = entry.path()?.to_string_lossy().into_owned();
		let mut content = Vec::new();
		entry.read_to_end(&mut content)?;
		members.push((name, content));
	}
	Ok(members)
}

/// A self-signed Ed25519 CA expiring at `not_after`.
pub fn authority(not_after: OffsetDateTime) -> anyhow::Result<Authority> {
	let key = KeyPair::generate_for(&rcgen::PKCS_ED25519)?;
	let mut params = CertificateParams::default();
	params.distinguished_name.push(DnType::CommonName, "strongSwan Root CA");
	params.distinguished_name.push(DnType::OrganizationName, "Crab widgits SE");
	params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
	params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
	params.not_after = not_after;
	let cert = params.self_signed(&key)?;
	Ok(Authority {
		cert_pem: cert.pem(),
		key_pem: key.serialize_pem(),
	})
}
