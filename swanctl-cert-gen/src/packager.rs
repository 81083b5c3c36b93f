//! Packs the issued key, certificate and PKCS#12 container into a single
//! gzip-compressed tar archive.

use std::{
	fs::{self, File},
	io,
	path::Path,
};

use flate2::{write::GzEncoder, Compression};
use tracing::debug;

/// Archive member name of the private key.
pub const KEY_NAME: &str = "key.pem";
/// Archive member name of the certificate.
pub const CERTIFICATE_NAME: &str = "certificate.pem";
/// Archive member name of the PKCS#12 container.
pub const PKCS12_NAME: &str = "certificate.p12";

/// Produces the final deliverable from the three issued files.
pub trait Packager: Send + Sync {
	/// Write an archive of `key`, `certificate` and `pkcs12` into `archive`.
	/// `staging` is an empty directory the packager may use freely; both are
	/// owned and removed by the caller.
	fn pack(
		&self,
		archive: File,
		staging: &Path,
		key: &Path,
		certificate: &Path,
		pkcs12: &Path,
	) -> io::Result<()>;
}

/// [`Packager`] writing a `.tar.gz` archive. Inputs are staged under their
/// archive names before being appended.
#[derive(Clone, Copy, Debug, Default)]
pub struct TarGzPackager;

impl TarGzPackager {
	/// A packager with default compression.
	pub fn new() -> Self {
		Self
	}
}

impl Packager for TarGzPackager {
	fn pack(
		&self,
		archive: File,
		staging: &Path,
		key: &Path,
		certificate: &Path,
		pkcs12: &Path,
	) -> io::Result<()> {
		debug!(staging = %staging.display(), "staging bundle");
		let members = [(key, KEY_NAME), (certificate, CERTIFICATE_NAME), (pkcs12, PKCS12_NAME)];
		for (source, name) in members {
			fs::copy(source, staging.join(name))?;
		}

		let encoder = GzEncoder::new(archive, Compression::default());
		let mut tar = tar::Builder::new(encoder);
		for (_, name) in members {
			tar.append_path_with_name(staging.join(name), name)?;
		}
		tar.into_inner()?.finish()?.sync_all()
	}
}

/// Transient files of one packaging run: a staging directory and the archive
/// being written beside its final location.
///
/// Both are removed on drop, so they belong to the thread that waits on the
/// packager rather than to the packager itself. Only [`finish`](Self::finish)
/// moves the archive into place.
#[derive(Debug)]
pub struct PackagingScratch {
	staging: tempfile::TempDir,
	archive: tempfile::NamedTempFile,
}

impl PackagingScratch {
	/// Create the staging directory below `scratch_dir` (system temp dir if
	/// `None`) and the archive temp file next to `output`.
	pub fn new(output: &Path, scratch_dir: Option<&Path>) -> io::Result<Self> {
		let mut builder = tempfile::Builder::new();
		builder.prefix("swanctl-bundle-");
		let staging = match scratch_dir {
			Some(dir) => builder.tempdir_in(dir)?,
			None => builder.tempdir()?,
		};
		let parent = match output.parent() {
			Some(p) if !p.as_os_str().is_empty() => p,
			_ => Path::new("."),
		};
		let archive = tempfile::Builder::new()
			.prefix(".swanctl-archive-")
			.tempfile_in(parent)?;
		Ok(Self { staging, archive })
	}
	/// The staging directory.
	pub fn staging(&self) -> &Path {
		self.staging.path()
	}
	/// A fresh handle on the archive temp file, for the packager to write to.
	pub fn archive(&self) -> io::Result<File> {
		self.archive.reopen()
	}
	/// Move the archive to `output` and remove the staging directory.
	pub fn finish(self, output: &Path) -> io::Result<()> {
		self.archive.persist(output).map_err(|e| e.error)?;
		self.staging.close()
	}
}

/// Run `packager` to completion on the current thread and move the archive
/// to `output`.
pub fn package(
	packager: &dyn Packager,
	output: &Path,
	scratch_dir: Option<&Path>,
	key: &Path,
	certificate: &Path,
	pkcs12: &Path,
) -> io::Result<()> {
	let scratch = PackagingScratch::new(output, scratch_dir)?;
	packager.pack(scratch.archive()?, scratch.staging(), key, certificate, pkcs12)?;
	scratch.finish(output)
}

/// Names of the regular files in a `.tar.gz` archive, in archive order.
pub fn list_archive(path: &Path) -> io::Result<Vec<String>> {
	let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(File::open(path)?));
	let mut names = Vec::new();
	for entry in archive.entries()? {
		let entry = entry?;
		names.push(entry.path()?.to_string_lossy().into_owned());
	}
	Ok(names)
}
