//! Command Line argument parsing
#![allow(missing_docs)]

use std::{path::PathBuf, time::Duration};

use bpaf::Bpaf;
use swanctl_cert_gen::{
	engine::{key_algorithm, KeyAlgorithm},
	IssuanceRequest, Layout, LifetimePolicy, SubjectInput, WorkflowConfig,
};

#[derive(Clone, Debug, Bpaf)]
#[bpaf(options, version)]
/// swanctl-cert-gen: issue a strongSwan client identity signed by an existing CA
pub struct Options {
	/// CA certificate (PEM)
	#[bpaf(short('c'), long("ca-cert"), argument("PATH"))]
	pub ca_cert: PathBuf,
	/// CA private key (PEM)
	#[bpaf(short('k'), long("ca-key"), argument("PATH"))]
	pub ca_key: PathBuf,
	/// Certificate lifetime in years
	#[bpaf(short('l'), long("lifetime"), argument("YEARS"))]
	pub lifetime: String,
	/// Output archive (.tar.gz)
	#[bpaf(short('z'), long("output"), argument("PATH"))]
	pub output: PathBuf,
	/// Common Name, derived from given name and surname if omitted
	#[bpaf(short('n'), long("common-name"), argument("NAME"), fallback(String::new()))]
	pub common_name: String,
	/// Given Name
	#[bpaf(short('g'), long("given-name"), argument("NAME"), fallback(String::new()))]
	pub given_name: String,
	/// Surname
	#[bpaf(short('s'), long("surname"), argument("NAME"), fallback(String::new()))]
	pub surname: String,
	/// Country Name
	#[bpaf(short('C'), long("country"), argument("CC"), fallback(String::new()))]
	pub country_name: String,
	/// Organization Name
	#[bpaf(short('o'), long("organization"), argument("NAME"), fallback(String::new()))]
	pub organization_name: String,
	/// Subject Alt Name, defaults to the Common Name
	#[bpaf(short('a'), long("alt-name"), argument("SAN"), fallback(String::new()))]
	pub alt_name: String,
	/// swanctl configuration directory
	#[bpaf(
		short('b'),
		long("base-dir"),
		argument("DIR"),
		fallback(Layout::DEFAULT_BASE.into()),
		debug_fallback
	)]
	pub base_dir: PathBuf,
	/// Password protecting the PKCS#12 container
	#[bpaf(long("p12-password"), argument("PASSWORD"), fallback(String::new()))]
	pub p12_password: String,
	/// Seconds allowed for each cryptographic or packaging step
	#[bpaf(long("timeout"), argument("SECS"), fallback(60), display_fallback)]
	pub timeout: u64,
	#[bpaf(external(key_algorithm), fallback(KeyAlgorithm::Ed25519), display_fallback)]
	pub key_type: KeyAlgorithm,
	/// Issue even if the certificate would outlive the CA (logs an error)
	#[bpaf(long("allow-lifetime-overrun"))]
	pub allow_lifetime_overrun: bool,
}

impl Options {
	pub fn request(&self) -> IssuanceRequest {
		IssuanceRequest {
			ca_certificate: self.ca_cert.clone(),
			ca_key: self.ca_key.clone(),
			lifetime: self.lifetime.clone(),
			output: self.output.clone(),
			subject: SubjectInput {
				common_name: self.common_name.clone(),
				given_name: self.given_name.clone(),
				surname: self.surname.clone(),
				country_name: self.country_name.clone(),
				organization_name: self.organization_name.clone(),
				alternative_name: self.alt_name.clone(),
			},
		}
	}

	pub fn config(&self) -> WorkflowConfig {
		WorkflowConfig {
			layout: Layout::new(&self.base_dir),
			timeout: Duration::from_secs(self.timeout),
			lifetime_policy: if self.allow_lifetime_overrun {
				LifetimePolicy::WarnOnly
			} else {
				LifetimePolicy::Enforce
			},
			key_algorithm: self.key_type,
			scratch_dir: None,
		}
	}
}
