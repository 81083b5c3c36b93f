//! Subject resolution: common name derivation, alternative name defaulting
//! and the distinguished name placed into the request.

use std::fmt;

use rcgen::{DnType, DnValue};

use crate::{Error, Result};

/// Raw subject fields as supplied by the operator. Blank fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectInput {
	/// CN; derived from the names below when blank.
	pub common_name: String,
	/// GN
	pub given_name: String,
	/// SN
	pub surname: String,
	/// C, a two-letter country code.
	pub country_name: String,
	/// O
	pub organization_name: String,
	/// Subject alternative name; defaults to the common name.
	pub alternative_name: String,
}

impl SubjectInput {
	/// Shorthand for [`Subject::resolve`].
	pub fn resolve(&self) -> Result<Subject> {
		Subject::resolve(
			&self.common_name,
			&self.given_name,
			&self.surname,
			&self.country_name,
			&self.organization_name,
			&self.alternative_name,
		)
	}
}

/// The identity being certified. Immutable once resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
	common_name: String,
	given_name: Option<String>,
	surname: Option<String>,
	country_name: Option<String>,
	organization_name: Option<String>,
	alternative_name: String,
	identifier: String,
}

fn non_blank(s: &str) -> Option<String> {
	let s = s.trim();
	(!s.is_empty()).then(|| s.to_string())
}

impl Subject {
	/// Resolve the subject from raw operator input.
	///
	/// A blank `common_name` is derived as `"{given_name} {surname}"`; the
	/// separating space stays even when one of the two is blank. A blank `alternative_name` defaults to the
	/// resolved common name; a supplied one is kept verbatim.
	pub fn resolve(
		common_name: &str,
		given_name: &str,
		surname: &str,
		country_name: &str,
		organization_name: &str,
		alternative_name: &str,
	) -> Result<Self> {
		let given_name = non_blank(given_name);
		let surname = non_blank(surname);

		let common_name = match non_blank(common_name) {
			Some(cn) => cn,
			None if given_name.is_none() && surname.is_none() => {
				return Err(Error::MissingIdentity)
			},
			None => format!(
				"{} {}",
				given_name.as_deref().unwrap_or_default(),
				surname.as_deref().unwrap_or_default()
			),
		};

		let identifier = normalize_identifier(&common_name);
		check_identifier(&common_name, &identifier)?;

		let alternative_name = if alternative_name.trim().is_empty() {
			common_name.clone()
		} else {
			alternative_name.to_string()
		};

		Ok(Self {
			common_name,
			given_name,
			surname,
			country_name: non_blank(country_name),
			organization_name: non_blank(organization_name),
			alternative_name,
			identifier,
		})
	}
	/// The resolved common name.
	pub fn common_name(&self) -> &str {
		&self.common_name
	}
	/// The subject alternative name placed into the request.
	pub fn alternative_name(&self) -> &str {
		&self.alternative_name
	}
	/// Lower-cased common name with whitespace runs collapsed to `.`; names
	/// every artifact generated for this subject.
	pub fn identifier(&self) -> &str {
		&self.identifier
	}
	/// Build the distinguished name from all present attributes.
	pub fn distinguished_name(&self) -> DistinguishedName {
		let mut dn = DistinguishedName::default();
		for rdn in RdnType::ORDER {
			let value = match rdn {
				RdnType::CommonName => Some(&self.common_name),
				RdnType::Surname => self.surname.as_ref(),
				RdnType::CountryName => self.country_name.as_ref(),
				RdnType::OrganizationName => self.organization_name.as_ref(),
				RdnType::GivenName => self.given_name.as_ref(),
			};
			if let Some(value) = value {
				dn.entries.push((rdn, value.clone()));
			}
		}
		dn
	}
}

/// Lower-case `name` and replace each run of whitespace with a single `.`.
/// Leading and trailing runs are replaced too.
pub fn normalize_identifier(name: &str) -> String {
	let mut identifier = String::with_capacity(name.len());
	let mut in_run = false;
	for c in name.to_lowercase().chars() {
		if c.is_whitespace() {
			if !in_run {
				identifier.push('.');
			}
			in_run = true;
		} else {
			identifier.push(c);
			in_run = false;
		}
	}
	identifier
}

fn check_identifier(common_name: &str, identifier: &str) -> Result<()> {
	let reason = if identifier == "." || identifier == ".." {
		"refers to a directory"
	} else if identifier.contains(['/', '\\']) {
		"contains a path separator"
	} else if identifier.contains('\0') {
		"contains a NUL byte"
	} else {
		return Ok(());
	};
	Err(Error::InvalidIdentity {
		common_name: common_name.to_string(),
		reason,
	})
}

/// Attribute types that may appear in the subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RdnType {
	/// CN
	CommonName,
	/// SN
	Surname,
	/// C
	CountryName,
	/// O
	OrganizationName,
	/// GN
	GivenName,
}

impl RdnType {
	/// Fixed serialization order: CN, SN, C, O, GN.
	pub const ORDER: [RdnType; 5] = [
		RdnType::CommonName,
		RdnType::Surname,
		RdnType::CountryName,
		RdnType::OrganizationName,
		RdnType::GivenName,
	];

	/// Short attribute label as used in `Type=Value` notation.
	pub fn label(&self) -> &'static str {
		match self {
			RdnType::CommonName => "CN",
			RdnType::Surname => "SN",
			RdnType::CountryName => "C",
			RdnType::OrganizationName => "O",
			RdnType::GivenName => "GN",
		}
	}

	fn dn_type(&self) -> DnType {
		match self {
			RdnType::CommonName => DnType::CommonName,
			RdnType::CountryName => DnType::CountryName,
			RdnType::OrganizationName => DnType::OrganizationName,
			// id-at-surname
			RdnType::Surname => DnType::CustomDnType(vec![2, 5, 4, 4]),
			// id-at-givenName
			RdnType::GivenName => DnType::CustomDnType(vec![2, 5, 4, 42]),
		}
	}
}

/// Ordered subject attributes. Displays as `CN=Alice Example, C=US`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistinguishedName {
	entries: Vec<(RdnType, String)>,
}

impl DistinguishedName {
	/// Attributes in serialization order.
	pub fn iter(&self) -> impl Iterator<Item = (RdnType, &str)> {
		self.entries.iter().map(|(ty, v)| (*ty, v.as_str()))
	}
	/// Value of the `ty` attribute, if present.
	pub fn get(&self, ty: RdnType) -> Option<&str> {
		self.iter().find(|(t, _)| *t == ty).map(|(_, v)| v)
	}
	/// Whether no attribute is present.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
	/// Convert into rcgen's representation. Country codes are encoded as
	/// `PrintableString`, everything else as `UTF8String`.
	pub fn to_rcgen(&self) -> std::result::Result<rcgen::DistinguishedName, rcgen::Error> {
		let mut dn = rcgen::DistinguishedName::new();
		for (ty, value) in self.iter() {
			match ty {
				RdnType::CountryName => {
					dn.push(ty.dn_type(), DnValue::PrintableString(value.to_string().try_into()?))
				},
				_ => dn.push(ty.dn_type(), value),
			}
		}
		Ok(dn)
	}
}

impl fmt::Display for DistinguishedName {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, (ty, value)) in self.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{}={}", ty.label(), value)?;
		}
		Ok(())
	}
}
