//! Certificate lifetime arithmetic.
//!
//! Lifetimes are requested in calendar years and handed to the signer as a
//! day count. The day count deliberately includes the start day.

use std::str::FromStr;

use time::{Month, OffsetDateTime};

use crate::{Error, Result};

const SECONDS_PER_DAY: i64 = 86_400;

/// A positive number of calendar years.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LifetimeYears(u32);

impl LifetimeYears {
	/// Fails with [`Error::InvalidLifetime`] for zero.
	pub fn new(years: u32) -> Result<Self> {
		if years == 0 {
			return Err(Error::InvalidLifetime {
				value: years.to_string(),
			});
		}
		Ok(Self(years))
	}
	/// The number of years.
	pub fn get(&self) -> u32 {
		self.0
	}
}

impl FromStr for LifetimeYears {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		let invalid = || Error::InvalidLifetime {
			value: s.to_string(),
		};
		let years = s.trim().parse::<u32>().map_err(|_| invalid())?;
		Self::new(years).map_err(|_| invalid())
	}
}

/// A lifetime resolved against a starting instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lifetime {
	/// Requested years.
	pub years: LifetimeYears,
	/// Issuance instant.
	pub starts: OffsetDateTime,
	/// `starts` plus `years` calendar years.
	pub expires: OffsetDateTime,
	/// Validity handed to the signer, start day included.
	pub days: u32,
}

impl Lifetime {
	/// Compute the expiration `years` after `now` and the matching day count.
	pub fn compute(years: LifetimeYears, now: OffsetDateTime) -> Result<Self> {
		let invalid = || Error::InvalidLifetime {
			value: years.get().to_string(),
		};
		let expires = add_calendar_years(now, years.get()).ok_or_else(invalid)?;
		let days = u32::try_from(lifetime_days(now, expires)).map_err(|_| invalid())?;
		Ok(Self {
			years,
			starts: now,
			expires,
			days,
		})
	}
	/// Fail unless the lifetime ends strictly before `authority_expires`.
	pub fn check_against(&self, authority_expires: OffsetDateTime) -> Result<()> {
		if self.expires >= authority_expires {
			return Err(Error::LifetimeExceedsAuthority {
				years: self.years.get(),
				expires: self.expires,
				authority_expires,
			});
		}
		Ok(())
	}
}

/// Parse `requested`, compute its expiration from `now` and make sure the
/// certificate expires before the authority does.
pub fn validate(
	requested: &str,
	authority_expires: OffsetDateTime,
	now: OffsetDateTime,
) -> Result<Lifetime> {
	let years = requested.parse::<LifetimeYears>()?;
	let lifetime = Lifetime::compute(years, now)?;
	lifetime.check_against(authority_expires)?;
	Ok(lifetime)
}

/// Add whole calendar years. February 29th rolls over to March 1st in
/// non-leap target years, as GNU `date` does.
pub fn add_calendar_years(t: OffsetDateTime, years: u32) -> Option<OffsetDateTime> {
	let year = t.year().checked_add(i32::try_from(years).ok()?)?;
	match t.replace_year(year) {
		Ok(shifted) => Some(shifted),
		Err(_) if t.month() == Month::February && t.day() == 29 => t
			.replace_day(1)
			.ok()?
			.replace_month(Month::March)
			.ok()?
			.replace_year(year)
			.ok(),
		Err(_) => None,
	}
}

/// `floor((expires - now + 1) / 86400) + 1`, in whole seconds.
pub fn lifetime_days(now: OffsetDateTime, expires: OffsetDateTime) -> i64 {
	(expires.unix_timestamp() - now.unix_timestamp() + 1).div_euclid(SECONDS_PER_DAY) + 1
}
