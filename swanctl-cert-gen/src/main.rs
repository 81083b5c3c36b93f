use std::process::ExitCode;

use swanctl_cert_gen::{
	packager::list_archive, Cancellation, IssuanceReport, RcgenEngine, TarGzPackager, Workflow,
};
use time::OffsetDateTime;
use tracing::warn;
use tracing_subscriber::EnvFilter;
mod args;

fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("swanctl_cert_gen=info")),
		)
		.with_writer(std::io::stderr)
		.init();

	let opts = args::options().run();

	match run(&opts) {
		Ok(report) => {
			print_summary(&report);
			ExitCode::SUCCESS
		},
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::FAILURE
		},
	}
}

fn run(opts: &args::Options) -> anyhow::Result<IssuanceReport> {
	let cancel = Cancellation::new();
	let trigger = cancel.clone();
	if let Err(err) = ctrlc::set_handler(move || trigger.cancel()) {
		warn!(error = %err, "failed to set Ctrl-C handler");
	}

	let engine = RcgenEngine::new().pkcs12_password(&opts.p12_password);
	let workflow =
		Workflow::new(engine, TarGzPackager::new(), opts.config()).cancellation(cancel);

	Ok(workflow.run(&opts.request(), OffsetDateTime::now_utc())?)
}

fn print_summary(report: &IssuanceReport) {
	println!("Issued identity for {}", report.distinguished_name);
	if let Some(ca) = &report.authority {
		println!("  issuer:   {ca}");
	}
	println!("  alt name: {}", report.subject.alternative_name());
	println!(
		"  lifetime: {} year(s), {} day(s), until {}",
		report.lifetime.years.get(),
		report.lifetime.days,
		report.lifetime.expires
	);
	println!("  archive:  {}", report.archive.display());
	if let Ok(members) = list_archive(&report.archive) {
		for member in members {
			println!("    {member}");
		}
	}
}
