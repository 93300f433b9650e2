extern crate chrono;
extern crate pullstat;

#[macro_use]
extern crate log;

use chrono::Utc;
use pullstat::cloudwatch::RusotoMetricsApi;
use pullstat::collector::cpucredit;
use pullstat::collector::CpuCreditCollector;
use pullstat::config;
use pullstat::ec2metadata::{InstanceMetadata, METADATA_ENDPOINT};
use pullstat::graph::GraphRegistry;
use pullstat::logging;
use pullstat::metric::ResourceIdentity;
use pullstat::plugin::{self, HostError, Mode, Plugin};
use std::io;
use std::process;
use std::time::Duration;

fn run(mode: Mode, args: &config::CpuCreditArgs) -> Result<(), HostError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    // Metadata needs neither identity nor credentials.
    if mode == Mode::Definitions {
        let graphs: GraphRegistry = cpucredit::graphs();
        return plugin::output_definitions(&graphs, &mut out);
    }

    let mut metadata = InstanceMetadata::new(METADATA_ENDPOINT, Duration::from_secs(2))?;
    let identity = ResourceIdentity::resolve(
        args.region.as_ref().map(|s| s.as_str()),
        args.instance_id.as_ref().map(|s| s.as_str()),
        &mut metadata,
    )?;
    info!("reporting on {} in {}", identity.instance_id, identity.region);

    let api = RusotoMetricsApi::connect(&identity.region, &args.credentials())?;
    let collector = CpuCreditCollector::new(api, &identity.instance_id);
    Plugin::new(collector, args.tempfile.clone()).run(mode, Utc::now().timestamp(), &mut out)
}

fn main() {
    let matches = config::cpucredit_app().get_matches();
    let args = match config::cpucredit_args(&matches) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };
    if let Err(e) = logging::init(args.verbose) {
        eprintln!("could not set up logging: {}", e);
    }

    match run(Mode::from_env(), &args) {
        Ok(()) => {}
        // CloudWatch lags new instances; this clears up on its own
        Err(HostError::Collect(ref e)) if e.is_no_data() => {
            warn!("{}, nothing reported this run", e);
            process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
